use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use crate::config::ProfileQuestion;
use crate::models::ParticipantCompliance;
use crate::tracker::ComplianceTracker;

#[derive(Debug, Deserialize)]
struct RosterRow {
    participant_id: String,
    display_name: String,
    cohort: u32,
    enrolled_on: NaiveDate,
    engagement: Option<f64>,
}

pub fn import_roster(
    tracker: &mut ComplianceTracker,
    study_id: &str,
    csv_path: &Path,
    default_engagement: f64,
    questions: &[ProfileQuestion],
) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    import_roster_from_reader(tracker, study_id, file, default_engagement, questions)
}

/// Enrolls each CSV row into `study_id`. Columns named after a profile
/// question carry that participant's answer. Rows whose participant id
/// already exists, or with an answer the question does not accept, are
/// skipped; the count covers new enrollments only.
pub fn import_roster_from_reader<R: Read>(
    tracker: &mut ComplianceTracker,
    study_id: &str,
    input: R,
    default_engagement: f64,
    questions: &[ProfileQuestion],
) -> anyhow::Result<usize> {
    let Some(config) = tracker.study(study_id).map(|study| study.config.clone()) else {
        bail!("unknown study {study_id}");
    };

    let mut reader = csv::Reader::from_reader(input);
    let headers = reader.headers()?.clone();
    let answer_columns: Vec<(usize, &ProfileQuestion)> = headers
        .iter()
        .enumerate()
        .filter_map(|(column, name)| {
            questions
                .iter()
                .find(|question| question.id == name.trim())
                .map(|question| (column, question))
        })
        .collect();
    let mut inserted = 0usize;

    for result in reader.records() {
        let record = result?;
        let row: RosterRow = record.deserialize(Some(&headers))?;

        let mut profile = BTreeMap::new();
        let mut rejected = None;
        for (column, question) in answer_columns.iter() {
            let answer = record.get(*column).unwrap_or("").trim();
            if !question.accepts(answer) {
                rejected = Some((question.id.as_str(), answer));
                break;
            }
            if !answer.is_empty() {
                profile.insert(question.id.clone(), answer.to_string());
            }
        }
        if let Some((question, answer)) = rejected {
            warn!(
                participant = %row.participant_id,
                question,
                answer,
                "skipping roster row with an invalid profile answer"
            );
            continue;
        }

        let mut participant = ParticipantCompliance::enroll(
            &row.participant_id,
            &row.display_name,
            row.cohort,
            row.enrolled_on,
            &config,
            row.engagement.unwrap_or(default_engagement),
        );
        participant.profile = profile;
        if tracker.enroll(study_id, participant) {
            inserted += 1;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_profile_questions, StudyComplianceConfig};
    use crate::models::StudyState;

    const ROSTER: &str = "\
participant_id,display_name,cohort,enrolled_on,engagement
P-100,Avery Lee,1,2026-08-01,0.9
P-101,Jules Moreno,1,2026-08-01,
P-102,Kiara Patel,2,2026-08-08,0.7
P-100,Avery Lee,1,2026-08-01,0.9
";

    fn tracker() -> ComplianceTracker {
        let mut tracker = ComplianceTracker::new();
        tracker.insert_study(StudyState::new(
            "study-focus",
            "Clearmind",
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            30,
            StudyComplianceConfig::default(),
        ));
        tracker
    }

    #[test]
    fn imports_rows_and_skips_duplicates() {
        let mut tracker = tracker();
        let inserted =
            import_roster_from_reader(&mut tracker, "study-focus", ROSTER.as_bytes(), 0.8, &[])
                .unwrap();
        assert_eq!(inserted, 3);

        let study = tracker.study("study-focus").unwrap();
        assert_eq!(study.participants.len(), 3);
        assert_eq!(study.participant("P-101").unwrap().engagement, 0.8);
        assert_eq!(study.participant("P-102").unwrap().cohort, 2);
        assert_eq!(study.recruitment.enrolled, 3);
    }

    #[test]
    fn profile_answers_are_checked_against_questions() {
        let roster = "\
participant_id,display_name,cohort,enrolled_on,engagement,age_range,wearable,notes
P-200,Imani Okafor,1,2026-08-01,0.9,25-34,Oura,night shift
P-201,Theo Silva,1,2026-08-01,,,Whoop,
P-202,Lena Haddad,1,2026-08-01,0.7,twelve,Garmin,
";
        let mut tracker = tracker();
        let inserted = import_roster_from_reader(
            &mut tracker,
            "study-focus",
            roster.as_bytes(),
            0.8,
            &default_profile_questions(),
        )
        .unwrap();
        assert_eq!(inserted, 2);

        let study = tracker.study("study-focus").unwrap();
        let imani = study.participant("P-200").unwrap();
        assert_eq!(imani.profile.get("age_range").map(String::as_str), Some("25-34"));
        assert_eq!(imani.profile.get("wearable").map(String::as_str), Some("Oura"));
        assert!(!imani.profile.contains_key("notes"));

        let theo = study.participant("P-201").unwrap();
        assert!(!theo.profile.contains_key("age_range"));
        assert_eq!(theo.profile.len(), 1);

        assert!(study.participant("P-202").is_none());
    }

    #[test]
    fn unknown_study_is_an_error() {
        let mut tracker = tracker();
        let result = import_roster_from_reader(&mut tracker, "nope", ROSTER.as_bytes(), 0.8, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_rows_are_reported() {
        let mut tracker = tracker();
        let bad = "participant_id,display_name,cohort,enrolled_on\nP-1,Avery Lee,one,2026-08-01\n";
        let result = import_roster_from_reader(&mut tracker, "study-focus", bad.as_bytes(), 0.8, &[]);
        assert!(result.is_err());
    }
}
