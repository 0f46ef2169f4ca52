//! In-memory study repository and the event surface the front end drives.
//!
//! Events are staged against a study's current state with the pure
//! functions in [`crate::compliance`] and applied by [`ComplianceTracker::commit`].
//! Unknown study or participant ids stage nothing and commit nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compliance;
use crate::config::StudyComplianceConfig;
use crate::error::ConfigError;
use crate::models::{ParticipantCompliance, StudyComplianceStats, StudyState};

#[derive(Debug, Clone, PartialEq)]
pub enum ComplianceEvent {
    CheckIn { participant_id: String },
    Miss { participant_id: String },
    AdvanceDay,
    SimulateDay,
    Reset,
    Enroll(ParticipantCompliance),
}

/// A computed next state waiting to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedChange {
    pub study_id: String,
    pub next: StudyState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplianceTracker {
    studies: BTreeMap<String, StudyState>,
}

impl ComplianceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn study(&self, study_id: &str) -> Option<&StudyState> {
        self.studies.get(study_id)
    }

    pub fn studies(&self) -> impl Iterator<Item = &StudyState> {
        self.studies.values()
    }

    /// Registers a study, replacing any existing study with the same id.
    pub fn insert_study(&mut self, study: StudyState) -> Option<StudyState> {
        self.studies.insert(study.study_id.clone(), study)
    }

    pub fn remove_study(&mut self, study_id: &str) -> Option<StudyState> {
        self.studies.remove(study_id)
    }

    /// Computes the effect of `event` without mutating anything.
    pub fn stage(&self, study_id: &str, event: &ComplianceEvent) -> Option<StagedChange> {
        let Some(study) = self.studies.get(study_id) else {
            warn!(study = study_id, "ignoring event for unknown study");
            return None;
        };

        let next = match event {
            ComplianceEvent::CheckIn { participant_id } => {
                compliance::check_in(study, participant_id)
            }
            ComplianceEvent::Miss { participant_id } => compliance::miss(study, participant_id),
            ComplianceEvent::AdvanceDay => Some(compliance::advance_day(study)),
            ComplianceEvent::SimulateDay => Some(compliance::simulate_day(study)),
            ComplianceEvent::Reset => Some(compliance::reset(study)),
            ComplianceEvent::Enroll(participant) => {
                compliance::enroll(study, participant.clone())
            }
        };

        if next.is_none() {
            warn!(study = study_id, ?event, "event did not apply");
        }

        next.map(|next| StagedChange {
            study_id: study_id.to_string(),
            next,
        })
    }

    /// Applies a staged change. A change whose study has since been removed is dropped.
    pub fn commit(&mut self, change: StagedChange) -> bool {
        match self.studies.get_mut(&change.study_id) {
            Some(slot) => {
                *slot = change.next;
                true
            }
            None => false,
        }
    }

    fn dispatch(&mut self, study_id: &str, event: ComplianceEvent) -> bool {
        match self.stage(study_id, &event) {
            Some(change) => self.commit(change),
            None => false,
        }
    }

    pub fn advance_day(&mut self, study_id: &str) -> bool {
        self.dispatch(study_id, ComplianceEvent::AdvanceDay)
    }

    pub fn simulate_day(&mut self, study_id: &str) -> bool {
        self.dispatch(study_id, ComplianceEvent::SimulateDay)
    }

    pub fn simulate_miss(&mut self, study_id: &str, participant_id: &str) -> bool {
        self.dispatch(
            study_id,
            ComplianceEvent::Miss {
                participant_id: participant_id.to_string(),
            },
        )
    }

    pub fn simulate_check_in(&mut self, study_id: &str, participant_id: &str) -> bool {
        self.dispatch(
            study_id,
            ComplianceEvent::CheckIn {
                participant_id: participant_id.to_string(),
            },
        )
    }

    pub fn reset(&mut self, study_id: &str) -> bool {
        self.dispatch(study_id, ComplianceEvent::Reset)
    }

    pub fn enroll(&mut self, study_id: &str, participant: ParticipantCompliance) -> bool {
        self.dispatch(study_id, ComplianceEvent::Enroll(participant))
    }

    /// Validates and installs a new config. Returns `Ok(false)` for an unknown study.
    pub fn configure(
        &mut self,
        study_id: &str,
        config: StudyComplianceConfig,
    ) -> Result<bool, ConfigError> {
        let Some(study) = self.studies.get(study_id) else {
            warn!(study = study_id, "ignoring config for unknown study");
            return Ok(false);
        };
        let next = compliance::configure(study, config)?;
        Ok(self.commit(StagedChange {
            study_id: study_id.to_string(),
            next,
        }))
    }

    pub fn compute_stats(&self, study_id: &str) -> Option<StudyComplianceStats> {
        self.studies.get(study_id).map(compliance::compute_stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::models::ComplianceStatus;

    fn tracker_with_study() -> ComplianceTracker {
        let start = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let mut study = StudyState::new(
            "study-calm",
            "Driftwell",
            start,
            28,
            StudyComplianceConfig::default(),
        );
        for id in ["P-1", "P-2"] {
            study.participants.push(ParticipantCompliance::enroll(
                id,
                "Avery Lee",
                1,
                start,
                &study.config,
                0.9,
            ));
        }
        let mut tracker = ComplianceTracker::new();
        tracker.insert_study(study);
        tracker
    }

    #[test]
    fn staging_does_not_mutate_until_commit() {
        let mut tracker = tracker_with_study();
        let change = tracker
            .stage(
                "study-calm",
                &ComplianceEvent::Miss {
                    participant_id: "P-1".to_string(),
                },
            )
            .unwrap();
        let before = tracker.study("study-calm").unwrap();
        assert_eq!(before.participant("P-1").unwrap().lifelines_remaining, 7);

        assert!(tracker.commit(change));
        let after = tracker.study("study-calm").unwrap();
        assert_eq!(after.participant("P-1").unwrap().lifelines_remaining, 6);
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let mut tracker = tracker_with_study();
        let before = tracker.clone();
        assert!(!tracker.advance_day("missing"));
        assert!(!tracker.simulate_miss("study-calm", "P-404"));
        assert!(!tracker.simulate_check_in("missing", "P-1"));
        assert!(!tracker.reset("missing"));
        assert_eq!(tracker.configure("missing", StudyComplianceConfig::default()), Ok(false));
        assert!(tracker.compute_stats("missing").is_none());
        assert_eq!(tracker, before);
    }

    #[test]
    fn advance_day_sees_prior_check_ins() {
        let mut tracker = tracker_with_study();
        assert!(tracker.simulate_check_in("study-calm", "P-1"));
        assert!(tracker.advance_day("study-calm"));

        let study = tracker.study("study-calm").unwrap();
        assert_eq!(study.participant("P-1").unwrap().lifelines_remaining, 7);
        assert_eq!(study.participant("P-2").unwrap().lifelines_remaining, 6);
    }

    #[test]
    fn invalid_config_is_reported_and_not_applied() {
        let mut tracker = tracker_with_study();
        let bad = StudyComplianceConfig {
            total_lifelines: 2,
            ..StudyComplianceConfig::default()
        };
        assert!(tracker.configure("study-calm", bad).is_err());
        assert_eq!(
            tracker.study("study-calm").unwrap().config,
            StudyComplianceConfig::default()
        );
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut tracker = tracker_with_study();
        for _ in 0..7 {
            tracker.simulate_miss("study-calm", "P-2");
        }
        let stats = tracker.compute_stats("study-calm").unwrap();
        assert_eq!(stats.withdrawn, 1);

        assert!(tracker.reset("study-calm"));
        let study = tracker.study("study-calm").unwrap();
        assert_eq!(study.participant("P-2").unwrap().status, ComplianceStatus::OnTrack);
    }

    #[test]
    fn enroll_uses_current_lifeline_budget() {
        let mut tracker = tracker_with_study();
        let smaller = StudyComplianceConfig {
            total_lifelines: 5,
            ..StudyComplianceConfig::default()
        };
        assert_eq!(tracker.configure("study-calm", smaller), Ok(true));

        let config = tracker.study("study-calm").unwrap().config.clone();
        let start = tracker.study("study-calm").unwrap().start_date;
        let newcomer = ParticipantCompliance::enroll("P-3", "Kiara Patel", 1, start, &config, 0.7);
        assert!(tracker.enroll("study-calm", newcomer));

        let study = tracker.study("study-calm").unwrap();
        assert_eq!(study.participant("P-1").unwrap().lifelines_remaining, 7);
        assert_eq!(study.participant("P-3").unwrap().lifelines_remaining, 5);
    }
}
