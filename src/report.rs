use std::fmt::Write;

use crate::alerts::AdminAlert;
use crate::models::{ComplianceStatus, ParticipantCompliance, StudyComplianceStats, StudyState};

/// Participants below on-track, fewest lifelines first. Withdrawn participants are excluded.
pub fn needing_attention(study: &StudyState) -> Vec<&ParticipantCompliance> {
    let mut flagged: Vec<&ParticipantCompliance> = study
        .participants
        .iter()
        .filter(|p| matches!(p.status, ComplianceStatus::AtRisk | ComplianceStatus::Critical))
        .collect();
    flagged.sort_by(|a, b| {
        a.lifelines_remaining
            .cmp(&b.lifelines_remaining)
            .then_with(|| b.days_since_last_check_in.cmp(&a.days_since_last_check_in))
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });
    flagged
}

pub fn build_report(
    study: &StudyState,
    stats: &StudyComplianceStats,
    alerts: &[&AdminAlert],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Rebate Study Compliance Report");
    let _ = writeln!(
        output,
        "{} for {} (day {} of {}, as of {})",
        study.study_id, study.brand, stats.study_day, study.duration_days, stats.as_of
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");
    let _ = writeln!(
        output,
        "- on track: {}\n- at risk: {}\n- critical: {}\n- withdrawn: {}",
        stats.on_track, stats.at_risk, stats.critical, stats.withdrawn
    );
    match stats.overall_compliance_percent {
        Some(percent) => {
            let _ = writeln!(
                output,
                "- compliance: {:.1}% (target {:.0}%)",
                percent, study.config.target_compliance_percent
            );
        }
        None => {
            let _ = writeln!(output, "- compliance: no completed days yet");
        }
    }
    let _ = writeln!(output, "- average lifelines: {:.1}", stats.average_lifelines);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Progress");
    if stats.cohorts.is_empty() {
        let _ = writeln!(output, "No participants enrolled.");
    } else {
        for cohort in stats.cohorts.iter() {
            let _ = writeln!(
                output,
                "- cohort {}: day {} ({} to {}), {:.0}% complete, {} of {} active, {} withdrawn",
                cohort.cohort,
                cohort.current_day,
                cohort.start_date,
                cohort.end_date,
                cohort.percent_complete,
                cohort.active,
                cohort.participants,
                cohort.withdrawn
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Daily Compliance");
    if stats.daily_compliance.is_empty() {
        let _ = writeln!(output, "No days recorded.");
    } else {
        for point in stats.daily_compliance.iter().rev().take(7) {
            let _ = writeln!(
                output,
                "- day {} ({}): {} of {} checked in ({:.1}%)",
                point.study_day, point.date, point.checked_in, point.active, point.percent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Participants Needing Attention");
    let flagged = needing_attention(study);
    if flagged.is_empty() {
        let _ = writeln!(output, "Everyone is on track.");
    } else {
        for participant in flagged.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, cohort {}): {} of {} lifelines, {} days since check-in",
                participant.display_name,
                participant.participant_id,
                participant.cohort,
                participant.lifelines_remaining,
                participant.total_lifelines,
                participant.days_since_last_check_in
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Alerts");
    if alerts.is_empty() {
        let _ = writeln!(output, "No open alerts.");
    } else {
        for alert in alerts.iter() {
            let _ = writeln!(
                output,
                "- [{:?}] {}: {}",
                alert.severity,
                alert.category.label(),
                alert.message
            );
            for action in alert.recommended_actions.iter() {
                let _ = writeln!(output, "  - {action}");
            }
        }
    }

    output
}
