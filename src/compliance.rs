//! Lifelines state machine and study aggregation.
//!
//! Every function here is pure over a [`StudyState`]: events return the
//! next state (or `None` when the event does not apply) and the tracker
//! commits it. Statistics are recomputed from the participant set on each
//! call; nothing is maintained incrementally.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::config::StudyComplianceConfig;
use crate::error::ConfigError;
use crate::models::{
    CohortProgress, ComplianceStatus, DailyCompliance, DayMark, ParticipantCompliance,
    StudyComplianceStats, StudyState,
};
use crate::rng::SeededRandom;

/// Maps a lifeline count to its tier. Each tier includes its lower bound's
/// threshold: `at_risk` covers `(critical, at_risk]`, `critical` covers `(0, critical]`.
pub fn status_for(config: &StudyComplianceConfig, lifelines: u32) -> ComplianceStatus {
    if lifelines == 0 {
        ComplianceStatus::Withdrawn
    } else if lifelines <= config.critical_threshold {
        ComplianceStatus::Critical
    } else if lifelines <= config.at_risk_threshold {
        ComplianceStatus::AtRisk
    } else {
        ComplianceStatus::OnTrack
    }
}

fn day_index(enrolled_on: NaiveDate, on: NaiveDate) -> u32 {
    let elapsed = (on - enrolled_on).num_days();
    if elapsed < 0 {
        0
    } else {
        u32::try_from(elapsed).unwrap_or(u32::MAX).saturating_add(1)
    }
}

impl ParticipantCompliance {
    pub fn enroll(
        participant_id: &str,
        display_name: &str,
        cohort: u32,
        enrolled_on: NaiveDate,
        config: &StudyComplianceConfig,
        engagement: f64,
    ) -> Self {
        let total = config.total_lifelines;
        Self {
            participant_id: participant_id.to_string(),
            display_name: display_name.to_string(),
            cohort,
            enrolled_on,
            current_day: 0,
            total_lifelines: total,
            lifelines_remaining: total,
            days_since_last_check_in: 0,
            today: DayMark::Pending,
            engagement: engagement.clamp(0.0, 1.0),
            status: status_for(config, total),
            profile: BTreeMap::new(),
        }
    }

    pub fn is_withdrawn(&self) -> bool {
        self.status == ComplianceStatus::Withdrawn
    }

    pub fn checked_in_today(&self) -> bool {
        self.today == DayMark::CheckedIn
    }

    /// Not withdrawn, already enrolled on `on`, and still inside the study window.
    pub fn is_active(&self, on: NaiveDate, duration_days: u32) -> bool {
        let day = day_index(self.enrolled_on, on);
        !self.is_withdrawn() && day >= 1 && day <= duration_days
    }

    fn sync_day(&mut self, on: NaiveDate, duration_days: u32) {
        if !self.is_withdrawn() {
            self.current_day = day_index(self.enrolled_on, on).min(duration_days);
        }
    }

    fn record_check_in(&mut self, config: &StudyComplianceConfig) {
        self.days_since_last_check_in = 0;
        self.today = DayMark::CheckedIn;
        self.status = status_for(config, self.lifelines_remaining);
    }

    fn record_miss(&mut self, config: &StudyComplianceConfig) {
        self.lifelines_remaining = self.lifelines_remaining.saturating_sub(1);
        self.days_since_last_check_in = self.days_since_last_check_in.saturating_add(1);
        self.today = DayMark::Missed;
        self.status = status_for(config, self.lifelines_remaining);
        if self.is_withdrawn() {
            info!(
                participant = %self.participant_id,
                "participant withdrawn after exhausting lifelines"
            );
        }
    }

    fn restore(&mut self, config: &StudyComplianceConfig) {
        self.lifelines_remaining = self.total_lifelines;
        self.days_since_last_check_in = 0;
        self.today = DayMark::Pending;
        self.current_day = 0;
        self.status = status_for(config, self.total_lifelines);
    }
}

fn active_position(study: &StudyState, participant_id: &str) -> Option<usize> {
    study.participants.iter().position(|p| {
        p.participant_id == participant_id && p.is_active(study.current_date, study.duration_days)
    })
}

/// Check-in event. Lifelines are untouched.
pub fn check_in(study: &StudyState, participant_id: &str) -> Option<StudyState> {
    let index = active_position(study, participant_id)?;
    let mut next = study.clone();
    next.participants[index].record_check_in(&study.config);
    debug!(study = %study.study_id, participant = participant_id, "check-in");
    Some(next)
}

/// Missed-day event. Burns one lifeline; withdrawal at zero.
pub fn miss(study: &StudyState, participant_id: &str) -> Option<StudyState> {
    let index = active_position(study, participant_id)?;
    let mut next = study.clone();
    next.participants[index].record_miss(&study.config);
    debug!(study = %study.study_id, participant = participant_id, "missed day");
    Some(next)
}

/// Closes the current day: records the compliance point, charges a miss to
/// every active participant with nothing logged, then moves to the next date.
pub fn advance_day(study: &StudyState) -> StudyState {
    let mut next = study.clone();
    let today = next.current_date;
    let duration = next.duration_days;
    let study_day = next.study_day();
    let config = next.config.clone();

    let mut active = 0u32;
    let mut checked_in = 0u32;
    for participant in next.participants.iter_mut() {
        if !participant.is_active(today, duration) {
            continue;
        }
        active += 1;
        match participant.today {
            DayMark::CheckedIn => checked_in += 1,
            DayMark::Missed => {}
            DayMark::Pending => participant.record_miss(&config),
        }
    }

    if active > 0 {
        next.history.push(DailyCompliance {
            date: today,
            study_day,
            active,
            checked_in,
            percent: f64::from(checked_in) / f64::from(active) * 100.0,
        });
    }

    next.current_date = today + Duration::days(1);
    for participant in next.participants.iter_mut() {
        participant.today = DayMark::Pending;
        participant.sync_day(next.current_date, duration);
    }

    debug!(
        study = %next.study_id,
        day = study_day,
        active,
        checked_in,
        "advanced day"
    );
    next
}

/// Draws a check-in decision for every active participant with nothing
/// logged today, then advances the day.
pub fn simulate_day(study: &StudyState) -> StudyState {
    let mut next = study.clone();
    let today = next.current_date;
    let duration = next.duration_days;
    let config = next.config.clone();

    for participant in next.participants.iter_mut() {
        if !participant.is_active(today, duration) || participant.today != DayMark::Pending {
            continue;
        }
        if next.rng.chance(participant.engagement) {
            participant.record_check_in(&config);
        }
    }

    advance_day(&next)
}

/// Rewinds the study to its start date with every participant restored to
/// the lifelines they were created with.
pub fn reset(study: &StudyState) -> StudyState {
    let mut next = study.clone();
    next.current_date = next.start_date;
    next.history.clear();
    next.rng = SeededRandom::new(&next.study_id);
    let duration = next.duration_days;
    let start = next.start_date;
    for participant in next.participants.iter_mut() {
        participant.restore(&study.config);
        participant.sync_day(start, duration);
    }
    next
}

/// Adds a participant with the study's current lifeline budget, whatever
/// budget the record was built with. Duplicate ids are ignored.
pub fn enroll(study: &StudyState, mut participant: ParticipantCompliance) -> Option<StudyState> {
    if study.participant(&participant.participant_id).is_some() {
        return None;
    }
    let mut next = study.clone();
    let total = next.config.total_lifelines;
    participant.total_lifelines = total;
    participant.lifelines_remaining = total;
    participant.days_since_last_check_in = 0;
    participant.today = DayMark::Pending;
    participant.status = status_for(&next.config, total);
    participant.sync_day(next.current_date, next.duration_days);
    next.participants.push(participant);
    next.recruitment.enrolled = u32::try_from(next.participants.len()).unwrap_or(u32::MAX);
    Some(next)
}

/// Replaces the study config. Existing participants keep their lifelines;
/// only the tier thresholds apply to them immediately.
pub fn configure(
    study: &StudyState,
    config: StudyComplianceConfig,
) -> Result<StudyState, ConfigError> {
    config.validate()?;
    let mut next = study.clone();
    for participant in next.participants.iter_mut() {
        participant.status = status_for(&config, participant.lifelines_remaining);
    }
    next.config = config;
    Ok(next)
}

fn cohort_progress(study: &StudyState) -> Vec<CohortProgress> {
    let mut cohorts: BTreeMap<u32, Vec<&ParticipantCompliance>> = BTreeMap::new();
    for participant in study.participants.iter() {
        cohorts.entry(participant.cohort).or_default().push(participant);
    }

    let duration = study.duration_days;
    cohorts
        .into_iter()
        .filter_map(|(cohort, members)| {
            let start_date = members.iter().map(|p| p.enrolled_on).min()?;
            let current_day = day_index(start_date, study.current_date).min(duration);
            let active = members
                .iter()
                .filter(|p| p.is_active(study.current_date, duration))
                .count();
            let withdrawn = members.iter().filter(|p| p.is_withdrawn()).count();
            Some(CohortProgress {
                cohort,
                participants: u32::try_from(members.len()).unwrap_or(u32::MAX),
                active: u32::try_from(active).unwrap_or(u32::MAX),
                withdrawn: u32::try_from(withdrawn).unwrap_or(u32::MAX),
                start_date,
                end_date: start_date
                    .checked_add_signed(Duration::days(i64::from(duration) - 1))
                    .unwrap_or(NaiveDate::MAX),
                current_day,
                percent_complete: f64::from(current_day) / f64::from(duration) * 100.0,
            })
        })
        .collect()
}

pub fn compute_stats(study: &StudyState) -> StudyComplianceStats {
    let mut counts: BTreeMap<ComplianceStatus, u32> = BTreeMap::new();
    let mut lifelines_total = 0u64;
    for participant in study.participants.iter() {
        *counts.entry(participant.status).or_insert(0) += 1;
        lifelines_total += u64::from(participant.lifelines_remaining);
    }
    let count = |status| counts.get(&status).copied().unwrap_or(0);

    let total = u32::try_from(study.participants.len()).unwrap_or(u32::MAX);
    let average_lifelines = if total == 0 {
        0.0
    } else {
        lifelines_total as f64 / f64::from(total)
    };

    let (checked_in, participant_days) = study
        .history
        .iter()
        .fold((0u64, 0u64), |(c, a), point| {
            (c + u64::from(point.checked_in), a + u64::from(point.active))
        });
    let overall_compliance_percent = if participant_days == 0 {
        None
    } else {
        Some(checked_in as f64 / participant_days as f64 * 100.0)
    };

    StudyComplianceStats {
        study_id: study.study_id.clone(),
        as_of: study.current_date,
        study_day: study.study_day(),
        total_participants: total,
        on_track: count(ComplianceStatus::OnTrack),
        at_risk: count(ComplianceStatus::AtRisk),
        critical: count(ComplianceStatus::Critical),
        withdrawn: count(ComplianceStatus::Withdrawn),
        average_lifelines,
        overall_compliance_percent,
        daily_compliance: study.history.clone(),
        cohorts: cohort_progress(study),
    }
}
