use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::StudyComplianceConfig;
use crate::rng::SeededRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    OnTrack,
    AtRisk,
    Critical,
    Withdrawn,
}

impl ComplianceStatus {
    pub fn label(self) -> &'static str {
        match self {
            ComplianceStatus::OnTrack => "on_track",
            ComplianceStatus::AtRisk => "at_risk",
            ComplianceStatus::Critical => "critical",
            ComplianceStatus::Withdrawn => "withdrawn",
        }
    }
}

/// What a participant has logged for the current study date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayMark {
    #[default]
    Pending,
    CheckedIn,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantCompliance {
    pub participant_id: String,
    pub display_name: String,
    pub cohort: u32,
    pub enrolled_on: NaiveDate,
    /// 1-based day within the participant's own study window; 0 before enrollment.
    pub current_day: u32,
    /// Lifelines granted at creation. Later config changes do not touch it.
    pub total_lifelines: u32,
    pub lifelines_remaining: u32,
    pub days_since_last_check_in: u32,
    pub today: DayMark,
    /// Probability of checking in on a simulated day.
    pub engagement: f64,
    pub status: ComplianceStatus,
    /// Answers to the enrollment profile questions, keyed by question id.
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingState {
    pub shipped: u32,
    pub delivered: u32,
    pub delayed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecruitmentState {
    pub target: u32,
    pub enrolled: u32,
    pub open: bool,
}

/// One point of the daily compliance time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCompliance {
    pub date: NaiveDate,
    pub study_day: u32,
    pub active: u32,
    pub checked_in: u32,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyState {
    pub study_id: String,
    pub brand: String,
    pub start_date: NaiveDate,
    pub duration_days: u32,
    pub current_date: NaiveDate,
    pub config: StudyComplianceConfig,
    pub participants: Vec<ParticipantCompliance>,
    pub history: Vec<DailyCompliance>,
    pub rng: SeededRandom,
    pub shipping: ShippingState,
    pub recruitment: RecruitmentState,
}

impl StudyState {
    pub fn new(
        study_id: &str,
        brand: &str,
        start_date: NaiveDate,
        duration_days: u32,
        config: StudyComplianceConfig,
    ) -> Self {
        Self {
            study_id: study_id.to_string(),
            brand: brand.to_string(),
            start_date,
            duration_days: duration_days.max(1),
            current_date: start_date,
            config,
            participants: Vec::new(),
            history: Vec::new(),
            rng: SeededRandom::new(study_id),
            shipping: ShippingState::default(),
            recruitment: RecruitmentState::default(),
        }
    }

    /// 1-based study day of `current_date`.
    pub fn study_day(&self) -> u32 {
        let elapsed = (self.current_date - self.start_date).num_days().max(0);
        u32::try_from(elapsed).unwrap_or(u32::MAX).saturating_add(1)
    }

    pub fn participant(&self, participant_id: &str) -> Option<&ParticipantCompliance> {
        self.participants
            .iter()
            .find(|p| p.participant_id == participant_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortProgress {
    pub cohort: u32,
    pub participants: u32,
    pub active: u32,
    pub withdrawn: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Day within the cohort window, clamped to [0, duration].
    pub current_day: u32,
    pub percent_complete: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyComplianceStats {
    pub study_id: String,
    pub as_of: NaiveDate,
    pub study_day: u32,
    pub total_participants: u32,
    pub on_track: u32,
    pub at_risk: u32,
    pub critical: u32,
    pub withdrawn: u32,
    pub average_lifelines: f64,
    /// Check-ins over participant-days across the recorded history.
    pub overall_compliance_percent: Option<f64>,
    pub daily_compliance: Vec<DailyCompliance>,
    pub cohorts: Vec<CohortProgress>,
}

impl CohortProgress {
    pub fn withdrawn_percent(&self) -> f64 {
        if self.participants == 0 {
            0.0
        } else {
            f64::from(self.withdrawn) / f64::from(self.participants) * 100.0
        }
    }
}

impl StudyComplianceStats {
    pub fn withdrawn_percent(&self) -> f64 {
        if self.total_participants == 0 {
            0.0
        } else {
            f64::from(self.withdrawn) / f64::from(self.total_participants) * 100.0
        }
    }
}
