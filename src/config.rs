use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alerts::AlertSettings;
use crate::error::ConfigError;

/// Lifeline budget and status thresholds for one study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyComplianceConfig {
    /// Lifelines granted to participants enrolled from now on.
    pub total_lifelines: u32,
    pub at_risk_threshold: u32,
    pub critical_threshold: u32,
    pub target_compliance_percent: f64,
}

impl Default for StudyComplianceConfig {
    fn default() -> Self {
        Self {
            total_lifelines: 7,
            at_risk_threshold: 4,
            critical_threshold: 2,
            target_compliance_percent: 85.0,
        }
    }
}

impl StudyComplianceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.total_lifelines > self.at_risk_threshold
            && self.at_risk_threshold > self.critical_threshold
            && self.critical_threshold > 0;
        if !ordered {
            return Err(ConfigError::ThresholdOrder {
                total: self.total_lifelines,
                at_risk: self.at_risk_threshold,
                critical: self.critical_threshold,
            });
        }

        let target = self.target_compliance_percent;
        if !(target > 0.0 && target <= 100.0) {
            return Err(ConfigError::TargetPercent(target));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Check-in probability for participants imported without one.
    pub default_engagement: f64,
    /// Days between consecutive cohort enrollments in generated studies.
    pub cohort_spacing_days: u32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            default_engagement: 0.85,
            cohort_spacing_days: 7,
        }
    }
}

impl SimulationSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.default_engagement) {
            return Err(ConfigError::Engagement(self.default_engagement));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Text,
    Number,
    SingleChoice,
    MultiChoice,
}

/// A demographics/profile question asked at enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileQuestion {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<String>,
}

impl ProfileQuestion {
    fn choice(id: &str, prompt: &str, options: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            kind: QuestionKind::SingleChoice,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// Whether `answer` is a valid response. Blank answers count as unanswered
    /// and are always accepted; multi-choice answers separate options with `;`.
    pub fn accepts(&self, answer: &str) -> bool {
        let answer = answer.trim();
        if answer.is_empty() {
            return true;
        }
        let is_option = |value: &str| self.options.iter().any(|option| option == value);
        match self.kind {
            QuestionKind::Text => true,
            QuestionKind::Number => answer.parse::<f64>().is_ok_and(f64::is_finite),
            QuestionKind::SingleChoice => is_option(answer),
            QuestionKind::MultiChoice => answer.split(';').map(str::trim).all(is_option),
        }
    }

    fn is_well_formed(&self) -> bool {
        if self.id.trim().is_empty() || self.prompt.trim().is_empty() {
            return false;
        }
        match self.kind {
            QuestionKind::SingleChoice | QuestionKind::MultiChoice => !self.options.is_empty(),
            QuestionKind::Text | QuestionKind::Number => true,
        }
    }
}

pub fn default_profile_questions() -> Vec<ProfileQuestion> {
    vec![
        ProfileQuestion::choice(
            "age_range",
            "What is your age range?",
            &["18-24", "25-34", "35-44", "45-54", "55+"],
        ),
        ProfileQuestion::choice(
            "wearable",
            "Which wearable will you use?",
            &["Oura", "Whoop", "Apple Watch", "Garmin", "Fitbit"],
        ),
        ProfileQuestion::choice(
            "primary_goal",
            "What do you most want to improve?",
            &["Sleep", "Stress", "Energy", "Recovery"],
        ),
    ]
}

fn profile_questions_valid(questions: &[ProfileQuestion]) -> bool {
    let mut seen = HashSet::new();
    !questions.is_empty()
        && questions
            .iter()
            .all(|q| q.is_well_formed() && seen.insert(q.id.as_str()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Compliance settings applied to newly created studies.
    pub compliance: StudyComplianceConfig,
    pub alerts: AlertSettings,
    pub simulation: SimulationSettings,
    pub profile_questions: Vec<ProfileQuestion>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            compliance: StudyComplianceConfig::default(),
            alerts: AlertSettings::default(),
            simulation: SimulationSettings::default(),
            profile_questions: default_profile_questions(),
        }
    }
}

impl AppConfig {
    /// Parse a JSON config. Anything malformed falls back to defaults:
    /// the whole file when it does not parse, otherwise section by section.
    pub fn from_json(raw: &str) -> Self {
        let parsed: AppConfig = match serde_json::from_str(raw) {
            Ok(config) => config,
            Err(err) => {
                warn!("config does not parse, using defaults: {err}");
                return Self::default();
            }
        };
        parsed.sanitized()
    }

    /// Load from `path` when given. A missing or unreadable file yields defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                debug!("loading config from {}", path.display());
                Self::from_json(&raw)
            }
            Err(err) => {
                warn!("cannot read config {}: {err}; using defaults", path.display());
                Self::default()
            }
        }
    }

    fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if let Err(err) = self.compliance.validate() {
            warn!("invalid compliance config ({err}); using defaults");
            self.compliance = defaults.compliance;
        }
        if let Err(err) = self.alerts.validate() {
            warn!("invalid alert config ({err}); using defaults");
            self.alerts = defaults.alerts;
        }
        if let Err(err) = self.simulation.validate() {
            warn!("invalid simulation config ({err}); using defaults");
            self.simulation = defaults.simulation;
        }
        if !profile_questions_valid(&self.profile_questions) {
            warn!("malformed profile questions; using defaults");
            self.profile_questions = defaults.profile_questions;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_compliance_config_is_valid() {
        assert!(StudyComplianceConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_decreasing_thresholds() {
        let config = StudyComplianceConfig {
            total_lifelines: 5,
            at_risk_threshold: 2,
            critical_threshold: 2,
            ..StudyComplianceConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ThresholdOrder {
                total: 5,
                at_risk: 2,
                critical: 2
            })
        );
    }

    #[test]
    fn rejects_zero_critical_threshold() {
        let config = StudyComplianceConfig {
            critical_threshold: 0,
            ..StudyComplianceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_total_not_above_at_risk() {
        let config = StudyComplianceConfig {
            total_lifelines: 4,
            ..StudyComplianceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_target() {
        let config = StudyComplianceConfig {
            target_compliance_percent: 120.0,
            ..StudyComplianceConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TargetPercent(120.0)));
    }

    #[test]
    fn garbage_json_falls_back_to_defaults() {
        assert_eq!(AppConfig::from_json("{ not json"), AppConfig::default());
    }

    #[test]
    fn partial_json_keeps_valid_sections() {
        let config = AppConfig::from_json(
            r#"{
                "compliance": { "total_lifelines": 10, "at_risk_threshold": 5, "critical_threshold": 2 },
                "profile_questions": [ { "id": "", "prompt": "Blank id", "kind": "text" } ]
            }"#,
        );
        assert_eq!(config.compliance.total_lifelines, 10);
        assert_eq!(config.compliance.target_compliance_percent, 85.0);
        assert_eq!(config.profile_questions, default_profile_questions());
    }

    #[test]
    fn invalid_compliance_section_is_replaced() {
        let config = AppConfig::from_json(
            r#"{ "compliance": { "total_lifelines": 3, "at_risk_threshold": 4, "critical_threshold": 2 } }"#,
        );
        assert_eq!(config.compliance, StudyComplianceConfig::default());
    }

    #[test]
    fn choice_questions_need_options() {
        let config = AppConfig::from_json(
            r#"{ "profile_questions": [ { "id": "goal", "prompt": "Goal?", "kind": "single_choice" } ] }"#,
        );
        assert_eq!(config.profile_questions, default_profile_questions());
    }

    #[test]
    fn answers_are_checked_by_question_kind() {
        let sleep = ProfileQuestion {
            id: "sleep_hours".to_string(),
            prompt: "Hours of sleep?".to_string(),
            kind: QuestionKind::Number,
            options: Vec::new(),
        };
        assert!(sleep.accepts("7.5"));
        assert!(!sleep.accepts("seven"));
        assert!(!sleep.accepts("NaN"));

        let wearable = &default_profile_questions()[1];
        assert!(wearable.accepts("Apple Watch"));
        assert!(!wearable.accepts("Pebble"));
        assert!(wearable.accepts("  "));

        let goals = ProfileQuestion {
            kind: QuestionKind::MultiChoice,
            ..default_profile_questions()[2].clone()
        };
        assert!(goals.accepts("Sleep; Stress"));
        assert!(!goals.accepts("Sleep;Focus"));
    }

    #[test]
    fn duplicate_question_ids_are_rejected() {
        let config = AppConfig::from_json(
            r#"{ "profile_questions": [
                { "id": "age", "prompt": "Age?", "kind": "number" },
                { "id": "age", "prompt": "Age again?", "kind": "number" }
            ] }"#,
        );
        assert_eq!(config.profile_questions, default_profile_questions());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(AppConfig::load_or_default(Some(&path)), AppConfig::default());
        assert_eq!(AppConfig::load_or_default(None), AppConfig::default());
    }
}
