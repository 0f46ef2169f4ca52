//! Admin alerts derived from study health.
//!
//! [`assess`] grades each health dimension of a study against fixed bands.
//! [`AlertBook`] turns those readings into alerts and owns the
//! acknowledgement lifecycle: an acknowledged alert stays silent until its
//! dimension has read `good` for `clear_cycles` consecutive refreshes, after
//! which a recurrence raises a brand new alert.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::{RecruitmentState, ShippingState, StudyComplianceStats, StudyState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIndicator {
    Good,
    Warning,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Compliance,
    Retention,
    Shipping,
    Recruitment,
}

impl AlertCategory {
    pub fn label(self) -> &'static str {
        match self {
            AlertCategory::Compliance => "compliance",
            AlertCategory::Retention => "retention",
            AlertCategory::Shipping => "shipping",
            AlertCategory::Recruitment => "recruitment",
        }
    }

    fn recommended_actions(self) -> Vec<String> {
        let actions: &[&str] = match self {
            AlertCategory::Compliance => &[
                "Send a check-in reminder to at-risk participants",
                "Review wearable sync failures with support",
            ],
            AlertCategory::Retention => &[
                "Contact critical-tier participants before their last lifeline",
                "Consider a larger lifeline budget for new enrollees",
            ],
            AlertCategory::Shipping => &[
                "Escalate delayed kits with the fulfillment partner",
                "Hold the next cohort start until kits are delivered",
            ],
            AlertCategory::Recruitment => &[
                "Extend the recruitment window",
                "Boost the study listing with a heartbeats bonus",
            ],
        };
        actions.iter().map(|a| a.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// `good` and `warning` limits for one metric. Values on the good side of
/// `good` read good, values up to `warning` read warning, the rest poor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthBand {
    pub good: f64,
    pub warning: f64,
    pub direction: BandDirection,
}

impl HealthBand {
    pub fn higher(good: f64, warning: f64) -> Self {
        Self {
            good,
            warning,
            direction: BandDirection::HigherIsBetter,
        }
    }

    pub fn lower(good: f64, warning: f64) -> Self {
        Self {
            good,
            warning,
            direction: BandDirection::LowerIsBetter,
        }
    }

    fn width(&self) -> f64 {
        (self.good - self.warning).abs()
    }

    /// Distance past `good` on the bad side, zero when good.
    fn shortfall(&self, value: f64) -> f64 {
        let gap = match self.direction {
            BandDirection::HigherIsBetter => self.good - value,
            BandDirection::LowerIsBetter => value - self.good,
        };
        gap.max(0.0)
    }

    pub fn indicator(&self, value: f64) -> HealthIndicator {
        let shortfall = self.shortfall(value);
        if shortfall <= 0.0 {
            HealthIndicator::Good
        } else if shortfall <= self.width() {
            HealthIndicator::Warning
        } else {
            HealthIndicator::Poor
        }
    }

    /// Warning readings are `low` in the first half of the band and `medium`
    /// beyond it. Poor readings are `high`, or `critical` once they overshoot
    /// the warning limit by more than the band width.
    pub fn severity(&self, value: f64) -> Option<AlertSeverity> {
        let shortfall = self.shortfall(value);
        let width = self.width();
        match self.indicator(value) {
            HealthIndicator::Good => None,
            HealthIndicator::Warning if shortfall <= width / 2.0 => Some(AlertSeverity::Low),
            HealthIndicator::Warning => Some(AlertSeverity::Medium),
            HealthIndicator::Poor if shortfall - width > width => Some(AlertSeverity::Critical),
            HealthIndicator::Poor => Some(AlertSeverity::High),
        }
    }

    fn validate(&self, category: &'static str) -> Result<(), ConfigError> {
        let ordered = match self.direction {
            BandDirection::HigherIsBetter => self.good > self.warning,
            BandDirection::LowerIsBetter => self.good < self.warning,
        };
        if ordered {
            Ok(())
        } else {
            Err(ConfigError::InvertedBand {
                category,
                good: self.good,
                warning: self.warning,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Compliance reads warning down to this many points under the study target.
    pub compliance_warning_margin: f64,
    /// Withdrawn share of participants, percent.
    pub retention: HealthBand,
    /// Delayed share of shipped kits, percent.
    pub shipping: HealthBand,
    /// Enrolled share of the recruitment target, percent.
    pub recruitment: HealthBand,
    /// Consecutive good refreshes before an acknowledged alert is released.
    pub clear_cycles: u32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            compliance_warning_margin: 15.0,
            retention: HealthBand::lower(10.0, 20.0),
            shipping: HealthBand::lower(5.0, 15.0),
            recruitment: HealthBand::higher(80.0, 50.0),
            clear_cycles: 1,
        }
    }
}

impl AlertSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        HealthBand::higher(100.0, 100.0 - self.compliance_warning_margin).validate("compliance")?;
        self.retention.validate("retention")?;
        self.shipping.validate("shipping")?;
        self.recruitment.validate("recruitment")?;
        if self.clear_cycles == 0 {
            return Err(ConfigError::ClearCycles);
        }
        Ok(())
    }
}

/// Inputs for one study's health assessment.
#[derive(Debug, Clone, Copy)]
pub struct StudyHealth<'a> {
    pub study_id: &'a str,
    pub brand: &'a str,
    pub target_compliance_percent: f64,
    pub stats: &'a StudyComplianceStats,
    pub shipping: ShippingState,
    pub recruitment: RecruitmentState,
}

impl<'a> StudyHealth<'a> {
    pub fn new(study: &'a StudyState, stats: &'a StudyComplianceStats) -> Self {
        Self {
            study_id: &study.study_id,
            brand: &study.brand,
            target_compliance_percent: study.config.target_compliance_percent,
            stats,
            shipping: study.shipping,
            recruitment: study.recruitment,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReading {
    pub category: AlertCategory,
    pub indicator: HealthIndicator,
    pub severity: Option<AlertSeverity>,
    /// `None` when there is nothing to measure yet; such readings are good.
    pub value: Option<f64>,
    pub message: String,
}

fn read(category: AlertCategory, band: HealthBand, value: Option<f64>, message: String) -> HealthReading {
    match value {
        Some(value) => HealthReading {
            category,
            indicator: band.indicator(value),
            severity: band.severity(value),
            value: Some(value),
            message,
        },
        None => HealthReading {
            category,
            indicator: HealthIndicator::Good,
            severity: None,
            value: None,
            message,
        },
    }
}

/// Grades every health dimension of a study. Always returns one reading per category.
pub fn assess(health: &StudyHealth<'_>, settings: &AlertSettings) -> Vec<HealthReading> {
    let target = health.target_compliance_percent;
    let compliance = health.stats.overall_compliance_percent;
    let compliance_band = HealthBand::higher(target, target - settings.compliance_warning_margin);

    // Retention reads the worse of the study as a whole and its weakest cohort.
    let study_withdrawn =
        (health.stats.total_participants > 0).then(|| health.stats.withdrawn_percent());
    let weakest_cohort = health
        .stats
        .cohorts
        .iter()
        .filter(|cohort| cohort.participants > 0)
        .max_by(|a, b| a.withdrawn_percent().total_cmp(&b.withdrawn_percent()));
    let (withdrawn, retention_message) = match weakest_cohort {
        Some(cohort)
            if study_withdrawn.map_or(true, |overall| cohort.withdrawn_percent() > overall) =>
        {
            (
                Some(cohort.withdrawn_percent()),
                format!(
                    "{:.1}% of cohort {} withdrawn ({} of {})",
                    cohort.withdrawn_percent(),
                    cohort.cohort,
                    cohort.withdrawn,
                    cohort.participants
                ),
            )
        }
        _ => (
            study_withdrawn,
            format!(
                "{:.1}% of participants withdrawn ({} of {})",
                study_withdrawn.unwrap_or(0.0),
                health.stats.withdrawn,
                health.stats.total_participants
            ),
        ),
    };

    let shipping = health.shipping;
    let delayed = (shipping.shipped > 0)
        .then(|| f64::from(shipping.delayed) / f64::from(shipping.shipped) * 100.0);

    let recruitment = health.recruitment;
    let filled = (recruitment.open && recruitment.target > 0)
        .then(|| f64::from(recruitment.enrolled) / f64::from(recruitment.target) * 100.0);

    vec![
        read(
            AlertCategory::Compliance,
            compliance_band,
            compliance,
            format!(
                "Compliance at {:.1}% against a {:.0}% target",
                compliance.unwrap_or(0.0),
                target
            ),
        ),
        read(
            AlertCategory::Retention,
            settings.retention,
            withdrawn,
            retention_message,
        ),
        read(
            AlertCategory::Shipping,
            settings.shipping,
            delayed,
            format!(
                "{:.1}% of shipped kits delayed ({} of {})",
                delayed.unwrap_or(0.0),
                shipping.delayed,
                shipping.shipped
            ),
        ),
        read(
            AlertCategory::Recruitment,
            settings.recruitment,
            filled,
            format!(
                "Enrollment at {:.1}% of target ({} of {})",
                filled.unwrap_or(0.0),
                recruitment.enrolled,
                recruitment.target
            ),
        ),
    ]
}

/// The readings that warrant an alert.
pub fn derive_alerts(health: &StudyHealth<'_>, settings: &AlertSettings) -> Vec<HealthReading> {
    assess(health, settings)
        .into_iter()
        .filter(|reading| reading.indicator != HealthIndicator::Good)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAlert {
    pub id: Uuid,
    pub study_id: String,
    pub brand: String,
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    pub indicator: HealthIndicator,
    pub value: f64,
    pub message: String,
    pub recommended_actions: Vec<String>,
    pub raised_at: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AlertSlot {
    alert: AdminAlert,
    /// Consecutive good refreshes since acknowledgement.
    good_streak: u32,
}

/// Open alerts keyed by study and category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertBook {
    slots: BTreeMap<String, BTreeMap<AlertCategory, AlertSlot>>,
    /// Fingerprint of the study state each study was last assessed against.
    #[serde(default)]
    assessed: BTreeMap<String, u32>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one study's readings into the book.
    pub fn refresh(
        &mut self,
        study_id: &str,
        brand: &str,
        readings: &[HealthReading],
        clear_cycles: u32,
        now: DateTime<Utc>,
    ) {
        let slots = self.slots.entry(study_id.to_string()).or_default();

        for reading in readings {
            let (Some(value), Some(severity)) = (reading.value, reading.severity) else {
                Self::record_good(slots, reading.category, clear_cycles);
                continue;
            };

            match slots.get_mut(&reading.category) {
                Some(slot) => {
                    slot.good_streak = 0;
                    slot.alert.severity = severity;
                    slot.alert.indicator = reading.indicator;
                    slot.alert.value = value;
                    slot.alert.message = reading.message.clone();
                }
                None => {
                    let alert = AdminAlert {
                        id: Uuid::new_v4(),
                        study_id: study_id.to_string(),
                        brand: brand.to_string(),
                        category: reading.category,
                        severity,
                        indicator: reading.indicator,
                        value,
                        message: reading.message.clone(),
                        recommended_actions: reading.category.recommended_actions(),
                        raised_at: now,
                        acknowledged: false,
                    };
                    info!(
                        study = study_id,
                        category = reading.category.label(),
                        ?severity,
                        "raised alert {}",
                        alert.id
                    );
                    slots.insert(
                        reading.category,
                        AlertSlot {
                            alert,
                            good_streak: 0,
                        },
                    );
                }
            }
        }

        if slots.is_empty() {
            self.slots.remove(study_id);
        }
    }

    fn record_good(
        slots: &mut BTreeMap<AlertCategory, AlertSlot>,
        category: AlertCategory,
        clear_cycles: u32,
    ) {
        let Some(slot) = slots.get_mut(&category) else {
            return;
        };
        if slot.alert.acknowledged {
            slot.good_streak += 1;
            if slot.good_streak < clear_cycles.max(1) {
                return;
            }
        }
        debug!(study = %slot.alert.study_id, category = category.label(), "condition cleared");
        slots.remove(&category);
    }

    /// Marks an alert acknowledged. Returns false for unknown ids.
    pub fn acknowledge(&mut self, alert_id: Uuid) -> bool {
        for slots in self.slots.values_mut() {
            for slot in slots.values_mut() {
                if slot.alert.id == alert_id {
                    slot.alert.acknowledged = true;
                    slot.good_streak = 0;
                    return true;
                }
            }
        }
        false
    }

    /// Unacknowledged alerts, most severe first.
    pub fn active(&self) -> Vec<&AdminAlert> {
        let mut alerts: Vec<&AdminAlert> = self
            .all()
            .filter(|alert| !alert.acknowledged)
            .collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.study_id.cmp(&b.study_id))
                .then_with(|| a.category.cmp(&b.category))
        });
        alerts
    }

    pub fn all(&self) -> impl Iterator<Item = &AdminAlert> {
        self.slots
            .values()
            .flat_map(|slots| slots.values().map(|slot| &slot.alert))
    }

    pub fn for_study(&self, study_id: &str) -> Vec<&AdminAlert> {
        self.slots
            .get(study_id)
            .map(|slots| slots.values().map(|slot| &slot.alert).collect())
            .unwrap_or_default()
    }

    pub fn last_assessed(&self, study_id: &str) -> Option<u32> {
        self.assessed.get(study_id).copied()
    }

    pub fn mark_assessed(&mut self, study_id: &str, fingerprint: u32) {
        self.assessed.insert(study_id.to_string(), fingerprint);
    }

    pub fn forget_study(&mut self, study_id: &str) {
        self.slots.remove(study_id);
        self.assessed.remove(study_id);
    }
}
