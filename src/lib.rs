//! Deterministic compliance engine for rebate studies.
//!
//! Participants carry a budget of lifelines; each missed day burns one and an
//! empty budget withdraws them. Study statistics and admin alerts are derived
//! from the participant set on demand.

pub mod alerts;
pub mod compliance;
pub mod config;
pub mod error;
pub mod generator;
pub mod import;
pub mod models;
pub mod report;
pub mod rng;
pub mod store;
pub mod tracker;

pub use alerts::{AdminAlert, AlertBook, AlertCategory, AlertSeverity, HealthIndicator};
pub use config::{AppConfig, StudyComplianceConfig};
pub use error::ConfigError;
pub use models::{ComplianceStatus, ParticipantCompliance, StudyComplianceStats, StudyState};
pub use rng::SeededRandom;
pub use store::{Snapshot, SnapshotStore};
pub use tracker::{ComplianceEvent, ComplianceTracker};
