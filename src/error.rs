//! Error types for the configuration boundary.
//!
//! Tracker events never fail; they are no-ops on unknown ids. Only
//! configuration can be rejected.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Lifeline thresholds must strictly decrease: total > at-risk > critical > 0.
    #[error(
        "lifeline thresholds must satisfy total ({total}) > at_risk ({at_risk}) > critical ({critical}) > 0"
    )]
    ThresholdOrder {
        total: u32,
        at_risk: u32,
        critical: u32,
    },

    #[error("target compliance percent must be in (0, 100], got {0}")]
    TargetPercent(f64),

    /// A health band whose warning limit sits on the wrong side of its good limit.
    #[error("alert band for {category} is inverted (good {good}, warning {warning})")]
    InvertedBand {
        category: &'static str,
        good: f64,
        warning: f64,
    },

    #[error("clear_cycles must be at least 1")]
    ClearCycles,

    #[error("engagement must be in [0, 1], got {0}")]
    Engagement(f64),
}
