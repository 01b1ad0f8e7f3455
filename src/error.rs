//! Error kinds per SPEC_FULL.md §7.
//!
//! `AppError` carries true failures. Gate rejections that are an expected
//! part of the decision pipeline (throttle/spread/deadband/min-hold) are
//! modeled separately as `RiskRejection` so call sites can't accidentally
//! log a routine skip as an application error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid market data: {0}")]
    InvalidMarketData(String),

    #[error("config value out of range for {key}, using default: {reason}")]
    ConfigOutOfRange { key: String, reason: String },

    #[error("order placement failed for {order_id}: {reason}")]
    OrderPlacementFailed { order_id: String, reason: String },

    #[error("market feed disconnected: {0}")]
    FeedDisconnected(String),

    #[error("backtest has no data for session(s): {0}")]
    BacktestNoData(String),

    #[error("optimizer phase {phase} exceeds combination cap ({count} > {cap})")]
    OptimizerCombinationCap {
        phase: String,
        count: usize,
        cap: usize,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// A position/cash clamp applied instead of failing the action outright.
/// Not an error: the action still executes, just at reduced size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    pub requested: f64,
    pub allowed: f64,
}

/// Expected "no action" outcomes from the Risk Validator (SPEC_FULL.md §4.4, §7).
/// Distinct from `AppError`: these are not failures, just gated decisions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskRejection {
    #[error("throttled: {reason}")]
    Throttled { reason: String },

    #[error("gated by spread: {reason}")]
    GatedBySpread { reason: String },

    #[error("gated by deadband: {reason}")]
    GatedByDeadband { reason: String },

    #[error("gated by min-hold: {reason}")]
    GatedByMinHold { reason: String },
}

impl RiskRejection {
    pub fn reason(&self) -> &str {
        match self {
            RiskRejection::Throttled { reason }
            | RiskRejection::GatedBySpread { reason }
            | RiskRejection::GatedByDeadband { reason }
            | RiskRejection::GatedByMinHold { reason } => reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: format an OrderPlacementFailed error.
    /// Expected: Display output includes order id and reason.
    #[test]
    fn test_order_placement_failed_display() {
        let e = AppError::OrderPlacementFailed {
            order_id: "o1".into(),
            reason: "timeout".into(),
        };
        let s = e.to_string();
        assert!(s.contains("o1"));
        assert!(s.contains("timeout"));
    }

    /// Scenario: RiskRejection variants expose their reason via a common accessor.
    /// Expected: reason() returns the embedded string for every variant.
    #[test]
    fn test_risk_rejection_reason() {
        let r = RiskRejection::GatedByDeadband {
            reason: "in deadband".into(),
        };
        assert_eq!(r.reason(), "in deadband");
    }
}
