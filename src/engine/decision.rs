//! Unwind-first Decision Engine, SPEC_FULL.md §4.5.

use crate::config::ExposureConfig;
use crate::engine::exposure::ExposureResult;
use crate::types::{Direction, Outcome, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct TradeAction {
    pub side: Side,
    pub outcome: Outcome,
    pub quantity: f64,
    pub is_unwind: bool,
    pub target_direction: Direction,
    /// Short tag explaining why this action fired: unwind vs. build, and
    /// toward which direction (SPEC_FULL.md §3, §4.5).
    pub reason: String,
}

fn classify_direction(q_star: f64, q_step: f64) -> Direction {
    if q_star > q_step {
        Direction::LongYes
    } else if q_star < -q_step {
        Direction::LongNo
    } else {
        Direction::Flat
    }
}

/// Decides at most one trade action given the current exposure result and
/// held positions. Unwind always strictly precedes build: a single call
/// never emits both (SPEC_FULL.md §4.5, §8 invariant 6).
pub fn decide(
    cfg: &ExposureConfig,
    exposure: &ExposureResult,
    inv_yes: f64,
    inv_no: f64,
) -> Option<TradeAction> {
    if !exposure.should_act {
        return None;
    }

    let target_direction = classify_direction(exposure.q_star, cfg.q_step);

    if exposure.dq > 0.0 {
        if inv_no > 0.0 {
            return Some(TradeAction {
                side: Side::Sell,
                outcome: Outcome::No,
                quantity: inv_no.min(exposure.dq.abs()),
                is_unwind: true,
                target_direction,
                reason: "unwind: sell NO before building toward target exposure".to_string(),
            });
        }
        return Some(TradeAction {
            side: Side::Buy,
            outcome: Outcome::Yes,
            quantity: cfg.q_step.min(exposure.dq.abs()),
            is_unwind: false,
            target_direction,
            reason: "build: buy YES toward target exposure".to_string(),
        });
    }

    if exposure.dq < 0.0 {
        if inv_yes > 0.0 {
            return Some(TradeAction {
                side: Side::Sell,
                outcome: Outcome::Yes,
                quantity: inv_yes.min(exposure.dq.abs()),
                is_unwind: true,
                target_direction,
                reason: "unwind: sell YES before building toward target exposure".to_string(),
            });
        }
        return Some(TradeAction {
            side: Side::Buy,
            outcome: Outcome::No,
            quantity: cfg.q_step.min(exposure.dq.abs()),
            is_unwind: false,
            target_direction,
            reason: "build: buy NO toward target exposure".to_string(),
        });
    }

    None
}
