//! Risk Validator, SPEC_FULL.md §4.4. Grounded on the teacher's
//! `StrategyRiskManager::check_strategy()` ordered-gate-chain pattern:
//! throttles, then spread, then min-hold, each independently rejecting
//! with no exceptions.

use tracing::debug;

use crate::config::RiskConfig;
use crate::engine::state::BotStrategyState;
use crate::error::RiskRejection;
use crate::types::Direction;

/// Whether the proposed action reduces risk (an unwind) or is a flatten to
/// the already-current direction; such actions are exempt from min-hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Expansion { target_direction: Direction },
    RiskReducing,
}

/// Runs the three-gate chain in order (throttles -> spread -> min-hold).
/// Returns `Ok(())` if the action may proceed, `Err(RiskRejection)` with the
/// specific gate and reason otherwise (SPEC_FULL.md §4.4).
pub fn validate(
    cfg: &RiskConfig,
    state: &BotStrategyState,
    spread_c: f64,
    now_ms: i64,
    action: ActionKind,
) -> Result<(), RiskRejection> {
    // Gate 1: throttles.
    if let Some(last_decision) = state.last_decision_time_ms {
        let elapsed_s = (now_ms - last_decision).max(0) as f64 / 1000.0;
        if elapsed_s < cfg.rebalance_interval_s {
            let reason = format!(
                "rebalance_interval not elapsed: {:.3}s < {:.3}s",
                elapsed_s, cfg.rebalance_interval_s
            );
            debug!(reason = %reason, "risk gate: throttled");
            return Err(RiskRejection::Throttled { reason });
        }
    }
    if let Some(last_fill) = state.last_fill_time_ms {
        let elapsed_s = (now_ms - last_fill).max(0) as f64 / 1000.0;
        if elapsed_s < cfg.cooldown_s {
            let reason = format!(
                "cooldown not elapsed: {:.3}s < {:.3}s",
                elapsed_s, cfg.cooldown_s
            );
            debug!(reason = %reason, "risk gate: throttled");
            return Err(RiskRejection::Throttled { reason });
        }
    }

    // Gate 2: spread.
    if spread_c > cfg.spread_halt {
        let reason = format!("spread_c {:.4} > spread_halt {:.4}", spread_c, cfg.spread_halt);
        debug!(reason = %reason, "risk gate: spread halt");
        return Err(RiskRejection::GatedBySpread { reason });
    }
    let is_expansion = matches!(action, ActionKind::Expansion { .. });
    if is_expansion && spread_c > cfg.spread_max_entry {
        let reason = format!(
            "spread_c {:.4} > spread_max_entry {:.4} on expansion",
            spread_c, cfg.spread_max_entry
        );
        debug!(reason = %reason, "risk gate: spread entry");
        return Err(RiskRejection::GatedBySpread { reason });
    }

    // Gate 3: min-hold.
    if let ActionKind::Expansion { target_direction } = action {
        let is_same_or_flat = state.current_direction == Direction::Flat
            || state.current_direction == target_direction;
        if !is_same_or_flat {
            if let Some(changed_at) = state.last_direction_change_time_ms {
                let elapsed_s = (now_ms - changed_at).max(0) as f64 / 1000.0;
                if elapsed_s < cfg.min_hold_s {
                    let reason = format!(
                        "min_hold not elapsed: {:.3}s < {:.3}s",
                        elapsed_s, cfg.min_hold_s
                    );
                    debug!(reason = %reason, "risk gate: min-hold");
                    return Err(RiskRejection::GatedByMinHold { reason });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RiskConfig {
        RiskConfig::default()
    }

    /// Scenario: a decision is attempted 0.5s after the last decision (rebalance_interval_s=2.0).
    /// Expected: rejected as Throttled.
    #[test]
    fn test_throttle_rejects_too_soon() {
        let c = cfg();
        let mut state = BotStrategyState::default();
        state.last_decision_time_ms = Some(1000);
        let result = validate(&c, &state, 0.01, 1500, ActionKind::RiskReducing);
        assert!(matches!(result, Err(RiskRejection::Throttled { .. })));
    }

    /// Scenario: spread_c exceeds spread_halt entirely.
    /// Expected: rejected as GatedBySpread, even for a risk-reducing action.
    #[test]
    fn test_spread_halt_blocks_everything() {
        let c = cfg();
        let state = BotStrategyState::default();
        let result = validate(&c, &state, 0.10, 10_000, ActionKind::RiskReducing);
        assert!(matches!(result, Err(RiskRejection::GatedBySpread { .. })));
    }

    /// Scenario: spread_c between spread_max_entry and spread_halt on a risk-reducing action.
    /// Expected: allowed through (only expansions are blocked at this tier).
    #[test]
    fn test_moderate_spread_allows_risk_reducing() {
        let c = cfg();
        let state = BotStrategyState::default();
        let result = validate(&c, &state, 0.03, 10_000, ActionKind::RiskReducing);
        assert!(result.is_ok());
    }

    /// Scenario: direction change 5s ago (min_hold_s=15.0), now attempting an opposite expansion.
    /// Expected: rejected as GatedByMinHold (SPEC_FULL.md §8 scenario 3).
    #[test]
    fn test_min_hold_blocks_opposite_expansion() {
        let c = cfg();
        let mut state = BotStrategyState::default();
        state.current_direction = Direction::LongYes;
        state.last_direction_change_time_ms = Some(0);
        let result = validate(
            &c,
            &state,
            0.01,
            5_000,
            ActionKind::Expansion {
                target_direction: Direction::LongNo,
            },
        );
        assert!(matches!(result, Err(RiskRejection::GatedByMinHold { .. })));
    }

    /// Scenario: same setup as above but after min_hold_s has elapsed.
    /// Expected: allowed through.
    #[test]
    fn test_min_hold_allows_after_elapsed() {
        let c = cfg();
        let mut state = BotStrategyState::default();
        state.current_direction = Direction::LongYes;
        state.last_direction_change_time_ms = Some(0);
        let result = validate(
            &c,
            &state,
            0.01,
            16_000,
            ActionKind::Expansion {
                target_direction: Direction::LongNo,
            },
        );
        assert!(result.is_ok());
    }
}
