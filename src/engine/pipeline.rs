//! Shared decision pipeline, SPEC_FULL.md §2 / §4.13. Generalized from the
//! teacher's `engine/pipeline.rs` + `bin/backtest/engine.rs::BacktestSink`
//! split: a single `process_step` function drives the consensus -> signal
//! -> exposure -> decision -> risk chain, and the only thing that differs
//! between the live bot runtime and the backtest engine is which
//! `DecisionSink` implementation receives the resulting side effects.

use crate::config::Config;
use crate::engine::decision::{self, TradeAction};
use crate::engine::exposure;
use crate::engine::risk::{self, ActionKind};
use crate::engine::signal::{self, SignalOutput};
use crate::engine::state::BotStrategyState;
use crate::error::RiskRejection;
use crate::market::consensus::{self, ConsensusPrice};
use crate::types::{Direction, OrderBookSnapshot, Outcome};

/// Side-effect boundary between the shared pipeline and its caller. The
/// live bot runtime dispatches these over async channels to the order
/// gateway and telemetry; the backtest engine records them directly into
/// in-memory vectors. Named after the teacher's `SignalSink` trait.
pub trait DecisionSink {
    /// Called once per evaluated step, regardless of whether a trade action
    /// was emitted. Useful for metric-sample recording.
    fn on_signal(&mut self, signal: &SignalOutput, consensus: &ConsensusPrice, now_ms: i64);

    /// Called when a trade action clears the risk validator and is ready to
    /// be priced and submitted.
    fn on_action(&mut self, action: &TradeAction, now_ms: i64);

    /// Called whenever the risk validator rejects a proposed action.
    fn on_rejected(&mut self, rejection: &RiskRejection, now_ms: i64) {
        let _ = rejection;
        let _ = now_ms;
    }
}

fn target_direction_for(action: &TradeAction) -> Direction {
    action.target_direction
}

/// Runs one full pipeline step for a single bot: consensus price, signal,
/// exposure, decision, then risk validation, dispatching outcomes to the
/// given sink. Returns the computed signal for callers that need it (e.g.
/// metrics), independent of whether an action was taken.
pub fn process_step<S: DecisionSink>(
    cfg: &Config,
    state: &mut BotStrategyState,
    snapshot: &OrderBookSnapshot,
    inv_yes: f64,
    inv_no: f64,
    time_to_resolution_minutes: f64,
    now_ms: i64,
    sink: &mut S,
) -> SignalOutput {
    let snapshot = snapshot.correct_inversions();
    let cp: ConsensusPrice = consensus::consensus_price(&snapshot);

    let sig = signal::evaluate_signal(
        &cfg.signal,
        state,
        cp.p,
        cp.spread_c,
        time_to_resolution_minutes,
        now_ms,
    );

    sink.on_signal(&sig, &cp, now_ms);

    if sig.in_deadband {
        let reason = format!(
            "|d|={:.4} and |a|={:.4} below deadband thresholds",
            sig.d.abs(),
            sig.a.abs()
        );
        sink.on_rejected(&RiskRejection::GatedByDeadband { reason }, now_ms);
        return sig;
    }

    let exp = exposure::compute_exposure(
        &cfg.exposure,
        sig.edge,
        cp.p,
        inv_yes,
        inv_no,
        time_to_resolution_minutes,
    );

    let Some(action) = decision::decide(&cfg.exposure, &exp, inv_yes, inv_no) else {
        return sig;
    };

    let action_kind = if action.is_unwind {
        ActionKind::RiskReducing
    } else {
        ActionKind::Expansion {
            target_direction: target_direction_for(&action),
        }
    };

    match risk::validate(&cfg.risk, state, cp.spread_c, now_ms, action_kind) {
        Ok(()) => {
            state.last_decision_time_ms = Some(now_ms);
            if !action.is_unwind {
                state.set_direction(action.target_direction, now_ms);
            } else if exp.q_star == 0.0 {
                state.set_direction(Direction::Flat, now_ms);
            }
            sink.on_action(&action, now_ms);
        }
        Err(rejection) => {
            sink.on_rejected(&rejection, now_ms);
        }
    }

    sig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome as Out;

    #[derive(Default)]
    struct RecordingSink {
        actions: Vec<TradeAction>,
        rejections: Vec<RiskRejection>,
        signals: usize,
    }

    impl DecisionSink for RecordingSink {
        fn on_signal(&mut self, _signal: &SignalOutput, _consensus: &ConsensusPrice, _now_ms: i64) {
            self.signals += 1;
        }
        fn on_action(&mut self, action: &TradeAction, _now_ms: i64) {
            self.actions.push(action.clone());
        }
        fn on_rejected(&mut self, rejection: &RiskRejection, _now_ms: i64) {
            self.rejections.push(rejection.clone());
        }
    }

    fn book(yes_bid: f64, yes_ask: f64, no_bid: f64, no_ask: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            ts_ms: 0,
            yes_bid,
            yes_ask,
            no_bid,
            no_ask,
            inverted_corrections: 0,
        }
    }

    /// Scenario: constant p=0.5 snapshots (deadband) fed through the full pipeline.
    /// Expected: on_signal fires every step but no action is ever emitted.
    #[test]
    fn test_pipeline_deadband_emits_no_actions() {
        let cfg = Config::default();
        let mut state = BotStrategyState::default();
        let mut sink = RecordingSink::default();
        for i in 0..30 {
            let snap = book(0.49, 0.51, 0.49, 0.51);
            process_step(&cfg, &mut state, &snap, 0.0, 0.0, 10.0, i * 1000, &mut sink);
        }
        assert_eq!(sink.signals, 30);
        assert!(sink.actions.is_empty());
    }

    /// Scenario: a strongly YES-biased book held for long enough to clear tau, the
    /// exposure hysteresis, and the rebalance-interval/cooldown throttles.
    /// Expected: eventually an action is emitted (not on every single step, due to throttles).
    #[test]
    fn test_pipeline_eventually_acts_on_persistent_bias() {
        let cfg = Config::default();
        let mut state = BotStrategyState::default();
        let mut sink = RecordingSink::default();
        for i in 0..200 {
            let snap = book(0.59, 0.61, 0.38, 0.40);
            process_step(&cfg, &mut state, &snap, 0.0, 0.0, 10.0, i * 1000, &mut sink);
        }
        assert!(!sink.actions.is_empty(), "expected at least one action to be emitted");
        for action in &sink.actions {
            assert_eq!(action.outcome, Out::Yes);
        }
    }

    /// Scenario: an inverted snapshot (yes_bid > yes_ask) is fed to the pipeline.
    /// Expected: the pipeline corrects it internally and does not panic or produce
    /// a negative spread_c.
    #[test]
    fn test_pipeline_corrects_inverted_snapshot() {
        let cfg = Config::default();
        let mut state = BotStrategyState::default();
        let mut sink = RecordingSink::default();
        let snap = book(0.55, 0.50, 0.40, 0.42);
        process_step(&cfg, &mut state, &snap, 0.0, 0.0, 10.0, 0, &mut sink);
        assert_eq!(sink.signals, 1);
    }
}
