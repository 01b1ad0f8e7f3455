//! Live per-bot runtime loop, SPEC_FULL.md §4.10. Grounded on the teacher's
//! `engine/runner.rs` per-bot task: a single-writer loop that owns its
//! strategy state and pending-order set, dispatches decided actions to an
//! `OrderGateway`, and applies fill confirmations back onto its positions.
//! Unlike the teacher's `run_engine` (which owns its own feed/channel
//! wiring end to end), this module only owns the per-event step; the
//! caller is responsible for driving it from whatever `MarketFeed` it has
//! (SPEC_FULL.md §6 keeps that collaborator a thin trait boundary).

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::decision::TradeAction;
use crate::engine::pipeline::{self, DecisionSink};
use crate::engine::signal::SignalOutput;
use crate::engine::signal_factory;
use crate::engine::state::BotStrategyState;
use crate::error::RiskRejection;
use crate::gateway::{GatewayError, OrderGateway, Repository};
use crate::market::consensus::ConsensusPrice;
use crate::types::{BotId, Outcome, OrderBookSnapshot, Position, Side, StrategyMetricSample, Trade};

const MAX_PLACEMENT_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 50;

/// A resting order this bot has submitted and is still tracking locally,
/// keyed by the id the gateway handed back from `place_limit`.
#[derive(Debug, Clone, PartialEq)]
struct PendingOrder {
    gateway_order_id: u64,
    side: Side,
    outcome: Outcome,
    price: f64,
    quantity: f64,
    filled_quantity: f64,
    created_at_ms: i64,
    reason: String,
}

impl PendingOrder {
    fn remaining(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }
}

/// Sink that records the pipeline's outcome for this step without owning
/// any of the side effects; the runtime drives gateway submission itself,
/// mirroring the backtest engine's `ActionRecorder` split (SPEC_FULL.md
/// §4.8, §4.10).
#[derive(Default)]
struct StepRecorder {
    action: Option<TradeAction>,
    last_signal: Option<SignalOutput>,
    last_consensus: Option<ConsensusPrice>,
    rejection: Option<RiskRejection>,
}

impl DecisionSink for StepRecorder {
    fn on_signal(&mut self, signal: &SignalOutput, consensus: &ConsensusPrice, _now_ms: i64) {
        self.last_signal = Some(*signal);
        self.last_consensus = Some(*consensus);
    }

    fn on_action(&mut self, action: &TradeAction, _now_ms: i64) {
        self.action = Some(action.clone());
    }

    fn on_rejected(&mut self, rejection: &RiskRejection, _now_ms: i64) {
        self.rejection = Some(rejection.clone());
    }
}

/// Outcome of one `on_snapshot` call, surfaced to the caller for logging or
/// telemetry fan-out beyond what the `Repository` already recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No action was decided (deadband, throttle, or hysteresis flattened to zero).
    NoAction,
    /// A decided action was rejected by the risk validator.
    Rejected(RiskRejection),
    /// An action was decided and submitted to the gateway.
    Submitted { order_id: u64, action: TradeAction },
    /// An action was decided but placement failed after retries; the bot continues.
    PlacementFailed { action: TradeAction, reason: String },
}

/// Owns one bot's live strategy state, filled positions, and resting
/// orders. Single-writer: only the task driving this bot may call its
/// methods (SPEC_FULL.md §5).
pub struct BotRuntime {
    pub bot_id: BotId,
    pub config: Config,
    pub state: BotStrategyState,
    positions: HashMap<Outcome, Position>,
    pending: Vec<PendingOrder>,
}

impl BotRuntime {
    pub fn new(bot_id: BotId, config: Config) -> Self {
        Self {
            bot_id,
            config,
            state: BotStrategyState::default(),
            positions: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn position(&self, outcome: Outcome) -> Position {
        self.positions.get(&outcome).copied().unwrap_or_default()
    }

    fn filled_size(&self, outcome: Outcome) -> f64 {
        self.position(outcome).size
    }

    /// Shares resting in not-yet-filled orders for one leg (SPEC_FULL.md §4.7
    /// step 2's "pending" concept, reused here for the live position view
    /// the Exposure Manager consumes).
    pub fn pending_size(&self, outcome: Outcome) -> f64 {
        self.pending.iter().filter(|o| o.outcome == outcome).map(|o| o.remaining()).sum()
    }

    /// Runs one full pipeline step for a fresh snapshot or trade event
    /// (SPEC_FULL.md §4.10 steps 1-3): compute the decision, submit it to
    /// the gateway (retrying transient failures with backoff), and record
    /// best-effort telemetry via the repository.
    pub async fn on_snapshot(
        &mut self,
        gateway: &dyn OrderGateway,
        repo: &dyn Repository,
        snapshot: OrderBookSnapshot,
        tick_size: f64,
        market_end_ms: i64,
        now_ms: i64,
    ) -> StepOutcome {
        let snapshot = snapshot.correct_inversions();
        let inv_yes = self.filled_size(Outcome::Yes) + self.pending_size(Outcome::Yes);
        let inv_no = self.filled_size(Outcome::No) + self.pending_size(Outcome::No);

        let time_to_resolution_minutes = if market_end_ms > 0 {
            ((market_end_ms - now_ms).max(0) as f64 / 60_000.0).max(0.0)
        } else {
            15.0
        };

        let mut sink = StepRecorder::default();
        pipeline::process_step(
            &self.config,
            &mut self.state,
            &snapshot,
            inv_yes,
            inv_no,
            time_to_resolution_minutes,
            now_ms,
            &mut sink,
        );

        if let (Some(signal), Some(consensus)) = (sink.last_signal, sink.last_consensus) {
            repo.append_strategy_metric(StrategyMetricSample {
                ts_ms: now_ms,
                tau: signal.tau,
                a: signal.a,
                edge: signal.edge,
                q_star: inv_yes - inv_no,
                theta: signal.theta,
                dbar: signal.dbar,
                consensus_price: consensus.p,
                yes_size: inv_yes,
                no_size: inv_no,
                total_pnl: self.position(Outcome::Yes).realized_pnl + self.position(Outcome::No).realized_pnl,
            })
            .await;
        }

        if let Some(rejection) = sink.rejection {
            debug!(bot_id = %self.bot_id, reason = %rejection.reason(), "step rejected by risk validator");
            return StepOutcome::Rejected(rejection);
        }

        let Some(action) = sink.action else {
            return StepOutcome::NoAction;
        };

        let edge_abs = sink.last_signal.map(|s| s.edge.abs()).unwrap_or(0.0);
        let priced = signal_factory::price_action(&action, &snapshot, tick_size, edge_abs);

        self.submit(gateway, action, priced.price, now_ms).await
    }

    async fn submit(
        &mut self,
        gateway: &dyn OrderGateway,
        action: TradeAction,
        price: f64,
        now_ms: i64,
    ) -> StepOutcome {
        let mut attempt = 0;
        loop {
            match gateway.place_limit(action.side, action.outcome, price, action.quantity).await {
                Ok(gateway_order_id) => {
                    self.pending.push(PendingOrder {
                        gateway_order_id,
                        side: action.side,
                        outcome: action.outcome,
                        price,
                        quantity: action.quantity,
                        filled_quantity: 0.0,
                        created_at_ms: now_ms,
                        reason: action.reason.clone(),
                    });
                    return StepOutcome::Submitted { order_id: gateway_order_id, action };
                }
                Err(GatewayError::Transient(reason)) => {
                    attempt += 1;
                    if attempt >= MAX_PLACEMENT_RETRIES {
                        warn!(bot_id = %self.bot_id, reason = %reason, "order placement failed after retries");
                        return StepOutcome::PlacementFailed { action, reason };
                    }
                    let delay_ms = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(GatewayError::Permanent(reason)) => {
                    warn!(bot_id = %self.bot_id, reason = %reason, "order placement permanently failed");
                    return StepOutcome::PlacementFailed { action, reason };
                }
            }
        }
    }

    /// Applies a fill confirmation from the gateway (SPEC_FULL.md §4.10 step
    /// 3 "On external fill confirmation..."). Partial fills keep the order
    /// pending; `is_final` retires it from the pending set regardless of
    /// remaining quantity (the gateway considers it done).
    pub async fn confirm_fill(
        &mut self,
        repo: &dyn Repository,
        gateway_order_id: u64,
        fill_price: f64,
        fill_qty: f64,
        is_final: bool,
        now_ms: i64,
    ) {
        let Some(idx) = self.pending.iter().position(|o| o.gateway_order_id == gateway_order_id) else {
            warn!(bot_id = %self.bot_id, order_id = gateway_order_id, "fill for unknown pending order");
            return;
        };

        let (side, outcome) = (self.pending[idx].side, self.pending[idx].outcome);
        let reason = self.pending[idx].reason.clone();
        self.pending[idx].filled_quantity = (self.pending[idx].filled_quantity + fill_qty).min(self.pending[idx].quantity);

        let pos = self.positions.entry(outcome).or_default();
        let pnl = match side {
            Side::Buy => {
                pos.apply_buy(fill_price, fill_qty);
                None
            }
            Side::Sell => Some(pos.apply_sell(fill_price, fill_qty)),
        };
        let position_after = *pos;

        self.state.last_fill_time_ms = Some(now_ms);

        repo.append_trade(Trade {
            id: gateway_order_id,
            ts_ms: now_ms,
            side,
            outcome,
            fill_price,
            quantity: fill_qty,
            value: fill_price * fill_qty,
            pnl,
            reason,
        })
        .await;
        repo.upsert_position(&self.bot_id, outcome, position_after).await;

        if is_final || self.pending[idx].remaining() <= 1e-9 {
            self.pending.remove(idx);
        }
    }

    /// Periodically scans resting orders for staleness (SPEC_FULL.md §4.10
    /// step 4): farther than `max_price_distance` from the live best quote
    /// on their maker side, or older than `max_order_age_s`. Returns the
    /// number of orders cancelled; the strategy re-issues on the next step.
    pub async fn cancel_stale_orders(&mut self, gateway: &dyn OrderGateway, book: &OrderBookSnapshot, now_ms: i64) -> usize {
        let max_age_ms = (self.config.max_order_age_s * 1000.0) as i64;
        let max_distance = self.config.max_price_distance;

        let stale: Vec<PendingOrder> = self
            .pending
            .iter()
            .cloned()
            .filter(|o| {
                let age_ms = now_ms - o.created_at_ms;
                let (bid, ask) = book.bid_ask(o.outcome);
                let live_quote = match o.side {
                    Side::Buy => bid,
                    Side::Sell => ask,
                };
                age_ms > max_age_ms || (o.price - live_quote).abs() > max_distance
            })
            .collect();

        let mut cancelled = 0;
        for order in stale {
            if gateway.cancel(order.gateway_order_id).await.is_ok() {
                self.pending.retain(|o| o.gateway_order_id != order.gateway_order_id);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Best-effort cancellation of every resting order (SPEC_FULL.md §5
    /// "Stopping a bot ... cancels all its resting orders"). Fills that
    /// arrive after this call are still applied via `confirm_fill`; no new
    /// decisions should be made once a caller starts this sequence.
    pub async fn cancel_all(&mut self, gateway: &dyn OrderGateway) {
        let ids: Vec<u64> = self.pending.iter().map(|o| o.gateway_order_id).collect();
        for id in ids {
            let _ = gateway.cancel(id).await;
            self.pending.retain(|o| o.gateway_order_id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    use crate::gateway::SessionRow;

    #[derive(Default)]
    struct MockGateway {
        next_id: AtomicU64,
        fail_transient_times: u32,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl OrderGateway for MockGateway {
        async fn place_limit(&self, _side: Side, _outcome: Outcome, _price: f64, _qty: f64) -> Result<u64, GatewayError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.fail_transient_times {
                return Err(GatewayError::Transient("timeout".to_string()));
            }
            Ok(self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1)
        }

        async fn cancel(&self, _order_id: u64) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockRepository {
        trades: Mutex<Vec<Trade>>,
    }

    #[async_trait]
    impl Repository for MockRepository {
        async fn get_sessions_for_date(&self, _date: &str) -> Result<Vec<SessionRow>, GatewayError> {
            Ok(vec![])
        }
        async fn get_ticks_by_session(&self, _session_id: &str) -> Result<Vec<crate::types::Tick>, GatewayError> {
            Ok(vec![])
        }
        async fn get_snapshots_for_sessions(&self, _session_ids: &[String]) -> Result<Vec<OrderBookSnapshot>, GatewayError> {
            Ok(vec![])
        }
        async fn save_backtest_run(&self, _run: crate::gateway::BacktestRunRecord) {}
        async fn save_optimization_run(
            &self,
            _run: crate::gateway::OptimizationRunRecord,
            _phase_results: Vec<crate::optimizer::PhaseSummary>,
        ) {
        }
        async fn append_strategy_metric(&self, _sample: StrategyMetricSample) {}
        async fn append_trade(&self, trade: Trade) {
            self.trades.lock().unwrap().push(trade);
        }
        async fn upsert_position(&self, _bot_id: &str, _outcome: Outcome, _position: Position) {}
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

    /// Scenario: a persistently YES-biased book drives the bot to decide and
    /// submit actions over many steps.
    /// Expected: at least one StepOutcome::Submitted is observed and the
    /// corresponding pending order records a gateway id.
    #[tokio::test]
    async fn test_on_snapshot_submits_action_eventually() {
        let mut bot = BotRuntime::new("bot-1".to_string(), Config::default());
        let gateway = MockGateway::default();
        let repo = MockRepository::default();

        let mut submitted = false;
        for i in 0..200 {
            let outcome = bot
                .on_snapshot(&gateway, &repo, book(0.59, 0.61, 0.38, 0.40), 0.01, 900_000, i * 1000)
                .await;
            if matches!(outcome, StepOutcome::Submitted { .. }) {
                submitted = true;
            }
        }
        assert!(submitted);
    }

    /// Scenario: the gateway fails transiently twice, then succeeds.
    /// Expected: submit() retries and eventually returns Submitted rather
    /// than giving up after the first failure.
    #[tokio::test]
    async fn test_submit_retries_transient_failures() {
        let mut bot = BotRuntime::new("bot-1".to_string(), Config::default());
        let gateway = MockGateway {
            fail_transient_times: 2,
            ..Default::default()
        };
        let action = TradeAction {
            side: Side::Buy,
            outcome: Outcome::Yes,
            quantity: 10.0,
            is_unwind: false,
            target_direction: crate::types::Direction::LongYes,
            reason: "test".to_string(),
        };
        let outcome = bot.submit(&gateway, action, 0.45, 0).await;
        assert!(matches!(outcome, StepOutcome::Submitted { .. }));
    }

    /// Scenario: a fill confirmation arrives for a BUY order that was
    /// submitted and is still pending.
    /// Expected: the bot's YES position increases and last_fill_time_ms is set.
    #[tokio::test]
    async fn test_confirm_fill_updates_position() {
        let mut bot = BotRuntime::new("bot-1".to_string(), Config::default());
        let gateway = MockGateway::default();
        let repo = MockRepository::default();

        let action = TradeAction {
            side: Side::Buy,
            outcome: Outcome::Yes,
            quantity: 10.0,
            is_unwind: false,
            target_direction: crate::types::Direction::LongYes,
            reason: "test".to_string(),
        };
        let outcome = bot.submit(&gateway, action, 0.45, 0).await;
        let StepOutcome::Submitted { order_id, .. } = outcome else {
            panic!("expected submission");
        };

        bot.confirm_fill(&repo, order_id, 0.45, 10.0, true, 1000).await;
        assert_eq!(bot.position(Outcome::Yes).size, 10.0);
        assert_eq!(bot.state.last_fill_time_ms, Some(1000));
        assert_eq!(repo.trades.lock().unwrap().len(), 1);
    }

    /// Scenario: a resting BUY order's price has drifted far from the live
    /// best bid.
    /// Expected: cancel_stale_orders cancels it and removes it from pending.
    #[tokio::test]
    async fn test_cancel_stale_orders_by_price_distance() {
        let mut bot = BotRuntime::new("bot-1".to_string(), Config::default());
        let gateway = MockGateway::default();
        let action = TradeAction {
            side: Side::Buy,
            outcome: Outcome::Yes,
            quantity: 10.0,
            is_unwind: false,
            target_direction: crate::types::Direction::LongYes,
            reason: "test".to_string(),
        };
        bot.submit(&gateway, action, 0.30, 0).await;
        assert_eq!(bot.pending_size(Outcome::Yes), 10.0);

        let moved_book = book(0.60, 0.62, 0.38, 0.40);
        let cancelled = bot.cancel_stale_orders(&gateway, &moved_book, 1000).await;
        assert_eq!(cancelled, 1);
        assert_eq!(bot.pending_size(Outcome::Yes), 0.0);
    }
}
