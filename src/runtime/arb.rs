//! Live per-bot runtime loop for the Arbitrage Engine (SPEC_FULL.md §4.7,
//! §4.10). Mirrors `runtime::bot::BotRuntime`'s shape (owns strategy state
//! and pending orders, submits through `OrderGateway` with retry-with-
//! backoff, records best-effort telemetry through `Repository`) but drives
//! `arb::engine::decide` instead of the TA50 pipeline, since an arbitrage
//! bot only ever buys either leg and never unwinds through the Decision
//! Engine's unwind-first path.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::arb::engine::{decide, ArbDecision, ArbState, LegSnapshot};
use crate::config::Config;
use crate::gateway::{GatewayError, OrderGateway, Repository};
use crate::types::{BotId, Outcome, OrderBookSnapshot, Position, Side, Trade};

const MAX_PLACEMENT_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq)]
struct PendingBuy {
    gateway_order_id: u64,
    outcome: Outcome,
    price: f64,
    quantity: f64,
    filled_quantity: f64,
    created_at_ms: i64,
    reason: String,
}

impl PendingBuy {
    fn remaining(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }
}

/// Outcome of one arbitrage `on_snapshot` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ArbStepOutcome {
    /// No candidate leg cleared cooldown, sizing, price-ceiling, or
    /// profitability checks this step.
    NoAction,
    /// A leg buy was decided and submitted to the gateway.
    Submitted { order_id: u64, decision: ArbDecision },
    /// A leg buy was decided but placement failed after retries.
    PlacementFailed { decision: ArbDecision, reason: String },
}

/// Owns one arbitrage bot's round-robin/cooldown memory, filled positions,
/// and resting buy orders. Single-writer, same ownership rule as
/// `BotRuntime` (SPEC_FULL.md §5).
pub struct ArbRuntime {
    pub bot_id: BotId,
    pub config: Config,
    bot_start_ms: i64,
    state: ArbState,
    positions: HashMap<Outcome, Position>,
    pending: Vec<PendingBuy>,
}

impl ArbRuntime {
    pub fn new(bot_id: BotId, config: Config, bot_start_ms: i64) -> Self {
        Self {
            bot_id,
            config,
            bot_start_ms,
            state: ArbState::default(),
            positions: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn position(&self, outcome: Outcome) -> Position {
        self.positions.get(&outcome).copied().unwrap_or_default()
    }

    fn leg_snapshot(&self, outcome: Outcome) -> LegSnapshot {
        let filled = self.position(outcome);
        let pending: Vec<&PendingBuy> = self.pending.iter().filter(|o| o.outcome == outcome).collect();
        let pending_qty: f64 = pending.iter().map(|o| o.remaining()).sum();
        let pending_avg = if pending_qty > 0.0 {
            pending.iter().map(|o| o.price * o.remaining()).sum::<f64>() / pending_qty
        } else {
            0.0
        };
        LegSnapshot {
            filled_qty: filled.size,
            filled_avg: filled.avg_entry_price,
            pending_qty,
            pending_avg,
        }
    }

    /// Runs one arbitrage decision cycle and submits it if one fires
    /// (SPEC_FULL.md §4.7 steps 1-9, §4.10).
    pub async fn on_snapshot(
        &mut self,
        gateway: &dyn OrderGateway,
        book: &OrderBookSnapshot,
        tick_size: f64,
        market_end_ms: i64,
        now_ms: i64,
    ) -> ArbStepOutcome {
        let book = book.correct_inversions();
        let yes = self.leg_snapshot(Outcome::Yes);
        let no = self.leg_snapshot(Outcome::No);

        let Some(decision) = decide(
            &self.config.arbitrage,
            &mut self.state,
            &book,
            &yes,
            &no,
            tick_size,
            self.bot_start_ms,
            market_end_ms,
            now_ms,
        ) else {
            return ArbStepOutcome::NoAction;
        };

        let mut attempt = 0;
        loop {
            match gateway.place_limit(Side::Buy, decision.outcome, decision.price, decision.quantity).await {
                Ok(gateway_order_id) => {
                    self.pending.push(PendingBuy {
                        gateway_order_id,
                        outcome: decision.outcome,
                        price: decision.price,
                        quantity: decision.quantity,
                        filled_quantity: 0.0,
                        created_at_ms: now_ms,
                        reason: decision.reason.clone(),
                    });
                    return ArbStepOutcome::Submitted { order_id: gateway_order_id, decision };
                }
                Err(GatewayError::Transient(reason)) => {
                    attempt += 1;
                    if attempt >= MAX_PLACEMENT_RETRIES {
                        warn!(bot_id = %self.bot_id, reason = %reason, "arb order placement failed after retries");
                        return ArbStepOutcome::PlacementFailed { decision, reason };
                    }
                    let delay_ms = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(GatewayError::Permanent(reason)) => {
                    warn!(bot_id = %self.bot_id, reason = %reason, "arb order placement permanently failed");
                    return ArbStepOutcome::PlacementFailed { decision, reason };
                }
            }
        }
    }

    /// Applies a fill confirmation onto the bought leg's position.
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
            warn!(bot_id = %self.bot_id, order_id = gateway_order_id, "arb fill for unknown pending order");
            return;
        };

        let outcome = self.pending[idx].outcome;
        let reason = self.pending[idx].reason.clone();
        self.pending[idx].filled_quantity = (self.pending[idx].filled_quantity + fill_qty).min(self.pending[idx].quantity);

        let pos = self.positions.entry(outcome).or_default();
        pos.apply_buy(fill_price, fill_qty);
        let position_after = *pos;

        repo.append_trade(Trade {
            id: gateway_order_id,
            ts_ms: now_ms,
            side: Side::Buy,
            outcome,
            fill_price,
            quantity: fill_qty,
            value: fill_price * fill_qty,
            pnl: None,
            reason,
        })
        .await;
        repo.upsert_position(&self.bot_id, outcome, position_after).await;

        if is_final || self.pending[idx].remaining() <= 1e-9 {
            self.pending.remove(idx);
        }
    }

    /// Cancels resting buys that have drifted or aged past the shared
    /// staleness thresholds (SPEC_FULL.md §4.10 step 4, reused for arb).
    pub async fn cancel_stale_orders(&mut self, gateway: &dyn OrderGateway, book: &OrderBookSnapshot, now_ms: i64) -> usize {
        let max_age_ms = (self.config.max_order_age_s * 1000.0) as i64;
        let max_distance = self.config.max_price_distance;

        let stale: Vec<PendingBuy> = self
            .pending
            .iter()
            .cloned()
            .filter(|o| {
                let age_ms = now_ms - o.created_at_ms;
                let (bid, _ask) = book.bid_ask(o.outcome);
                age_ms > max_age_ms || (o.price - bid).abs() > max_distance
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
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use crate::gateway::SessionRow;
    use crate::types::{OrderBookSnapshot, StrategyMetricSample, Tick};

    #[derive(Default)]
    struct MockGateway {
        next_id: AtomicU64,
    }

    #[async_trait]
    impl OrderGateway for MockGateway {
        async fn place_limit(&self, _side: Side, _outcome: Outcome, _price: f64, _qty: f64) -> Result<u64, GatewayError> {
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
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
        async fn get_ticks_by_session(&self, _session_id: &str) -> Result<Vec<Tick>, GatewayError> {
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

    /// Scenario: a profitable, far-from-closeout book with no prior positions.
    /// Expected: on_snapshot submits a buy and records a pending order on that leg.
    #[tokio::test]
    async fn test_on_snapshot_submits_first_leg() {
        let mut runtime = ArbRuntime::new("arb-1".to_string(), Config::default(), 0);
        let gateway = MockGateway::default();
        let b = book(0.44, 0.45, 0.44, 0.45);

        let outcome = runtime.on_snapshot(&gateway, &b, 0.01, 900_000, 0).await;
        assert!(matches!(outcome, ArbStepOutcome::Submitted { .. }));
    }

    /// Scenario: a submitted buy is confirmed filled.
    /// Expected: the bought leg's position size increases and the trade is recorded.
    #[tokio::test]
    async fn test_confirm_fill_updates_position() {
        let mut runtime = ArbRuntime::new("arb-1".to_string(), Config::default(), 0);
        let gateway = MockGateway::default();
        let repo = MockRepository::default();
        let b = book(0.44, 0.45, 0.44, 0.45);

        let outcome = runtime.on_snapshot(&gateway, &b, 0.01, 900_000, 0).await;
        let ArbStepOutcome::Submitted { order_id, decision } = outcome else {
            panic!("expected submission");
        };

        runtime.confirm_fill(&repo, order_id, decision.price, decision.quantity, true, 1000).await;
        assert_eq!(runtime.position(decision.outcome).size, decision.quantity);
        assert_eq!(repo.trades.lock().unwrap().len(), 1);
    }
}
