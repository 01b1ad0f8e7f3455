//! Local stand-ins for the `MarketFeed`/`OrderGateway`/`Repository`
//! collaborators, used only by the `bot` binary's dry-run demo path.
//! SPEC_FULL.md §6 keeps all three collaborators a thin trait boundary
//! with no concrete network/database implementation shipped in this
//! crate; `BotMode::DryRun` and §4.10 step 3's "directly to position
//! store (dry_run)" branch are the license for these to exist at all.
//! They are not production gateways: no real exchange or database sits
//! behind them, only in-memory bookkeeping and log lines.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::gateway::{
    BacktestRunRecord, GatewayError, MarketFeed, FeedEvent, OptimizationRunRecord, OrderGateway, Repository, SessionRow,
};
use crate::types::{OrderBookSnapshot, Outcome, Position, Side, StrategyMetricSample, Tick, Trade};

/// Always-accepts order gateway that assigns incrementing ids and never
/// rejects a placement or cancel. Suitable only for the dry-run demo loop.
#[derive(Debug, Default)]
pub struct DryRunGateway {
    next_id: AtomicU64,
}

impl DryRunGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderGateway for DryRunGateway {
    async fn place_limit(&self, side: Side, outcome: Outcome, price: f64, qty: f64) -> Result<u64, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        info!(order_id = id, ?side, ?outcome, price, qty, "dry-run: order placed");
        Ok(id)
    }

    async fn cancel(&self, order_id: u64) -> Result<(), GatewayError> {
        info!(order_id, "dry-run: order cancelled");
        Ok(())
    }
}

/// Repository that logs every write instead of persisting it, for the
/// dry-run demo loop where no database is wired up.
#[derive(Debug, Default)]
pub struct LoggingRepository;

#[async_trait]
impl Repository for LoggingRepository {
    async fn get_sessions_for_date(&self, _date: &str) -> Result<Vec<SessionRow>, GatewayError> {
        Ok(Vec::new())
    }

    async fn get_ticks_by_session(&self, _session_id: &str) -> Result<Vec<Tick>, GatewayError> {
        Ok(Vec::new())
    }

    async fn get_snapshots_for_sessions(&self, _session_ids: &[String]) -> Result<Vec<OrderBookSnapshot>, GatewayError> {
        Ok(Vec::new())
    }

    async fn save_backtest_run(&self, run: BacktestRunRecord) {
        info!(
            run_id = run.id,
            strategy = run.strategy_slug,
            trade_count = run.trade_count,
            total_pnl = run.metrics.total_pnl,
            "backtest run saved"
        );
    }

    async fn save_optimization_run(&self, run: OptimizationRunRecord, phase_results: Vec<crate::optimizer::PhaseSummary>) {
        info!(
            run_id = run.id,
            strategy = run.strategy_slug,
            phases = phase_results.len(),
            "optimization run saved"
        );
    }

    async fn append_strategy_metric(&self, sample: StrategyMetricSample) {
        info!(
            ts_ms = sample.ts_ms,
            edge = sample.edge,
            tau = sample.tau,
            consensus_price = sample.consensus_price,
            "strategy metric"
        );
    }

    async fn append_trade(&self, trade: Trade) {
        info!(
            id = trade.id,
            side = ?trade.side,
            outcome = ?trade.outcome,
            price = trade.fill_price,
            qty = trade.quantity,
            pnl = ?trade.pnl,
            "trade"
        );
    }

    async fn upsert_position(&self, bot_id: &str, outcome: Outcome, position: Position) {
        info!(bot_id, ?outcome, size = position.size, avg_entry = position.avg_entry_price, "position updated");
    }
}

/// Replays a fixed, chronologically-sorted list of snapshots as a
/// `MarketFeed`, one `FeedEvent::Snapshot` per call to `next_event`. Used
/// by the `bot` binary to drive a dry run off a recorded CSV file instead
/// of a live exchange websocket.
pub struct CsvReplayFeed {
    market_id_hash: u64,
    tick_size: f64,
    snapshots: std::vec::IntoIter<OrderBookSnapshot>,
}

impl CsvReplayFeed {
    pub fn new(snapshots: Vec<OrderBookSnapshot>, market_id_hash: u64, tick_size: f64) -> Self {
        Self {
            market_id_hash,
            tick_size,
            snapshots: snapshots.into_iter(),
        }
    }
}

#[async_trait]
impl MarketFeed for CsvReplayFeed {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        let snapshot = self.snapshots.next()?;
        Some(FeedEvent::Snapshot {
            ts_ms: snapshot.ts_ms,
            market_id_hash: self.market_id_hash,
            yes_bid: snapshot.yes_bid,
            yes_ask: snapshot.yes_ask,
            no_bid: snapshot.no_bid,
            no_ask: snapshot.no_ask,
        })
    }

    fn tick_size(&self, _market_id: &crate::types::MarketId) -> Option<f64> {
        Some(self.tick_size)
    }
}
