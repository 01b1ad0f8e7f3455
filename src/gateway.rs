//! External collaborator trait boundaries, SPEC_FULL.md §6: `MarketFeed`,
//! `OrderGateway`, and `Repository` are defined here as trait signatures
//! only. Per §1's out-of-scope list, this crate ships no concrete
//! network/database implementation of any of them — only the boundary and
//! the types that cross it, mirrored on the `async fn` shape of the
//! teacher's `gateway/order.rs` collaborator without its exchange-specific
//! signing/submission internals.

use async_trait::async_trait;

use crate::types::{MarketId, Outcome, Side};

/// A feed event, SPEC_FULL.md §6 "Market feed interface (inbound)".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedEvent {
    Snapshot {
        ts_ms: i64,
        market_id_hash: u64,
        yes_bid: f64,
        yes_ask: f64,
        no_bid: f64,
        no_ask: f64,
    },
    Trade {
        ts_ms: i64,
        market_id_hash: u64,
        outcome: Outcome,
        price: f64,
        size: f64,
    },
    TickSize {
        market_id_hash: u64,
        tick_size: f64,
    },
}

/// Inbound collaborator: streams order-book snapshots, trade prints, and
/// tick-size updates for a market. The live implementation wraps an
/// exchange websocket; this crate never implements it.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn next_event(&mut self) -> Option<FeedEvent>;
    fn tick_size(&self, market_id: &MarketId) -> Option<f64>;
}

/// Classification of an order-gateway failure (SPEC_FULL.md §6 "Errors are
/// classified (transient, permanent)").
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    Transient(String),
    Permanent(String),
}

/// A fill callback delivered asynchronously after `place_limit` returns an
/// order id (SPEC_FULL.md §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillAck {
    pub order_id: u64,
    pub price: f64,
    pub quantity: f64,
    pub is_final: bool,
}

/// Outbound collaborator: places/cancels live orders. The live
/// implementation wraps exchange order submission; this crate never
/// implements it, only consumes `Box<dyn OrderGateway>` (SPEC_FULL.md §6).
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_limit(
        &self,
        side: Side,
        outcome: Outcome,
        price: f64,
        qty: f64,
    ) -> Result<u64, GatewayError>;

    async fn cancel(&self, order_id: u64) -> Result<(), GatewayError>;
}

/// A row-level view of a recording session for the backtest engine's
/// session lookups (SPEC_FULL.md §3 "Recording Session").
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub id: String,
    pub market_id: MarketId,
    pub market_name: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// A completed backtest run, persisted as a single record (SPEC_FULL.md §6
/// "save_backtest_run(run)").
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRunRecord {
    pub id: String,
    pub session_ids: Vec<String>,
    pub strategy_slug: String,
    pub execution_mode: crate::config::ExecutionMode,
    pub initial_capital: f64,
    pub trade_count: usize,
    pub metrics: crate::metrics::Metrics,
}

/// A completed optimizer run, persisted alongside its per-phase summaries
/// (SPEC_FULL.md §6 "save_optimization_run(run, phase_results[])").
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationRunRecord {
    pub id: String,
    pub session_ids: Vec<String>,
    pub strategy_slug: String,
}

/// Persistence collaborator (SPEC_FULL.md §6 "Persistence interface
/// (Repository)"). This crate defines only the narrow query surface the
/// core needs; no concrete row-storage implementation ships here.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_sessions_for_date(&self, date: &str) -> Result<Vec<SessionRow>, GatewayError>;
    async fn get_ticks_by_session(&self, session_id: &str) -> Result<Vec<crate::types::Tick>, GatewayError>;
    async fn get_snapshots_for_sessions(
        &self,
        session_ids: &[String],
    ) -> Result<Vec<crate::types::OrderBookSnapshot>, GatewayError>;

    async fn save_backtest_run(&self, run: BacktestRunRecord);
    async fn save_optimization_run(&self, run: OptimizationRunRecord, phase_results: Vec<crate::optimizer::PhaseSummary>);

    /// Best-effort: callers must not block the decision path on this.
    async fn append_strategy_metric(&self, sample: crate::types::StrategyMetricSample);
    async fn append_trade(&self, trade: crate::types::Trade);
    async fn upsert_position(&self, bot_id: &str, outcome: Outcome, position: crate::types::Position);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a transient gateway error is constructed and matched.
    /// Expected: the classification is preserved through the enum.
    #[test]
    fn test_gateway_error_classification() {
        let e = GatewayError::Transient("timeout".to_string());
        assert!(matches!(e, GatewayError::Transient(_)));
    }

    /// Scenario: a FeedEvent::Snapshot is constructed and copied.
    /// Expected: field values survive the copy unchanged.
    #[test]
    fn test_feed_event_snapshot_fields() {
        let ev = FeedEvent::Snapshot {
            ts_ms: 100,
            market_id_hash: 42,
            yes_bid: 0.4,
            yes_ask: 0.5,
            no_bid: 0.5,
            no_ask: 0.6,
        };
        let ev2 = ev;
        if let FeedEvent::Snapshot { ts_ms, .. } = ev2 {
            assert_eq!(ts_ms, 100);
        } else {
            panic!("expected Snapshot variant");
        }
    }
}
