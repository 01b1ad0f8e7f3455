//! Limit-Order Matcher, SPEC_FULL.md §4.9: simulates fills for resting
//! limit orders against a time-ordered tick stream. Has no direct teacher
//! counterpart (the teacher trades live against a real CLOB); grounded
//! here on the event-merge/sort style of the teacher's
//! `bin/backtest/engine.rs` (`merge_events`) applied to a matcher rather
//! than a strategy loop.

use crate::types::{LimitOrder, OrderBookSnapshot, OrderStatus, Outcome, Side, Tick};

/// One simulated fill produced by the tick sweep (SPEC_FULL.md §4.9).
#[derive(Debug, Clone, PartialEq)]
pub struct FillRecord {
    pub order_id: u64,
    pub side: Side,
    pub outcome: Outcome,
    pub fill_price: f64,
    pub fill_qty: f64,
    pub ts_ms: i64,
    pub is_fully_filled: bool,
    pub reason: String,
}

/// Aggregate statistics for a limit-mode backtest run (SPEC_FULL.md §4.9
/// "Statistics per run").
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatcherStats {
    pub orders_created: u64,
    pub orders_filled: u64,
    pub orders_expired: u64,
}

impl MatcherStats {
    pub fn fill_rate(&self) -> f64 {
        if self.orders_created == 0 {
            0.0
        } else {
            self.orders_filled as f64 / self.orders_created as f64
        }
    }
}

/// Whether a tick crosses a resting order's price (SPEC_FULL.md §4.9
/// "Price crossing rule"): BUY fills when tick price <= order price, SELL
/// fills when tick price >= order price.
fn crosses(order_side: Side, order_price: f64, tick_price: f64) -> bool {
    match order_side {
        Side::Buy => tick_price <= order_price,
        Side::Sell => tick_price >= order_price,
    }
}

/// Checks whether a newly-created order is marketable against the current
/// snapshot (SPEC_FULL.md §4.9 "Marketable check at creation"): a BUY at or
/// above the ask fills immediately at the ask; a SELL at or below the bid
/// fills immediately at the bid. Returns the immediate fill price if so.
pub fn marketable_fill_price(side: Side, outcome: Outcome, price: f64, book: &OrderBookSnapshot) -> Option<f64> {
    let (best_bid, best_ask) = book.bid_ask(outcome);
    match side {
        Side::Buy if best_ask > 0.0 && price >= best_ask => Some(best_ask),
        Side::Sell if price <= best_bid => Some(best_bid),
        _ => None,
    }
}

/// A matcher owning the set of pending simulated orders for one backtest
/// run, plus run-level statistics.
#[derive(Debug, Default)]
pub struct LimitOrderMatcher {
    pending: Vec<LimitOrder>,
    pub stats: MatcherStats,
}

impl LimitOrderMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly-created order as pending, counting it in stats.
    pub fn add_pending(&mut self, order: LimitOrder) {
        self.stats.orders_created += 1;
        self.pending.push(order);
    }

    pub fn pending_orders(&self) -> &[LimitOrder] {
        &self.pending
    }

    /// Sweeps a chronologically-ordered slice of ticks through all pending
    /// orders, producing fill records in tick order (SPEC_FULL.md §4.9
    /// "Tick sweep over a window"). Orders that become fully filled are
    /// removed from the pending set and counted.
    pub fn sweep(&mut self, ticks: &[Tick]) -> Vec<FillRecord> {
        let mut fills = Vec::new();
        for tick in ticks {
            for order in self.pending.iter_mut() {
                if order.outcome != tick.outcome {
                    continue;
                }
                if order.created_at_ms >= tick.ts_ms {
                    continue;
                }
                if order.remaining() <= 0.0 {
                    continue;
                }
                if !crosses(order.side, order.price, tick.price) {
                    continue;
                }
                let fill_qty = order.remaining().min(tick.size);
                if fill_qty <= 0.0 {
                    continue;
                }
                order.apply_fill(fill_qty);
                let is_fully_filled = order.status == OrderStatus::Filled;
                fills.push(FillRecord {
                    order_id: order.id,
                    side: order.side,
                    outcome: order.outcome,
                    fill_price: tick.price,
                    fill_qty,
                    ts_ms: tick.ts_ms,
                    is_fully_filled,
                    reason: order.reason.clone(),
                });
            }
        }

        let filled_now = fills.iter().filter(|f| f.is_fully_filled).count() as u64;
        self.stats.orders_filled += filled_now;
        self.pending.retain(|o| o.status != OrderStatus::Filled);

        fills
    }

    /// Expires all still-pending orders at end-of-backtest (SPEC_FULL.md
    /// §4.9 "Expiry"): no cash changes, just accounting and status update.
    pub fn expire_all(&mut self) -> Vec<LimitOrder> {
        self.stats.orders_expired += self.pending.len() as u64;
        let expired: Vec<LimitOrder> = self
            .pending
            .drain(..)
            .map(|mut o| {
                o.status = OrderStatus::Expired;
                o
            })
            .collect();
        expired
    }
}
