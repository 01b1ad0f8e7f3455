//! Signal Factory, SPEC_FULL.md §4.6. Grounded on the teacher's
//! `gateway/order.rs` tick_decimals / price rounding logic, generalized
//! onto maker-style pricing for either leg.

use crate::engine::decision::TradeAction;
use crate::types::{OrderBookSnapshot, Side};

/// Rounds a price to the nearest tick, SPEC_FULL.md §4.6 / §9:
/// `round(price / tick) * tick`.
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).round() * tick
}

/// Number of decimal places implied by a tick size, e.g. tick=0.01 -> 2.
pub fn tick_decimals(tick: f64) -> usize {
    if tick <= 0.0 || tick >= 1.0 {
        return 0;
    }
    (-tick.log10()).ceil().max(0.0) as usize
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricedOrder {
    pub price: f64,
    pub confidence: f64,
}

/// Selects a maker-style price for a decided action and computes an
/// advisory confidence score (SPEC_FULL.md §4.6).
pub fn price_action(action: &TradeAction, book: &OrderBookSnapshot, tick: f64, edge_abs: f64) -> PricedOrder {
    let (bid, ask) = book.bid_ask(action.outcome);
    let raw_price = match action.side {
        Side::Buy => bid,
        Side::Sell => ask,
    };
    let price = round_to_tick(raw_price, tick);

    let confidence = if action.is_unwind {
        0.95
    } else if edge_abs >= 0.25 {
        0.90
    } else if edge_abs >= 0.18 {
        0.80
    } else {
        0.70
    };

    PricedOrder { price, confidence }
}
