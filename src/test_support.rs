//! Shared test fixture factories, used only from `#[cfg(test)]` modules
//! throughout this crate. Grounded on the teacher's
//! `strategies/test_helpers.rs::make_config()`/`make_state()` pair: one
//! factory per commonly-constructed type, so individual tests only set the
//! fields they care about.

#![cfg(test)]

use crate::config::Config;
use crate::engine::state::BotStrategyState;
use crate::types::{Direction, OrderBookSnapshot};

/// A default `Config`, identical to `Config::default()`. Exists as its own
/// entry point so tests read `make_config()` rather than reaching past this
/// module for the type.
pub fn make_config() -> Config {
    Config::default()
}

/// A `BotStrategyState` seeded with an explicit `tau`/`dbar`/direction,
/// skipping the price-history replay a test would otherwise need to build
/// up that state through `push_price`.
pub fn make_signal_state(tau: f64, dbar: f64, direction: Direction) -> BotStrategyState {
    BotStrategyState {
        tau,
        dbar,
        current_direction: direction,
        ..BotStrategyState::default()
    }
}

/// A valid, non-inverted order-book snapshot at the given timestamp.
pub fn make_snapshot(ts_ms: i64, yes_bid: f64, yes_ask: f64, no_bid: f64, no_ask: f64) -> OrderBookSnapshot {
    OrderBookSnapshot {
        ts_ms,
        yes_bid,
        yes_ask,
        no_bid,
        no_ask,
        inverted_corrections: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: make_snapshot is used to build a book with sane legs.
    /// Expected: the resulting snapshot passes is_valid and needs no correction.
    #[test]
    fn test_make_snapshot_is_valid_and_uncorrected() {
        let snap = make_snapshot(0, 0.45, 0.47, 0.53, 0.55);
        assert!(snap.is_valid());
        assert_eq!(snap.correct_inversions().inverted_corrections, 0);
    }
}
