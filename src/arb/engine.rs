//! Arbitrage Engine, SPEC_FULL.md §4.7: leg-balancing state machine that
//! opportunistically buys both legs of a market whenever their combined
//! ask sits below one, hedging into a matched pair before resolution.
//! Grounded on the priority/cooldown/round-robin shape of the teacher's
//! per-bot decision loop in `engine/runner.rs`, generalized here onto the
//! spec's P0-P3 priority sequence and closeout mode.

use crate::config::ArbitrageConfig;
use crate::types::{Outcome, OrderBookSnapshot};

/// Per-bot arbitrage memory: last buy timestamp per leg, and which leg was
/// bought last (for round-robin alternation). Cleared on bot deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArbState {
    pub last_buy_yes_ms: Option<i64>,
    pub last_buy_no_ms: Option<i64>,
    pub last_bought_leg: Option<Outcome>,
}

impl ArbState {
    fn last_buy_ms(&self, outcome: Outcome) -> Option<i64> {
        match outcome {
            Outcome::Yes => self.last_buy_yes_ms,
            Outcome::No => self.last_buy_no_ms,
        }
    }

    fn record_buy(&mut self, outcome: Outcome, now_ms: i64) {
        match outcome {
            Outcome::Yes => self.last_buy_yes_ms = Some(now_ms),
            Outcome::No => self.last_buy_no_ms = Some(now_ms),
        }
        self.last_bought_leg = Some(outcome);
    }
}

/// A leg's effective position: filled shares plus whatever is still resting
/// in pending orders, each with their own average price (SPEC_FULL.md §4.7
/// step 2).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LegSnapshot {
    pub filled_qty: f64,
    pub filled_avg: f64,
    pub pending_qty: f64,
    pub pending_avg: f64,
}

impl LegSnapshot {
    pub fn effective_size(&self) -> f64 {
        self.filled_qty + self.pending_qty
    }

    pub fn effective_avg(&self) -> f64 {
        let size = self.effective_size();
        if size <= 0.0 {
            0.0
        } else {
            (self.filled_avg * self.filled_qty + self.pending_avg * self.pending_qty) / size
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbPriority {
    Closeout,
    Imbalance,
    RoundRobinPrimary,
    RoundRobinFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArbDecision {
    pub outcome: Outcome,
    pub price: f64,
    pub quantity: f64,
    pub priority: ArbPriority,
    pub is_aggressive: bool,
    /// Short tag explaining which priority rule fired (SPEC_FULL.md §3, §4.7).
    pub reason: String,
}

fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        price
    } else {
        (price / tick).round() * tick
    }
}

/// Passive BUY price: 0.5% below the bid, falling back to one tick below
/// if that would cross the ask (SPEC_FULL.md §4.7 Pricing).
fn passive_price(best_bid: f64, best_ask: f64, tick: f64) -> f64 {
    let price = round_to_tick(best_bid * (1.0 - 0.005), tick);
    if price >= best_ask {
        round_to_tick(best_bid - tick, tick)
    } else {
        price
    }
}

fn aggressive_price(best_ask: f64, tick: f64) -> f64 {
    round_to_tick(best_ask, tick)
}

fn leg_snapshot(yes: &LegSnapshot, no: &LegSnapshot, outcome: Outcome) -> LegSnapshot {
    match outcome {
        Outcome::Yes => *yes,
        Outcome::No => *no,
    }
}

fn other_leg(outcome: Outcome) -> Outcome {
    outcome.other()
}

/// Runs one arbitrage decision cycle (SPEC_FULL.md §4.7 steps 1-9). `tick`
/// is the market's tick size, used for price rounding.
pub fn decide(
    cfg: &ArbitrageConfig,
    state: &mut ArbState,
    book: &OrderBookSnapshot,
    yes: &LegSnapshot,
    no: &LegSnapshot,
    tick: f64,
    bot_start_ms: i64,
    market_end_ms: i64,
    now_ms: i64,
) -> Option<ArbDecision> {
    let total_window = (market_end_ms - bot_start_ms).max(1) as f64;
    let elapsed = (now_ms - bot_start_ms).max(0) as f64;
    let t = (elapsed / total_window).clamp(0.0, 1.0);
    let scaled_max = (cfg.max_position * (1.0 - t)).floor();
    let closeout = t >= cfg.closeout_threshold;

    let yes_size = yes.effective_size();
    let no_size = no.effective_size();
    let size_diff = (yes_size - no_size).abs();
    let lagging_leg = if yes_size <= no_size { Outcome::Yes } else { Outcome::No };

    let effective_cooldown_ms = if closeout {
        cfg.closeout_cooldown_ms
    } else {
        cfg.normal_cooldown_ms
    } as i64;

    let cooldown_cleared = |leg: Outcome, bypass: bool| -> bool {
        if bypass {
            return true;
        }
        match state.last_buy_ms(leg) {
            Some(last) => (now_ms - last) >= effective_cooldown_ms,
            None => true,
        }
    };

    // SPEC_FULL.md §4.7 step 4: a leg "can buy" if it is lagging, or if
    // buying it keeps both size and filled imbalance within scaled_max.
    let can_buy = |leg: Outcome| -> bool {
        if leg == lagging_leg {
            return true;
        }
        let (this_size, other_size) = match leg {
            Outcome::Yes => (yes_size + cfg.order_size, no_size),
            Outcome::No => (no_size + cfg.order_size, yes_size),
        };
        let (this_filled, other_filled) = match leg {
            Outcome::Yes => (yes.filled_qty + cfg.order_size, no.filled_qty),
            Outcome::No => (no.filled_qty + cfg.order_size, yes.filled_qty),
        };
        (this_size - other_size).abs() <= scaled_max && (this_filled - other_filled).abs() <= scaled_max
    };

    // SPEC_FULL.md §4.7 step 6: price ceiling.
    let price_ceiling_ok = |leg: Outcome, price: f64| -> bool {
        let other = leg_snapshot(yes, no, other_leg(leg));
        if other.effective_size() > 0.0 {
            price <= cfg.profit_threshold - other.effective_avg() - 0.01
        } else {
            price <= cfg.max_single_leg_price
        }
    };

    // SPEC_FULL.md §4.7 step 7: profitability projection.
    let profitable = |leg: Outcome, price: f64, qty: f64| -> bool {
        let this = leg_snapshot(yes, no, leg);
        let other = leg_snapshot(yes, no, other_leg(leg));
        let this_size = this.effective_size();
        let new_size = this_size + qty;
        let new_avg = if new_size > 0.0 {
            (this.effective_avg() * this_size + price * qty) / new_size
        } else {
            price
        };
        new_avg + other.effective_avg() < cfg.profit_threshold
    };

    let try_candidate = |leg: Outcome,
                          qty: f64,
                          aggressive: bool,
                          cooldown_bypass: bool|
     -> Option<(f64, f64)> {
        if !cooldown_cleared(leg, cooldown_bypass) {
            return None;
        }
        if !can_buy(leg) {
            return None;
        }
        let (best_bid, best_ask) = book.bid_ask(leg);
        let price = if aggressive {
            aggressive_price(best_ask, tick)
        } else {
            passive_price(best_bid, best_ask, tick)
        };
        if !price_ceiling_ok(leg, price) {
            return None;
        }
        if !profitable(leg, price, qty) {
            return None;
        }
        Some((price, qty))
    };

    // P0: closeout, buy the lagging leg aggressively for the full gap. In
    // closeout mode the lagging leg bypasses its cooldown (SPEC_FULL.md §4.7
    // step 5), same as the smaller P1-sized buy below.
    if closeout && size_diff > 0.0 {
        let qty = size_diff.min(3.0 * cfg.order_size);
        if let Some((price, qty)) = try_candidate(lagging_leg, qty, true, closeout) {
            state.record_buy(lagging_leg, now_ms);
            return Some(ArbDecision {
                outcome: lagging_leg,
                price,
                quantity: qty,
                priority: ArbPriority::Closeout,
                is_aggressive: true,
                reason: "closeout: buy lagging leg for the full gap before resolution".to_string(),
            });
        }
    }

    // P1: either side already has position; rebalance toward the lagging leg.
    if yes_size > 0.0 || no_size > 0.0 {
        let total = (yes_size + no_size).max(1e-9);
        let imbalance = size_diff / total;
        let aggressive = imbalance > cfg.imbalance_threshold;
        if let Some((price, qty)) = try_candidate(lagging_leg, cfg.order_size, aggressive, closeout) {
            state.record_buy(lagging_leg, now_ms);
            return Some(ArbDecision {
                outcome: lagging_leg,
                price,
                quantity: qty,
                priority: ArbPriority::Imbalance,
                is_aggressive: aggressive,
                reason: "imbalance: rebalance toward the lagging leg".to_string(),
            });
        }
    }

    // P2/P3: round-robin. Primary candidate alternates from the last buy;
    // the fallback retries the other leg of the pair.
    let primary = match state.last_bought_leg {
        Some(leg) => other_leg(leg),
        None => Outcome::Yes,
    };
    let fallback = other_leg(primary);

    if let Some((price, qty)) = try_candidate(primary, cfg.order_size, false, false) {
        state.record_buy(primary, now_ms);
        return Some(ArbDecision {
            outcome: primary,
            price,
            quantity: qty,
            priority: ArbPriority::RoundRobinPrimary,
            is_aggressive: false,
            reason: "round-robin: primary leg's turn".to_string(),
        });
    }

    if let Some((price, qty)) = try_candidate(fallback, cfg.order_size, false, false) {
        state.record_buy(fallback, now_ms);
        return Some(ArbDecision {
            outcome: fallback,
            price,
            quantity: qty,
            priority: ArbPriority::RoundRobinFallback,
            is_aggressive: false,
            reason: "round-robin: primary leg blocked, falling back to the other leg".to_string(),
        });
    }

    None
}
