//! Backtest Engine, SPEC_FULL.md §4.8: snapshot-driven replay of the
//! Time-Above-0.5 pipeline against recorded sessions. Grounded on the
//! teacher's `bin/backtest/engine.rs::run_market`/`run_all_markets` shape
//! (load -> merge -> per-event strategy evaluation -> settlement), with
//! its `BacktestSink` generalized onto this crate's `DecisionSink`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::config::{Config, ExecutionMode};
use crate::engine::decision::TradeAction;
use crate::engine::pipeline::{self, DecisionSink};
use crate::engine::signal::SignalOutput;
use crate::engine::signal_factory;
use crate::engine::state::BotStrategyState;
use crate::error::{AppError, AppResult};
use crate::market::consensus::ConsensusPrice;
use crate::metrics::{self, EquitySample, Metrics};
use crate::backtest::matcher::{marketable_fill_price, LimitOrderMatcher, MatcherStats};
use crate::types::{LimitOrder, Outcome, OrderBookSnapshot, OrderStatus, Position, Side, Tick, Trade};

/// Loads a snapshot CSV in the teacher's `load_binance_csv`/`load_book_csv`
/// column-per-line style: `ts_ms,yes_bid,yes_ask,no_bid,no_ask`.
pub fn load_snapshots_csv(path: &str) -> AppResult<Vec<OrderBookSnapshot>> {
    let file = File::open(path).map_err(|e| AppError::BacktestNoData(format!("{path}: {e}")))?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines().skip(1) {
        let line = line.map_err(|e| AppError::BacktestNoData(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 5 {
            continue;
        }
        let parse = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
        out.push(OrderBookSnapshot {
            ts_ms: parts[0].trim().parse().unwrap_or(0),
            yes_bid: parse(parts[1]),
            yes_ask: parse(parts[2]),
            no_bid: parse(parts[3]),
            no_ask: parse(parts[4]),
            inverted_corrections: 0,
        });
    }
    if out.is_empty() {
        return Err(AppError::BacktestNoData(format!("no snapshots in {path}")));
    }
    out.sort_by_key(|s| s.ts_ms);
    Ok(out)
}

/// Loads a tick CSV: `ts_ms,outcome,price,size`.
pub fn load_ticks_csv(path: &str) -> AppResult<Vec<Tick>> {
    let file = File::open(path).map_err(|e| AppError::BacktestNoData(format!("{path}: {e}")))?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines().skip(1) {
        let line = line.map_err(|e| AppError::BacktestNoData(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 4 {
            continue;
        }
        let outcome = if parts[1].trim().eq_ignore_ascii_case("yes") {
            Outcome::Yes
        } else {
            Outcome::No
        };
        out.push(Tick {
            ts_ms: parts[0].trim().parse().unwrap_or(0),
            outcome,
            price: parts[2].trim().parse().unwrap_or(0.0),
            size: parts[3].trim().parse().unwrap_or(0.0),
            session_id_hash: 0,
        });
    }
    out.sort_by_key(|t| t.ts_ms);
    Ok(out)
}

/// Minimum spacing between equity-curve samples (SPEC_FULL.md §4.8 "balance/
/// equity history sampled at >= 5-second intervals"), independent of the
/// risk gate's rebalance-interval evaluation cadence.
const EQUITY_SAMPLE_INTERVAL_MS: i64 = 5_000;

/// Inputs for one session's replay.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub end_ms: i64,
    pub snapshots: Vec<OrderBookSnapshot>,
    pub ticks: Vec<Tick>,
    pub tick_size: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquitySample>,
    pub metrics: Metrics,
    pub matcher_stats: MatcherStats,
}

/// Side-effect-free recorder that the shared pipeline writes into; actual
/// order execution happens in the engine loop after `process_step`
/// returns, since it needs mutable access to cash/positions/matcher that
/// the sink itself does not own.
#[derive(Default)]
struct ActionRecorder {
    actions: Vec<TradeAction>,
    last_signal: Option<SignalOutput>,
}

impl DecisionSink for ActionRecorder {
    fn on_signal(&mut self, signal: &SignalOutput, _consensus: &ConsensusPrice, _now_ms: i64) {
        self.last_signal = Some(*signal);
    }

    fn on_action(&mut self, action: &TradeAction, _now_ms: i64) {
        self.actions.push(action.clone());
    }
}

struct Book {
    positions: HashMap<Outcome, Position>,
    cash: f64,
    next_trade_id: u64,
    next_order_id: u64,
}

impl Book {
    fn new(initial_capital: f64) -> Self {
        Self {
            positions: HashMap::new(),
            cash: initial_capital,
            next_trade_id: 0,
            next_order_id: 0,
        }
    }

    fn position(&self, outcome: Outcome) -> Position {
        self.positions.get(&outcome).copied().unwrap_or_default()
    }

    fn inv(&self, outcome: Outcome) -> f64 {
        self.position(outcome).size
    }

    /// Clamps a proposed fill quantity to available cash (buys) and
    /// SPEC_FULL.md §4.8 "Positions are capped by Q_max and by remaining
    /// cash; attempts beyond either are clamped."
    fn clamp_qty(&self, cfg: &Config, side: Side, outcome: Outcome, price: f64, qty: f64) -> f64 {
        match side {
            Side::Buy => {
                let cash_cap = if price > 1e-9 { self.cash / price } else { 0.0 };
                let qmax_cap = (cfg.exposure.q_max - self.inv(outcome)).max(0.0);
                qty.min(cash_cap).min(qmax_cap).max(0.0)
            }
            Side::Sell => qty.min(self.inv(outcome)).max(0.0),
        }
    }

    fn apply_fill(&mut self, side: Side, outcome: Outcome, price: f64, qty: f64, ts_ms: i64, reason: String, trades: &mut Vec<Trade>) {
        if qty <= 0.0 {
            return;
        }
        let pos = self.positions.entry(outcome).or_default();
        let pnl = match side {
            Side::Buy => {
                pos.apply_buy(price, qty);
                self.cash -= price * qty;
                None
            }
            Side::Sell => {
                let pnl = pos.apply_sell(price, qty);
                self.cash += price * qty;
                Some(pnl)
            }
        };
        self.next_trade_id += 1;
        trades.push(Trade {
            id: self.next_trade_id,
            ts_ms,
            side,
            outcome,
            fill_price: price,
            quantity: qty,
            value: price * qty,
            pnl,
            reason,
        });
    }

    /// Mark-to-market equity using best bids (conservative liquidation
    /// value, SPEC_FULL.md §4.8).
    fn equity(&self, book: &OrderBookSnapshot) -> f64 {
        let yes_value = self.inv(Outcome::Yes) * book.yes_bid;
        let no_value = self.inv(Outcome::No) * book.no_bid;
        self.cash + yes_value + no_value
    }
}

/// Replays one session through the shared pipeline (SPEC_FULL.md §4.8).
pub fn run_session(cfg: &Config, data: &SessionData) -> AppResult<BacktestReport> {
    if data.snapshots.is_empty() {
        return Err(AppError::BacktestNoData("no snapshots for session".to_string()));
    }

    let mut state = BotStrategyState::default();
    let mut book = Book::new(cfg.backtest.initial_capital);
    let mut matcher = LimitOrderMatcher::new();
    let mut trades: Vec<Trade> = Vec::new();
    let mut equity_curve: Vec<EquitySample> = Vec::new();
    let rebalance_interval_ms = (cfg.risk.rebalance_interval_s * 1000.0) as i64;

    let mut last_eval_ms: Option<i64> = None;
    let mut last_equity_sample_ms: Option<i64> = None;

    for snapshot in &data.snapshots {
        let snapshot = snapshot.correct_inversions();

        if let Some(last) = last_eval_ms {
            if snapshot.ts_ms - last < rebalance_interval_ms {
                continue;
            }
        }

        // SPEC_FULL.md §4.8 step 2: sweep ticks since the previous eval
        // point through the matcher in limit execution mode.
        if cfg.backtest.execution_mode == ExecutionMode::Limit {
            if let Some(prev) = last_eval_ms {
                let window: Vec<Tick> = data
                    .ticks
                    .iter()
                    .copied()
                    .filter(|t| t.ts_ms > prev && t.ts_ms <= snapshot.ts_ms)
                    .collect();
                if !window.is_empty() {
                    let fills = matcher.sweep(&window);
                    for fill in &fills {
                        book.apply_fill(fill.side, fill.outcome, fill.fill_price, fill.fill_qty, fill.ts_ms, fill.reason.clone(), &mut trades);
                    }
                }
            }
        }

        let time_to_resolution_minutes = if data.end_ms > 0 {
            (data.end_ms - snapshot.ts_ms).max(0) as f64 / 60_000.0
        } else {
            15.0
        };

        let mut sink = ActionRecorder::default();
        let inv_yes = book.inv(Outcome::Yes);
        let inv_no = book.inv(Outcome::No);
        let sig = pipeline::process_step(
            cfg,
            &mut state,
            &snapshot,
            inv_yes,
            inv_no,
            time_to_resolution_minutes,
            snapshot.ts_ms,
            &mut sink,
        );

        for action in sink.actions.drain(..) {
            execute_action(cfg, &mut book, &mut matcher, &action, &snapshot, data.tick_size, sig.edge.abs(), &mut trades);
        }

        let due_for_sample = match last_equity_sample_ms {
            Some(last) => snapshot.ts_ms - last >= EQUITY_SAMPLE_INTERVAL_MS,
            None => true,
        };
        if due_for_sample {
            equity_curve.push(EquitySample {
                ts_ms: snapshot.ts_ms,
                equity: book.equity(&snapshot),
            });
            last_equity_sample_ms = Some(snapshot.ts_ms);
        }
        last_eval_ms = Some(snapshot.ts_ms);
    }

    // SPEC_FULL.md §4.8 step 3: expire pending orders and sell out both
    // legs at best bid using the final snapshot.
    if let Some(last_snapshot) = data.snapshots.last() {
        let last_snapshot = last_snapshot.correct_inversions();
        matcher.expire_all();
        for outcome in [Outcome::Yes, Outcome::No] {
            let size = book.inv(outcome);
            if size > 0.0 {
                let (bid, _ask) = last_snapshot.bid_ask(outcome);
                book.apply_fill(Side::Sell, outcome, bid, size, last_snapshot.ts_ms, "end_of_session_sellout".to_string(), &mut trades);
            }
        }
        equity_curve.push(EquitySample {
            ts_ms: last_snapshot.ts_ms,
            equity: book.equity(&last_snapshot),
        });
    }

    let metrics = metrics::compute_metrics(&trades, &equity_curve, cfg.backtest.initial_capital);

    Ok(BacktestReport {
        trades,
        equity_curve,
        metrics,
        matcher_stats: matcher.stats,
    })
}

/// Executes a decided trade action per the run's execution mode
/// (SPEC_FULL.md §4.8 step 2 "Execute the decided trade").
fn execute_action(
    cfg: &Config,
    book: &mut Book,
    matcher: &mut LimitOrderMatcher,
    action: &TradeAction,
    snapshot: &OrderBookSnapshot,
    tick_size: f64,
    edge_abs: f64,
    trades: &mut Vec<Trade>,
) {
    let (best_bid, best_ask) = snapshot.bid_ask(action.outcome);

    match cfg.backtest.execution_mode {
        ExecutionMode::Immediate => {
            let price = match action.side {
                Side::Buy => best_ask,
                Side::Sell => best_bid,
            };
            let qty = book.clamp_qty(cfg, action.side, action.outcome, price, action.quantity);
            book.apply_fill(action.side, action.outcome, price, qty, snapshot.ts_ms, action.reason.clone(), trades);
        }
        ExecutionMode::Limit => {
            let priced = signal_factory::price_action(action, snapshot, tick_size, edge_abs);
            let qty = book.clamp_qty(cfg, action.side, action.outcome, priced.price, action.quantity);
            if qty <= 0.0 {
                return;
            }
            if let Some(fill_price) = marketable_fill_price(action.side, action.outcome, priced.price, snapshot) {
                book.apply_fill(action.side, action.outcome, fill_price, qty, snapshot.ts_ms, action.reason.clone(), trades);
            } else {
                book.next_order_id += 1;
                matcher.add_pending(LimitOrder {
                    id: book.next_order_id,
                    side: action.side,
                    outcome: action.outcome,
                    price: priced.price,
                    quantity: qty,
                    filled_quantity: 0.0,
                    created_at_ms: snapshot.ts_ms,
                    status: OrderStatus::Open,
                    reason: action.reason.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ts_ms: i64, yes_bid: f64, yes_ask: f64, no_bid: f64, no_ask: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            ts_ms,
            yes_bid,
            yes_ask,
            no_bid,
            no_ask,
            inverted_corrections: 0,
        }
    }

    /// Scenario: no snapshots at all for a session.
    /// Expected: run_session aborts with BacktestNoData rather than panicking.
    #[test]
    fn test_empty_session_aborts() {
        let cfg = Config::default();
        let data = SessionData {
            end_ms: 0,
            snapshots: vec![],
            ticks: vec![],
            tick_size: 0.01,
        };
        let result = run_session(&cfg, &data);
        assert!(matches!(result, Err(AppError::BacktestNoData(_))));
    }

    /// Scenario: a short session with a persistent YES-biased book in immediate
    /// execution mode, no ticks.
    /// Expected: the run produces a non-empty equity curve and ends with all
    /// positions flattened to cash (end-of-backtest sellout).
    #[test]
    fn test_immediate_mode_sells_out_at_end() {
        let mut cfg = Config::default();
        cfg.backtest.execution_mode = ExecutionMode::Immediate;
        cfg.risk.rebalance_interval_s = 1.0;

        let mut snapshots = Vec::new();
        for i in 0..200 {
            snapshots.push(snap(i * 1000, 0.59, 0.61, 0.38, 0.40));
        }
        let data = SessionData {
            end_ms: 300_000,
            snapshots,
            ticks: vec![],
            tick_size: 0.01,
        };
        let report = run_session(&cfg, &data).unwrap();
        assert!(!report.equity_curve.is_empty());
        // Every SELL trade after an active position implies flattening happened;
        // final equity should be pure cash (no more bid/ask mark needed).
        assert!(report.metrics.total_pnl.is_finite());
    }

    /// Scenario: a limit-mode run with a persistent bias and no trailing ticks.
    /// Expected: decided orders join the pending set (maker-side prices never
    /// cross at creation) and the run still produces a populated equity curve.
    #[test]
    fn test_limit_mode_orders_rest_without_ticks() {
        let mut cfg = Config::default();
        cfg.backtest.execution_mode = ExecutionMode::Limit;
        cfg.risk.rebalance_interval_s = 1.0;

        let mut snapshots = Vec::new();
        for i in 0..150 {
            snapshots.push(snap(i * 1000, 0.59, 0.61, 0.38, 0.40));
        }
        let data = SessionData {
            end_ms: 200_000,
            snapshots,
            ticks: vec![],
            tick_size: 0.01,
        };
        let report = run_session(&cfg, &data).unwrap();
        assert!(!report.equity_curve.is_empty());
    }
}
