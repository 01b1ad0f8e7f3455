//! Metrics Calculator, SPEC_FULL.md §4.11. Sharpe/drawdown/profit-factor
//! formulas are grounded directly on the teacher's
//! `bin/backtest/types.rs::StrategyStats` (`compute_sortino`,
//! `compute_streaks`, running-peak drawdown, `pnl_history`-delta returns);
//! the supplemental sortino/streak/recovery-factor additions SPEC_FULL.md
//! §4.11 calls for are carried over from that same file.

use crate::types::{Side, Trade};

/// One point of the equity history sampled during a backtest run
/// (SPEC_FULL.md §4.8 "balance/equity history sampled at >= 5-second
/// intervals").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquitySample {
    pub ts_ms: i64,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Metrics {
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub sharpe: f64,
    pub max_drawdown_pct: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_trade_pnl: f64,
    pub max_win: f64,
    pub max_loss: f64,
    pub sortino_ratio: f64,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub recovery_factor: f64,
}

fn sell_pnls(trades: &[Trade]) -> Vec<f64> {
    trades
        .iter()
        .filter(|t| t.side == Side::Sell)
        .filter_map(|t| t.pnl)
        .collect()
}

/// Max drawdown as both a percentage of the running peak and an absolute
/// dollar amount, from a running-peak walk over the equity curve
/// (SPEC_FULL.md §4.11 "Max drawdown", §8 invariant 7 / scenario 7).
fn max_drawdown(equity_curve: &[EquitySample]) -> (f64, f64) {
    let mut peak = equity_curve.first().map(|s| s.equity).unwrap_or(0.0);
    let mut max_pct = 0.0f64;
    let mut max_abs = 0.0f64;
    for sample in equity_curve {
        if sample.equity > peak {
            peak = sample.equity;
        }
        if peak > 0.0 {
            let drawdown_abs = peak - sample.equity;
            let drawdown_pct = drawdown_abs / peak * 100.0;
            if drawdown_pct > max_pct {
                max_pct = drawdown_pct;
            }
            if drawdown_abs > max_abs {
                max_abs = drawdown_abs;
            }
        }
    }
    (max_pct.clamp(0.0, 100.0), max_abs)
}

/// Sharpe ratio from per-sample equity returns, annualized by a factor
/// derived from the actual elapsed time of the equity history rather than
/// an assumed fixed sampling cadence (SPEC_FULL.md §4.11 "Sharpe").
fn sharpe_ratio(equity_curve: &[EquitySample]) -> f64 {
    if equity_curve.len() < 3 {
        return 0.0;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter_map(|w| {
            let (prev, cur) = (w[0].equity, w[1].equity);
            if prev.abs() > 1e-9 {
                Some((cur - prev) / prev)
            } else {
                None
            }
        })
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let sigma = variance.sqrt();
    if sigma <= 1e-12 {
        return 0.0;
    }

    let elapsed_ms = (equity_curve.last().unwrap().ts_ms - equity_curve.first().unwrap().ts_ms).max(1);
    let elapsed_years = elapsed_ms as f64 / (1000.0 * 60.0 * 60.0 * 24.0 * 365.0);
    let samples_per_year = returns.len() as f64 / elapsed_years.max(1e-9);
    let annualization = samples_per_year.sqrt();

    (mean / sigma) * annualization
}

/// Mean over downside deviation of per-trade pnl (SPEC_FULL.md §4.11
/// "Supplemental" sortino_ratio), grounded on the teacher's
/// `compute_sortino` helper.
fn sortino_ratio(pnls: &[f64]) -> f64 {
    if pnls.is_empty() {
        return 0.0;
    }
    let mean = pnls.iter().sum::<f64>() / pnls.len() as f64;
    let downside: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_variance = downside.iter().map(|p| p.powi(2)).sum::<f64>() / downside.len() as f64;
    let downside_dev = downside_variance.sqrt();
    if downside_dev <= 1e-12 {
        0.0
    } else {
        mean / downside_dev
    }
}

/// Longest consecutive win and loss streaks over the sell pnl sequence
/// (SPEC_FULL.md §4.11 "Supplemental"), grounded on the teacher's
/// `compute_streaks` helper.
fn streaks(pnls: &[f64]) -> (u32, u32) {
    let mut max_wins = 0u32;
    let mut max_losses = 0u32;
    let mut cur_wins = 0u32;
    let mut cur_losses = 0u32;
    for pnl in pnls {
        if *pnl > 0.0 {
            cur_wins += 1;
            cur_losses = 0;
        } else if *pnl < 0.0 {
            cur_losses += 1;
            cur_wins = 0;
        } else {
            cur_wins = 0;
            cur_losses = 0;
        }
        max_wins = max_wins.max(cur_wins);
        max_losses = max_losses.max(cur_losses);
    }
    (max_wins, max_losses)
}

/// Computes the full metrics set from a completed trade list and equity
/// history (SPEC_FULL.md §4.11).
pub fn compute_metrics(trades: &[Trade], equity_curve: &[EquitySample], initial_capital: f64) -> Metrics {
    let final_equity = equity_curve.last().map(|s| s.equity).unwrap_or(initial_capital);
    let total_pnl = final_equity - initial_capital;
    let total_return_pct = if initial_capital.abs() > 1e-9 {
        total_pnl / initial_capital * 100.0
    } else {
        0.0
    };

    let pnls = sell_pnls(trades);
    let sells = pnls.len();

    let win_rate = if sells == 0 {
        0.0
    } else {
        pnls.iter().filter(|p| **p > 0.0).count() as f64 / sells as f64
    };

    let gains: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let losses: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
    let profit_factor = if losses <= 1e-12 {
        if gains > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        gains / losses
    };

    let avg_trade_pnl = if sells == 0 { 0.0 } else { pnls.iter().sum::<f64>() / sells as f64 };
    let max_win = pnls.iter().cloned().fold(0.0, f64::max);
    let max_loss = pnls.iter().cloned().fold(0.0, f64::min);

    let (max_drawdown_pct, max_drawdown_abs) = max_drawdown(equity_curve);
    let recovery_factor = if max_drawdown_abs <= 1e-9 { 0.0 } else { total_pnl / max_drawdown_abs };

    let (max_consecutive_wins, max_consecutive_losses) = streaks(&pnls);

    Metrics {
        total_pnl,
        total_return_pct,
        sharpe: sharpe_ratio(equity_curve),
        max_drawdown_pct,
        win_rate,
        profit_factor,
        avg_trade_pnl,
        max_win,
        max_loss,
        sortino_ratio: sortino_ratio(&pnls),
        max_consecutive_wins,
        max_consecutive_losses,
        recovery_factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::types::Outcome;

    fn sell_trade(id: u64, pnl: f64) -> Trade {
        Trade {
            id,
            ts_ms: id as i64 * 1000,
            side: Side::Sell,
            outcome: Outcome::Yes,
            fill_price: 0.5,
            quantity: 10.0,
            value: 5.0,
            pnl: Some(pnl),
            reason: "test".to_string(),
        }
    }

    fn equity(points: &[(i64, f64)]) -> Vec<EquitySample> {
        points.iter().map(|(t, e)| EquitySample { ts_ms: *t, equity: *e }).collect()
    }

    /// Scenario: three winning sells then two losing sells.
    /// Expected: win_rate is 3/5, profit_factor = gains/losses, streaks counted correctly.
    #[test]
    fn test_win_rate_and_profit_factor() {
        let trades = vec![
            sell_trade(1, 10.0),
            sell_trade(2, 5.0),
            sell_trade(3, 8.0),
            sell_trade(4, -4.0),
            sell_trade(5, -2.0),
        ];
        let curve = equity(&[(0, 10_000.0), (1000, 10_023.0), (2000, 10_017.0)]);
        let m = compute_metrics(&trades, &curve, 10_000.0);
        assert_relative_eq!(m.win_rate, 0.6, epsilon = 1e-9);
        assert_relative_eq!(m.profit_factor, 23.0 / 6.0, epsilon = 1e-6);
        assert_eq!(m.max_consecutive_wins, 3);
        assert_eq!(m.max_consecutive_losses, 2);
    }

    /// Scenario: no losing trades at all, but at least one win.
    /// Expected: profit_factor is +infinity.
    #[test]
    fn test_profit_factor_infinite_with_no_losses() {
        let trades = vec![sell_trade(1, 10.0)];
        let curve = equity(&[(0, 10_000.0), (1000, 10_010.0)]);
        let m = compute_metrics(&trades, &curve, 10_000.0);
        assert!(m.profit_factor.is_infinite());
    }

    /// Scenario: equity never exceeds its starting value (monotone decline).
    /// Expected: max_drawdown_pct stays within [0, 100] (SPEC_FULL.md §8 scenario 7).
    #[test]
    fn test_max_drawdown_within_bounds() {
        let curve = equity(&[(0, 10_000.0), (1000, 5_000.0), (2000, 1_000.0)]);
        let m = compute_metrics(&[], &curve, 10_000.0);
        assert!(m.max_drawdown_pct >= 0.0 && m.max_drawdown_pct <= 100.0);
        assert_relative_eq!(m.max_drawdown_pct, 90.0, epsilon = 1e-6);
    }

    /// Scenario: an empty trade list and flat equity curve.
    /// Expected: metrics degrade gracefully to zero rather than panicking (div by zero).
    #[test]
    fn test_empty_trades_degrades_gracefully() {
        let curve = equity(&[(0, 10_000.0)]);
        let m = compute_metrics(&[], &curve, 10_000.0);
        assert_eq!(m.total_pnl, 0.0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.sharpe, 0.0);
    }
}
