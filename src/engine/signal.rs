//! Time-Above-0.5 Signal Calculator, SPEC_FULL.md §4.2. Grounded on the
//! teacher's `math/ewma.rs` half-life decay formula (generalized here via
//! `crate::math::ewma::half_life_decay`) and on the `strategies::Strategy`
//! evaluate() shape for the overall per-call contract.

use crate::config::SignalConfig;
use crate::engine::state::BotStrategyState;
use crate::math::ewma::half_life_decay;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalOutput {
    pub tau: f64,
    pub dbar: f64,
    pub a: f64,
    pub d: f64,
    pub cross: f64,
    pub sigma: f64,
    pub chi: f64,
    pub theta: f64,
    pub edge: f64,
    pub in_deadband: bool,
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(0.01, 0.99);
    (p / (1.0 - p)).ln()
}

/// Computes the chop-window statistics (cross rate, logit-return stddev)
/// over the trailing `window_s` seconds of a bot's price history.
fn chop_stats(history: &[(i64, f64)], now_ms: i64, window_s: f64) -> (f64, f64) {
    let window_start = now_ms - (window_s * 1000.0) as i64;
    let windowed: Vec<(i64, f64)> = history
        .iter()
        .copied()
        .filter(|(t, _)| *t >= window_start && *t <= now_ms)
        .collect();

    if windowed.len() < 2 {
        return (0.0, 0.0);
    }

    let mut sign_flips = 0u32;
    let mut prev_sign = (windowed[0].1 - 0.5).signum();
    for (_, p) in windowed.iter().skip(1) {
        let sign = (p - 0.5).signum();
        if sign != 0.0 && prev_sign != 0.0 && sign != prev_sign {
            sign_flips += 1;
        }
        if sign != 0.0 {
            prev_sign = sign;
        }
    }
    let window_minutes = (window_s / 60.0).max(1e-9);
    let cross = sign_flips as f64 / window_minutes;

    let returns: Vec<f64> = windowed
        .windows(2)
        .map(|pair| logit(pair[1].1) - logit(pair[0].1))
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1).max(1) as f64;
    let sigma = variance.sqrt();

    (cross, sigma)
}

/// Evaluates one signal step for a bot, mutating its `tau`/`dbar`/price
/// history in place and returning the computed edge and its components
/// (SPEC_FULL.md §4.2, steps 1-11).
pub fn evaluate_signal(
    cfg: &SignalConfig,
    state: &mut BotStrategyState,
    p: f64,
    spread_c: f64,
    time_to_resolution_minutes: f64,
    now_ms: i64,
) -> SignalOutput {
    let dt_s = match state.last_price_time() {
        Some(last) => ((now_ms - last).max(1) as f64 / 1000.0).max(0.001),
        None => 1.0,
    };

    let d = p - 0.5;
    let indicator = if p > 0.5 { 1.0 } else { 0.0 };

    let decay_tau = half_life_decay(cfg.h_tau, dt_s);
    state.tau = state.tau * decay_tau + indicator * (1.0 - decay_tau);
    let a = 2.0 * state.tau - 1.0;

    let decay_d = half_life_decay(cfg.h_d, dt_s);
    state.dbar = state.dbar * decay_d + d * (1.0 - decay_d);

    state.push_price(now_ms, p);

    let (cross, sigma) = chop_stats(&state.price_history, now_ms, cfg.w_chop_sec);

    let theta = if time_to_resolution_minutes > 0.0 {
        (time_to_resolution_minutes / (time_to_resolution_minutes + cfg.t0)).powf(cfg.theta_b)
    } else {
        0.0
    };

    let chi = 1.0 / (1.0 + (cross / cfg.c0).powi(2) + (sigma / cfg.sigma0).powi(2));

    let delta = (cfg.delta0 + cfg.lambda_s * spread_c + cfg.lambda_c * cross).max(cfg.delta_min);

    if d.abs() < delta && a.abs() < cfg.a_min {
        return SignalOutput {
            tau: state.tau,
            dbar: state.dbar,
            a,
            d,
            cross,
            sigma,
            chi,
            theta,
            edge: 0.0,
            in_deadband: true,
        };
    }

    let edge = theta
        * chi
        * (cfg.alpha * a + cfg.beta * (state.dbar / cfg.d0).tanh() + cfg.gamma * (d / cfg.d1).tanh());

    SignalOutput {
        tau: state.tau,
        dbar: state.dbar,
        a,
        d,
        cross,
        sigma,
        chi,
        theta,
        edge,
        in_deadband: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SignalConfig {
        SignalConfig::default()
    }

    /// Scenario: 60 seconds of p=0.500 snapshots spaced 1s apart (pure deadband).
    /// Expected: every step reports in_deadband=true and edge=0, tau stays near 0.5
    /// (SPEC_FULL.md §8 scenario 1).
    #[test]
    fn test_pure_deadband_never_trades() {
        let c = cfg();
        let mut state = BotStrategyState::default();
        let mut last_out = None;
        for i in 0..60 {
            let now_ms = i * 1000;
            let out = evaluate_signal(&c, &mut state, 0.5, 0.02, 10.0, now_ms);
            assert!(out.in_deadband, "step {} should be in deadband", i);
            assert_eq!(out.edge, 0.0);
            last_out = Some(out);
        }
        let out = last_out.unwrap();
        assert!((out.tau - 0.5).abs() < 0.05);
    }

    /// Scenario: constant p=0.60 for 45 seconds (one h_tau half-life) starting from tau=0.5.
    /// Expected: tau approaches 0.75 within 0.02 (SPEC_FULL.md §8 scenario 2).
    #[test]
    fn test_persistent_bullish_tau_after_one_half_life() {
        let c = cfg();
        let mut state = BotStrategyState::default();
        let mut out = None;
        for i in 0..=45 {
            out = Some(evaluate_signal(&c, &mut state, 0.60, 0.02, 10.0, i * 1000));
        }
        let out = out.unwrap();
        assert!((out.tau - 0.75).abs() < 0.02, "tau={}", out.tau);
    }

    /// Scenario: consensus price held exactly at 0.5 with zero dt between calls.
    /// Expected: calculator does not divide by zero or panic; dt floors to a tiny positive value.
    #[test]
    fn test_zero_dt_does_not_panic() {
        let c = cfg();
        let mut state = BotStrategyState::default();
        let _ = evaluate_signal(&c, &mut state, 0.5, 0.02, 10.0, 1000);
        let out = evaluate_signal(&c, &mut state, 0.5, 0.02, 10.0, 1000);
        assert!(out.tau.is_finite());
    }

    /// Scenario: large negative displacement with high chop (many sign flips, high sigma).
    /// Expected: chi stays within (0, 1], never goes negative or exceeds 1.
    #[test]
    fn test_chi_bounded() {
        let c = cfg();
        let mut state = BotStrategyState::default();
        let mut out = None;
        for i in 0..200 {
            let p = if i % 2 == 0 { 0.55 } else { 0.45 };
            out = Some(evaluate_signal(&c, &mut state, p, 0.02, 10.0, i * 500));
        }
        let out = out.unwrap();
        assert!(out.chi > 0.0 && out.chi <= 1.0, "chi={}", out.chi);
    }
}
