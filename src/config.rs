//! Typed configuration, generalized from the teacher's `Config::from_env()`
//! pattern (see `strategies/test_helpers.rs::make_config()` for the full
//! field list this crate's shape is descended from) onto SPEC_FULL.md §6.

use std::env;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// §4.2 Signal Calculator (Time-Above-0.5) parameters. Field names follow
/// the parameter table in SPEC_FULL.md §6 directly.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub h_tau: f64,
    pub h_d: f64,
    pub w_chop_sec: f64,
    pub t0: f64,
    pub theta_b: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub d0: f64,
    pub d1: f64,
    pub c0: f64,
    pub sigma0: f64,
    pub delta_min: f64,
    pub delta0: f64,
    pub lambda_s: f64,
    pub lambda_c: f64,
    pub a_min: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            h_tau: 45.0,
            h_d: 60.0,
            w_chop_sec: 90.0,
            t0: 3.0,
            theta_b: 1.5,
            alpha: 1.0,
            beta: 0.6,
            gamma: 0.3,
            d0: 0.015,
            d1: 0.010,
            c0: 2.0,
            sigma0: 0.08,
            delta_min: 0.003,
            delta0: 0.004,
            lambda_s: 0.5,
            lambda_c: 0.002,
            a_min: 0.15,
        }
    }
}

impl SignalConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            h_tau: env_f64("SIGNAL_H_TAU", d.h_tau),
            h_d: env_f64("SIGNAL_H_D", d.h_d),
            w_chop_sec: env_f64("SIGNAL_W_CHOP_SEC", d.w_chop_sec),
            t0: env_f64("SIGNAL_T0", d.t0),
            theta_b: env_f64("SIGNAL_THETA_B", d.theta_b),
            alpha: env_f64("SIGNAL_ALPHA", d.alpha),
            beta: env_f64("SIGNAL_BETA", d.beta),
            gamma: env_f64("SIGNAL_GAMMA", d.gamma),
            d0: env_f64("SIGNAL_D0", d.d0),
            d1: env_f64("SIGNAL_D1", d.d1),
            c0: env_f64("SIGNAL_C0", d.c0),
            sigma0: env_f64("SIGNAL_SIGMA0", d.sigma0),
            delta_min: env_f64("SIGNAL_DELTA_MIN", d.delta_min),
            delta0: env_f64("SIGNAL_DELTA0", d.delta0),
            lambda_s: env_f64("SIGNAL_LAMBDA_S", d.lambda_s),
            lambda_c: env_f64("SIGNAL_LAMBDA_C", d.lambda_c),
            a_min: env_f64("SIGNAL_A_MIN", d.a_min),
        }
    }
}

/// §4.3 Exposure Manager parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureConfig {
    pub k: f64,
    pub q_max: f64,
    pub q_step: f64,
    pub e_enter: f64,
    pub e_exit: f64,
    pub e_taker: f64,
    pub e_override: f64,
    pub t_flat: f64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            k: 2.5,
            q_max: 600.0,
            q_step: 10.0,
            e_enter: 0.18,
            e_exit: 0.10,
            e_taker: 0.30,
            e_override: 0.35,
            t_flat: 1.0,
        }
    }
}

impl ExposureConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            k: env_f64("EXPOSURE_K", d.k),
            q_max: env_f64("EXPOSURE_Q_MAX", d.q_max),
            q_step: env_f64("EXPOSURE_Q_STEP", d.q_step),
            e_enter: env_f64("EXPOSURE_E_ENTER", d.e_enter),
            e_exit: env_f64("EXPOSURE_E_EXIT", d.e_exit),
            e_taker: env_f64("EXPOSURE_E_TAKER", d.e_taker),
            e_override: env_f64("EXPOSURE_E_OVERRIDE", d.e_override),
            t_flat: env_f64("EXPOSURE_T_FLAT", d.t_flat),
        }
    }
}

/// §4.4 Risk Validator throttle/gate parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub spread_max_entry: f64,
    pub spread_halt: f64,
    pub rebalance_interval_s: f64,
    pub cooldown_s: f64,
    pub min_hold_s: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            spread_max_entry: 0.025,
            spread_halt: 0.04,
            rebalance_interval_s: 2.0,
            cooldown_s: 2.0,
            min_hold_s: 15.0,
        }
    }
}

impl RiskConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            spread_max_entry: env_f64("RISK_SPREAD_MAX_ENTRY", d.spread_max_entry),
            spread_halt: env_f64("RISK_SPREAD_HALT", d.spread_halt),
            rebalance_interval_s: env_f64("RISK_REBALANCE_INTERVAL_S", d.rebalance_interval_s),
            cooldown_s: env_f64("RISK_COOLDOWN_S", d.cooldown_s),
            min_hold_s: env_f64("RISK_MIN_HOLD_S", d.min_hold_s),
        }
    }
}

/// §4.7 Arbitrage Engine parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageConfig {
    pub order_size: f64,
    pub max_position: f64,
    pub min_profit_margin: f64,
    pub normal_cooldown_ms: u64,
    pub closeout_cooldown_ms: u64,
    pub imbalance_threshold: f64,
    pub profit_threshold: f64,
    pub max_single_leg_price: f64,
    pub closeout_threshold: f64,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            order_size: 10.0,
            max_position: 100.0,
            min_profit_margin: 0.05,
            normal_cooldown_ms: 3_000,
            closeout_cooldown_ms: 500,
            imbalance_threshold: 0.5,
            profit_threshold: 0.98,
            max_single_leg_price: 0.75,
            closeout_threshold: 0.90,
        }
    }
}

impl ArbitrageConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            order_size: env_f64("ARB_ORDER_SIZE", d.order_size),
            max_position: env_f64("ARB_MAX_POSITION", d.max_position),
            min_profit_margin: env_f64("ARB_MIN_PROFIT_MARGIN", d.min_profit_margin),
            normal_cooldown_ms: env_u64("ARB_NORMAL_COOLDOWN_MS", d.normal_cooldown_ms),
            closeout_cooldown_ms: env_u64("ARB_CLOSEOUT_COOLDOWN_MS", d.closeout_cooldown_ms),
            imbalance_threshold: env_f64("ARB_IMBALANCE_THRESHOLD", d.imbalance_threshold),
            profit_threshold: env_f64("ARB_PROFIT_THRESHOLD", d.profit_threshold),
            max_single_leg_price: env_f64("ARB_MAX_SINGLE_LEG_PRICE", d.max_single_leg_price),
            closeout_threshold: env_f64("ARB_CLOSEOUT_THRESHOLD", d.closeout_threshold),
        }
    }
}

/// Execution mode for the backtest engine. Spec §9 Open Question: "limit"
/// is canonical; "immediate" is a diagnostic-only crutch. A single run
/// picks exactly one and never blends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Immediate,
    Limit,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Limit
    }
}

/// §6 backtest run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRunConfig {
    pub initial_capital: f64,
    pub execution_mode: ExecutionMode,
    pub fill_marketable_immediately: bool,
    pub validate_trades: bool,
    pub verbose: bool,
}

impl Default for BacktestRunConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            execution_mode: ExecutionMode::Limit,
            fill_marketable_immediately: true,
            validate_trades: false,
            verbose: false,
        }
    }
}

impl BacktestRunConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            initial_capital: env_f64("BACKTEST_INITIAL_CAPITAL", d.initial_capital),
            execution_mode: if env_bool("BACKTEST_IMMEDIATE_MODE", false) {
                ExecutionMode::Immediate
            } else {
                ExecutionMode::Limit
            },
            fill_marketable_immediately: env_bool(
                "BACKTEST_FILL_MARKETABLE_IMMEDIATELY",
                d.fill_marketable_immediately,
            ),
            validate_trades: env_bool("BACKTEST_VALIDATE_TRADES", d.validate_trades),
            verbose: env_bool("BACKTEST_VERBOSE", d.verbose),
        }
    }
}

/// Top-level config, generalized from the teacher's `Config` (see
/// `strategies/test_helpers.rs::make_config()`) onto SPEC_FULL.md §6.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub market_id: String,
    pub signal: SignalConfig,
    pub exposure: ExposureConfig,
    pub risk: RiskConfig,
    pub arbitrage: ArbitrageConfig,
    pub backtest: BacktestRunConfig,
    pub max_order_age_s: f64,
    pub max_price_distance: f64,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market_id: "default-market".to_string(),
            signal: SignalConfig::default(),
            exposure: ExposureConfig::default(),
            risk: RiskConfig::default(),
            arbitrage: ArbitrageConfig::default(),
            backtest: BacktestRunConfig::default(),
            max_order_age_s: 3.0,
            max_price_distance: 0.02,
            dry_run: true,
        }
    }
}

impl Config {
    /// Loads `.env` (if present) then reads overrides from the process
    /// environment, falling back to defaults per-key on parse failure.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let d = Self::default();
        Self {
            market_id: env_string("MARKET_ID", &d.market_id),
            signal: SignalConfig::from_env(),
            exposure: ExposureConfig::from_env(),
            risk: RiskConfig::from_env(),
            arbitrage: ArbitrageConfig::from_env(),
            backtest: BacktestRunConfig::from_env(),
            max_order_age_s: env_f64("MAX_ORDER_AGE_S", d.max_order_age_s),
            max_price_distance: env_f64("MAX_PRICE_DISTANCE", d.max_price_distance),
            dry_run: env_bool("DRY_RUN", d.dry_run),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: build a default Config with no environment overrides.
    /// Expected: values match the SPEC_FULL.md §6 parameter table defaults.
    #[test]
    fn test_default_config_matches_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.signal.h_tau, 45.0);
        assert_eq!(cfg.exposure.q_max, 600.0);
        assert_eq!(cfg.risk.spread_halt, 0.04);
        assert_eq!(cfg.arbitrage.profit_threshold, 0.98);
        assert_eq!(cfg.backtest.execution_mode, ExecutionMode::Limit);
    }

    /// Scenario: env_f64 receives a non-finite string.
    /// Expected: the default value is used instead of propagating NaN/garbage.
    #[test]
    fn test_env_f64_falls_back_on_bad_value() {
        std::env::set_var("TEST_BAD_F64", "not-a-number");
        let v = env_f64("TEST_BAD_F64", 42.0);
        assert_eq!(v, 42.0);
        std::env::remove_var("TEST_BAD_F64");
    }
}
