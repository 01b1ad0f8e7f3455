//! `optimize` binary: runs the Phased Parameter Optimizer (SPEC_FULL.md
//! §4.12) against a single recorded session, evaluating each candidate
//! parameter set with one full backtest run. The teacher repo has no
//! optimizer of its own (DESIGN.md); this CLI follows the same
//! load-CSV/run-tool shape as `bin/backtest/main.rs`.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dualmarket_arb::backtest::engine::{load_snapshots_csv, load_ticks_csv, run_session, SessionData};
use dualmarket_arb::config::Config;
use dualmarket_arb::gateway::{OptimizationRunRecord, Repository};
use dualmarket_arb::metrics::Metrics;
use dualmarket_arb::optimizer::{
    run_optimizer, Algorithm, EvalResult, MetricKind, OptimizerObserver, ParamSet, ParameterRange, Phase,
};
use dualmarket_arb::runtime::demo::LoggingRepository;

#[derive(Parser, Debug)]
#[command(about = "Grid-search optimizer over a recorded session")]
struct Args {
    #[arg(long)]
    snapshots: String,

    #[arg(long)]
    ticks: Option<String>,

    #[arg(long)]
    end_ms: i64,

    #[arg(long, default_value_t = 0.01)]
    tick_size: f64,

    /// Exhaustive-phase combination cap
    #[arg(long, default_value_t = 500)]
    grid_cap: usize,

    /// Terminal multi-stage phase evaluation budget
    #[arg(long, default_value_t = 100)]
    terminal_budget: usize,
}

/// Applies a candidate parameter set onto a base config, SPEC_FULL.md
/// §4.12's candidates being keyed by the same field names used in
/// `SignalConfig`/`ExposureConfig`/`RiskConfig`/`ArbitrageConfig`.
fn apply_params(base: &Config, params: &ParamSet) -> Config {
    let mut cfg = base.clone();
    for (key, value) in params {
        match key.as_str() {
            "h_tau" => cfg.signal.h_tau = *value,
            "h_d" => cfg.signal.h_d = *value,
            "a_min" => cfg.signal.a_min = *value,
            "delta0" => cfg.signal.delta0 = *value,
            "k" => cfg.exposure.k = *value,
            "q_step" => cfg.exposure.q_step = *value,
            "e_enter" => cfg.exposure.e_enter = *value,
            "e_exit" => cfg.exposure.e_exit = *value,
            "e_taker" => cfg.exposure.e_taker = *value,
            "spread_max_entry" => cfg.risk.spread_max_entry = *value,
            "rebalance_interval_s" => cfg.risk.rebalance_interval_s = *value,
            "cooldown_s" => cfg.risk.cooldown_s = *value,
            "min_hold_s" => cfg.risk.min_hold_s = *value,
            "imbalance_threshold" => cfg.arbitrage.imbalance_threshold = *value,
            "profit_threshold" => cfg.arbitrage.profit_threshold = *value,
            _ => {}
        }
    }
    cfg
}

struct TracingObserver;

impl OptimizerObserver for TracingObserver {
    fn on_progress(&mut self, overall_pct: f64, phase_name: &str, current_best: Option<&EvalResult>) {
        match current_best {
            Some(best) => info!(phase = phase_name, overall_pct, score = best.score, "optimizer progress"),
            None => info!(phase = phase_name, overall_pct, "optimizer progress"),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let base_config = Config::from_env();

    let snapshots = match load_snapshots_csv(&args.snapshots) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[OPTIMIZE] failed to load snapshots: {e}");
            std::process::exit(1);
        }
    };
    let ticks = match &args.ticks {
        Some(path) => load_ticks_csv(path).unwrap_or_default(),
        None => Vec::new(),
    };

    let data = SessionData {
        end_ms: args.end_ms,
        snapshots,
        ticks,
        tick_size: args.tick_size,
    };

    let evaluate = |params: &ParamSet| -> Metrics {
        let cfg = apply_params(&base_config, params);
        match run_session(&cfg, &data) {
            Ok(report) => report.metrics,
            Err(_) => Metrics::default(),
        }
    };

    let grid_phase = Phase {
        phase_no: 1,
        name: "exposure_grid".to_string(),
        parameter_ranges: vec![
            ("e_enter".to_string(), ParameterRange { min: 0.10, max: 0.26, step: 0.04 }),
            ("e_exit".to_string(), ParameterRange { min: 0.04, max: 0.16, step: 0.04 }),
            ("q_step".to_string(), ParameterRange { min: 5.0, max: 20.0, step: 5.0 }),
        ],
        optimize_metric: MetricKind::Composite,
        constraints: vec![Box::new(|p: &ParamSet| {
            p.get("e_exit").copied().unwrap_or(0.0) < p.get("e_enter").copied().unwrap_or(1.0)
        })],
        top_n: 5,
        early_stop_threshold: None,
        skip_if_negative: false,
        algorithm: Algorithm::Exhaustive,
        max_combinations: args.grid_cap,
    };

    let terminal_phase = Phase {
        phase_no: 2,
        name: "terminal".to_string(),
        parameter_ranges: vec![],
        optimize_metric: MetricKind::Composite,
        constraints: vec![],
        top_n: 5,
        early_stop_threshold: None,
        skip_if_negative: false,
        algorithm: Algorithm::MultiStage,
        max_combinations: args.terminal_budget,
    };

    let mut observer = TracingObserver;
    let base_params = ParamSet::new();
    let summaries = match run_optimizer(&[grid_phase, terminal_phase], base_params, evaluate, &mut observer) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[OPTIMIZE] aborted: {e}");
            std::process::exit(1);
        }
    };

    let repo = LoggingRepository::default();
    repo.save_optimization_run(
        OptimizationRunRecord {
            id: args.snapshots.clone(),
            session_ids: vec![args.snapshots.clone()],
            strategy_slug: "ta50".to_string(),
        },
        summaries.clone(),
    )
    .await;

    for summary in &summaries {
        println!(
            "phase {} ({}): evaluated={} skipped={}",
            summary.phase_no, summary.name, summary.evaluated, summary.skipped
        );
        if let Some(best) = summary.top.first() {
            let mut keys: Vec<&String> = best.params.keys().collect();
            keys.sort();
            let params_str: Vec<String> = keys.iter().map(|k| format!("{}={:.4}", k, best.params[*k])).collect();
            println!("  best score={:.4} params: {}", best.score, params_str.join(", "));
        }
    }
}
