//! `backtest` binary: runs the Backtest Engine (SPEC_FULL.md §4.8) over a
//! single recorded session and prints the resulting metrics. Grounded on
//! the teacher's `bin/backtest/main.rs` CLI shape minus its ratatui/crossterm
//! TUI, which this crate does not carry (DESIGN.md).

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dualmarket_arb::backtest::engine::{load_snapshots_csv, load_ticks_csv, run_session, SessionData};
use dualmarket_arb::config::Config;
use dualmarket_arb::gateway::{BacktestRunRecord, Repository};
use dualmarket_arb::runtime::demo::LoggingRepository;

#[derive(Parser, Debug)]
#[command(about = "Replay a recorded session through the backtest engine")]
struct Args {
    /// Path to a snapshot CSV: ts_ms,yes_bid,yes_ask,no_bid,no_ask
    #[arg(long)]
    snapshots: String,

    /// Path to a tick CSV: ts_ms,outcome,price,size (optional in immediate mode)
    #[arg(long)]
    ticks: Option<String>,

    /// Market resolution timestamp in ms
    #[arg(long)]
    end_ms: i64,

    /// Tick size used for maker-side price rounding
    #[arg(long, default_value_t = 0.01)]
    tick_size: f64,

    /// Starting cash for the session's book
    #[arg(long)]
    initial_capital: Option<f64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(capital) = args.initial_capital {
        config.backtest.initial_capital = capital;
    }

    let snapshots = match load_snapshots_csv(&args.snapshots) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[BACKTEST] failed to load snapshots: {e}");
            std::process::exit(1);
        }
    };
    let ticks = match &args.ticks {
        Some(path) => match load_ticks_csv(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("[BACKTEST] failed to load ticks: {e}");
                std::process::exit(1);
            }
        },
        None => Vec::new(),
    };

    eprintln!("[BACKTEST] {} snapshots, {} ticks, mode={:?}", snapshots.len(), ticks.len(), config.backtest.execution_mode);

    let data = SessionData {
        end_ms: args.end_ms,
        snapshots,
        ticks,
        tick_size: args.tick_size,
    };

    let report = match run_session(&config, &data) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[BACKTEST] run failed: {e}");
            std::process::exit(1);
        }
    };

    let repo = LoggingRepository::default();
    repo.save_backtest_run(BacktestRunRecord {
        id: args.snapshots.clone(),
        session_ids: vec![args.snapshots.clone()],
        strategy_slug: "ta50".to_string(),
        execution_mode: config.backtest.execution_mode,
        initial_capital: config.backtest.initial_capital,
        trade_count: report.trades.len(),
        metrics: report.metrics,
    })
    .await;

    let m = report.metrics;
    println!("trades:              {}", report.trades.len());
    println!("total_pnl:           {:.4}", m.total_pnl);
    println!("total_return_pct:    {:.2}%", m.total_return_pct);
    println!("sharpe:              {:.3}", m.sharpe);
    println!("sortino:             {:.3}", m.sortino_ratio);
    println!("max_drawdown_pct:    {:.2}%", m.max_drawdown_pct);
    println!("win_rate:            {:.2}%", m.win_rate * 100.0);
    println!("profit_factor:       {:.3}", m.profit_factor);
    println!("avg_trade_pnl:       {:.4}", m.avg_trade_pnl);
    println!("max_consec_wins:     {}", m.max_consecutive_wins);
    println!("max_consec_losses:   {}", m.max_consecutive_losses);
    println!("recovery_factor:     {:.3}", m.recovery_factor);
    println!(
        "matcher: created={} filled={} expired={} fill_rate={:.1}%",
        report.matcher_stats.orders_created,
        report.matcher_stats.orders_filled,
        report.matcher_stats.orders_expired,
        report.matcher_stats.fill_rate() * 100.0
    );
}
