//! `bot` binary: the live Bot Runtime Loop entrypoint (SPEC_FULL.md §4.10).
//! This crate ships no concrete exchange feed or order gateway (SPEC_FULL.md
//! §1, §6), so this binary's only runnable mode is a dry run: it replays a
//! recorded snapshot CSV through `BotRuntime` against the in-memory
//! `DryRunGateway`/`LoggingRepository` stand-ins from `runtime::demo`. A
//! production deployment wires `main` up to real `MarketFeed`/`OrderGateway`
//! implementations living outside this crate instead.

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use dualmarket_arb::backtest::engine::load_snapshots_csv;
use dualmarket_arb::config::Config;
use dualmarket_arb::gateway::{FeedEvent, MarketFeed};
use dualmarket_arb::runtime::arb::{ArbRuntime, ArbStepOutcome};
use dualmarket_arb::runtime::bot::{BotRuntime, StepOutcome};
use dualmarket_arb::runtime::demo::{CsvReplayFeed, DryRunGateway, LoggingRepository};
use dualmarket_arb::types::OrderBookSnapshot;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum Strategy {
    /// Time-Above-0.5 signal-driven dual-outcome strategy (SPEC_FULL.md §4.2-§4.6).
    Ta50,
    /// Time-triggered leg-balancing arbitrage strategy (SPEC_FULL.md §4.7).
    Arb,
}

#[derive(Parser, Debug)]
#[command(about = "Dual-outcome prediction-market bot (dry-run demo runner)")]
struct Args {
    /// Path to a recorded snapshot CSV: ts_ms,yes_bid,yes_ask,no_bid,no_ask
    #[arg(long)]
    snapshots: String,

    /// Resolution timestamp (ms); 0 lets the runtime assume a 15-minute horizon
    #[arg(long, default_value_t = 0)]
    market_end_ms: i64,

    /// Which strategy drives this bot instance
    #[arg(long, value_enum, default_value_t = Strategy::Ta50)]
    strategy: Strategy,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Config::from_env();

    eprintln!("==================================================");
    eprintln!(" dualmarket-arb bot (dry run)");
    eprintln!(" market_id: {}", config.market_id);
    eprintln!(" strategy:  {:?}", args.strategy);
    eprintln!(" snapshots: {}", args.snapshots);
    eprintln!(" dry_run:   {}", config.dry_run);
    eprintln!("==================================================");

    let snapshots = match load_snapshots_csv(&args.snapshots) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[MAIN] failed to load snapshots: {e}");
            return;
        }
    };
    eprintln!("[MAIN] loaded {} snapshots", snapshots.len());

    let gateway = DryRunGateway::new();
    let repo = LoggingRepository;
    let mut feed = CsvReplayFeed::new(snapshots, 0, 0.01);

    let mut step_count = 0u64;
    match args.strategy {
        Strategy::Ta50 => {
            let mut runtime = BotRuntime::new(config.market_id.clone(), config.clone());
            while let Some(event) = feed.next_event().await {
                let FeedEvent::Snapshot { ts_ms, yes_bid, yes_ask, no_bid, no_ask, .. } = event else {
                    continue;
                };
                let snapshot = OrderBookSnapshot { ts_ms, yes_bid, yes_ask, no_bid, no_ask, inverted_corrections: 0 };

                let outcome = runtime
                    .on_snapshot(&gateway, &repo, snapshot, feed.tick_size(&config.market_id).unwrap_or(0.01), args.market_end_ms, ts_ms)
                    .await;

                match outcome {
                    StepOutcome::Submitted { order_id, action } => {
                        eprintln!("[MAIN] t={ts_ms} submitted order {order_id}: {:?} {:?} qty={:.2}", action.side, action.outcome, action.quantity);
                    }
                    StepOutcome::PlacementFailed { reason, .. } => {
                        eprintln!("[MAIN] t={ts_ms} placement failed: {reason}");
                    }
                    StepOutcome::Rejected(rejection) => {
                        eprintln!("[MAIN] t={ts_ms} rejected: {}", rejection.reason());
                    }
                    StepOutcome::NoAction => {}
                }

                runtime.cancel_stale_orders(&gateway, &snapshot, ts_ms).await;
                step_count += 1;
            }
        }
        Strategy::Arb => {
            let mut runtime = ArbRuntime::new(config.market_id.clone(), config.clone(), 0);
            while let Some(event) = feed.next_event().await {
                let FeedEvent::Snapshot { ts_ms, yes_bid, yes_ask, no_bid, no_ask, .. } = event else {
                    continue;
                };
                let snapshot = OrderBookSnapshot { ts_ms, yes_bid, yes_ask, no_bid, no_ask, inverted_corrections: 0 };

                let outcome = runtime
                    .on_snapshot(&gateway, &snapshot, feed.tick_size(&config.market_id).unwrap_or(0.01), args.market_end_ms, ts_ms)
                    .await;

                match outcome {
                    ArbStepOutcome::Submitted { order_id, decision } => {
                        eprintln!("[MAIN] t={ts_ms} submitted arb order {order_id}: {:?} qty={:.2} prio={:?}", decision.outcome, decision.quantity, decision.priority);
                    }
                    ArbStepOutcome::PlacementFailed { reason, .. } => {
                        eprintln!("[MAIN] t={ts_ms} arb placement failed: {reason}");
                    }
                    ArbStepOutcome::NoAction => {}
                }

                runtime.cancel_stale_orders(&gateway, &snapshot, ts_ms).await;
                step_count += 1;
            }
        }
    }

    eprintln!("[MAIN] dry run complete: {step_count} snapshots processed");
}
