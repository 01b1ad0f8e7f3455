//! `replay` binary: a step-by-step human-readable trace of the shared
//! pipeline (SPEC_FULL.md §2) over a recorded snapshot CSV. Unlike
//! `backtest`, this tool does no cash/order accounting or metrics; it
//! exists purely to inspect consensus/signal/decision output snapshot by
//! snapshot while tuning parameters, mirroring the teacher's
//! `bin/replay/*` debug-trace tooling minus its ratatui TUI (DESIGN.md).

use std::collections::HashMap;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dualmarket_arb::backtest::engine::load_snapshots_csv;
use dualmarket_arb::config::Config;
use dualmarket_arb::engine::decision::TradeAction;
use dualmarket_arb::engine::pipeline::{process_step, DecisionSink};
use dualmarket_arb::engine::signal::SignalOutput;
use dualmarket_arb::engine::state::BotStrategyState;
use dualmarket_arb::error::RiskRejection;
use dualmarket_arb::market::consensus::ConsensusPrice;
use dualmarket_arb::types::{Outcome, Position, Side};

#[derive(Parser, Debug)]
#[command(about = "Print a step-by-step pipeline trace over a recorded session")]
struct Args {
    #[arg(long)]
    snapshots: String,

    #[arg(long, default_value_t = 0)]
    end_ms: i64,

    /// Only print steps where an action was decided or rejected
    #[arg(long, default_value_t = false)]
    actions_only: bool,
}

#[derive(Default)]
struct TraceSink {
    last_signal: Option<SignalOutput>,
    last_consensus: Option<ConsensusPrice>,
    action: Option<TradeAction>,
    rejection: Option<RiskRejection>,
}

impl DecisionSink for TraceSink {
    fn on_signal(&mut self, signal: &SignalOutput, consensus: &ConsensusPrice, _now_ms: i64) {
        self.last_signal = Some(*signal);
        self.last_consensus = Some(*consensus);
    }
    fn on_action(&mut self, action: &TradeAction, _now_ms: i64) {
        self.action = Some(action.clone());
    }
    fn on_rejected(&mut self, rejection: &RiskRejection, _now_ms: i64) {
        self.rejection = Some(rejection.clone());
    }
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Config::from_env();

    let snapshots = match load_snapshots_csv(&args.snapshots) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[REPLAY] failed to load snapshots: {e}");
            std::process::exit(1);
        }
    };

    let mut state = BotStrategyState::default();
    let mut positions: HashMap<Outcome, Position> = HashMap::new();

    for snapshot in &snapshots {
        let inv_yes = positions.get(&Outcome::Yes).copied().unwrap_or_default().size;
        let inv_no = positions.get(&Outcome::No).copied().unwrap_or_default().size;

        let time_to_resolution_minutes = if args.end_ms > 0 {
            ((args.end_ms - snapshot.ts_ms).max(0) as f64 / 60_000.0).max(0.0)
        } else {
            15.0
        };

        let mut sink = TraceSink::default();
        process_step(&config, &mut state, snapshot, inv_yes, inv_no, time_to_resolution_minutes, snapshot.ts_ms, &mut sink);

        let has_action = sink.action.is_some() || sink.rejection.is_some();
        if args.actions_only && !has_action {
            continue;
        }

        let (tau, edge, theta, in_deadband) = sink
            .last_signal
            .map(|s| (s.tau, s.edge, s.theta, s.in_deadband))
            .unwrap_or((0.5, 0.0, 0.0, true));
        let consensus_p = sink.last_consensus.map(|c| c.p).unwrap_or(0.5);

        print!(
            "t={:>10} p={:.4} tau={:.4} edge={:+.4} theta={:.3} deadband={}",
            snapshot.ts_ms, consensus_p, tau, edge, theta, in_deadband
        );

        if let Some(action) = sink.action {
            println!(
                "  ACTION {:?} {:?} qty={:.2} unwind={}",
                action.side, action.outcome, action.quantity, action.is_unwind
            );
            let pos = positions.entry(action.outcome).or_default();
            match action.side {
                Side::Buy => pos.apply_buy(consensus_p, action.quantity),
                Side::Sell => {
                    pos.apply_sell(consensus_p, action.quantity);
                }
            }
        } else if let Some(rejection) = &sink.rejection {
            println!("  REJECTED {}", rejection.reason());
        } else {
            println!();
        }
    }
}
