//! `recorder` binary: validates a recorded snapshot/tick CSV pair before it
//! is fed to the backtest or optimizer tools. The teacher's own
//! `bin/recorder.rs` streams Binance/Polymarket websockets live to CSV;
//! that live-feed half is out of scope here (SPEC_FULL.md §1, §6), so this
//! binary keeps the teacher's CSV-quality-check spirit and reuses this
//! crate's own loaders instead of reimplementing a network recorder.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dualmarket_arb::backtest::engine::{load_snapshots_csv, load_ticks_csv};
use dualmarket_arb::types::{Outcome, Tick};

#[derive(Parser, Debug)]
#[command(about = "Validate a recorded session's snapshot/tick CSVs")]
struct Args {
    #[arg(long)]
    snapshots: String,

    #[arg(long)]
    ticks: Option<String>,
}

fn tick_gap_stats(ticks: &[Tick]) -> (usize, usize) {
    let yes = ticks.iter().filter(|t| t.outcome == Outcome::Yes).count();
    let no = ticks.iter().filter(|t| t.outcome == Outcome::No).count();
    (yes, no)
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let snapshots = match load_snapshots_csv(&args.snapshots) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[RECORDER] failed to load snapshots: {e}");
            std::process::exit(1);
        }
    };

    let mut invalid = 0;
    let mut corrections = 0;
    let mut out_of_order = 0;
    let mut last_ts: Option<i64> = None;
    for snapshot in &snapshots {
        if !snapshot.is_valid() {
            invalid += 1;
        }
        let corrected = snapshot.correct_inversions();
        corrections += corrected.inverted_corrections as usize;
        if let Some(last) = last_ts {
            if snapshot.ts_ms < last {
                out_of_order += 1;
            }
        }
        last_ts = Some(snapshot.ts_ms);
    }

    let span_ms = snapshots.last().map(|s| s.ts_ms).unwrap_or(0) - snapshots.first().map(|s| s.ts_ms).unwrap_or(0);

    println!("snapshots:        {}", snapshots.len());
    println!("invalid:          {invalid}");
    println!("inverted_legs:    {corrections}");
    println!("out_of_order:     {out_of_order}");
    println!("span_s:           {:.1}", span_ms as f64 / 1000.0);

    if let Some(path) = &args.ticks {
        match load_ticks_csv(path) {
            Ok(ticks) => {
                let (yes, no) = tick_gap_stats(&ticks);
                println!("ticks:            {}", ticks.len());
                println!("  yes_ticks:      {yes}");
                println!("  no_ticks:       {no}");
            }
            Err(e) => eprintln!("[RECORDER] failed to load ticks: {e}"),
        }
    }

    if invalid > 0 || out_of_order > 0 {
        std::process::exit(2);
    }
}
