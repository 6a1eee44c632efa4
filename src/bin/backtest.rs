//! Backtest Runner
//!
//! Replays the strategy over CSV history with the enhanced exit stack.
//!
//! Usage:
//!   cargo run --bin backtest <csv_dir> [benchmark]
//!
//! The directory must contain one `SYMBOL_daily.csv` per symbol,
//! including the benchmark (default SPY).

use anyhow::Result;
use std::env;
use std::path::Path;

use meridian::backtest::{BacktestEngine, BacktestParams};
use meridian::data::HistoricalData;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("================================================================");
        println!("                   MERIDIAN BACKTESTER                         ");
        println!("================================================================");
        println!();
        println!("Usage: backtest <csv_dir> [benchmark]");
        println!();
        println!("Arguments:");
        println!("  csv_dir    Directory of historical data (required)");
        println!("  benchmark  Benchmark symbol (default: SPY)");
        println!();
        println!("CSV Format: timestamp,open,high,low,close,volume");
        println!("  - timestamp: Unix epoch seconds");
        println!("  - First row is header (skipped)");
        println!("  - One SYMBOL_daily.csv per symbol, benchmark included");
        println!("================================================================");
        return Ok(());
    }

    let csv_dir = &args[1];
    let benchmark = args.get(2).map(|s| s.to_uppercase()).unwrap_or_else(|| "SPY".to_string());

    println!("================================================================");
    println!("                   MERIDIAN BACKTESTER                         ");
    println!("================================================================");
    println!();
    println!("Loading: {}", csv_dir);

    let data = HistoricalData::load_dir(Path::new(csv_dir))?;
    println!("Loaded {} symbols", data.len());

    if !data.contains(&benchmark) {
        println!("Benchmark {} not found in {}. Aborting.", benchmark, csv_dir);
        return Ok(());
    }

    println!("Benchmark: {}", benchmark);
    println!();
    println!("Running backtest...");
    println!();

    let engine = BacktestEngine::new(BacktestParams::default());
    let result = engine.run(&data, &benchmark, None, None)?;

    result.print_summary();

    if !result.trades.is_empty() {
        result.print_trades(10);
    } else {
        println!();
        println!("No trades generated.");
        println!();
        println!("This could mean:");
        println!("  - Not enough warmup bars (need 22+ per symbol)");
        println!("  - No symbol crossed the RRS threshold");
        println!("  - Structure filters rejected every signal");
        println!();
    }

    Ok(())
}
