//! Parameter Optimizer Runner
//!
//! Grid search with walk-forward validation over CSV history.
//!
//! Usage:
//!   cargo run --bin optimize <csv_dir> [benchmark] [results.json]

use anyhow::Result;
use std::env;
use std::path::Path;

use meridian::backtest::{BacktestParams, ParameterGrid, ParameterOptimizer};
use meridian::data::HistoricalData;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("================================================================");
        println!("                   MERIDIAN OPTIMIZER                          ");
        println!("================================================================");
        println!();
        println!("Usage: optimize <csv_dir> [benchmark] [results.json]");
        println!();
        println!("Runs the default parameter grid over the training window,");
        println!("re-scores the leaders on the following validation window,");
        println!("and recommends the best out-of-sample candidate.");
        println!("================================================================");
        return Ok(());
    }

    let csv_dir = &args[1];
    let benchmark = args.get(2).map(|s| s.to_uppercase()).unwrap_or_else(|| "SPY".to_string());

    println!("Loading: {}", csv_dir);
    let data = HistoricalData::load_dir(Path::new(csv_dir))?;
    println!("Loaded {} symbols", data.len());

    if !data.contains(&benchmark) {
        println!("Benchmark {} not found in {}. Aborting.", benchmark, csv_dir);
        return Ok(());
    }

    let sessions = data.get(&benchmark).map(|b| b.len()).unwrap_or(0);
    // Roughly 3:1 train/validate split of the available history
    let validation = (sessions / 4).max(20);
    let training = sessions.saturating_sub(validation);

    let optimizer = ParameterOptimizer::new(BacktestParams::default());
    let grid = ParameterGrid::default();

    println!(
        "Walk-forward: {} training sessions, {} validation sessions, {} candidates",
        training,
        validation,
        grid.candidates().len()
    );
    println!();

    let report = optimizer.walk_forward(&data, &benchmark, &grid, training, validation)?;

    optimizer.print_summary(&report.training_ranking, 10);

    println!();
    println!("SELECTED (best validation score):");
    println!("  RRS Threshold:     {}", report.selected.signal_threshold);
    println!("  Stop Multiplier:   {}x ATR", report.selected.stop_atr_multiplier);
    println!("  Target Multiplier: {}x ATR", report.selected.target_atr_multiplier);
    println!("  Max Positions:     {}", report.selected.max_positions);
    println!();
    println!("  Training score:    {:.1}", report.training_score);
    println!("  Validation score:  {:.1}", report.validation_score);
    println!("  WF efficiency:     {:.2}", report.efficiency);
    if report.overfit_warning {
        println!();
        println!("  WARNING: validation score well below training score.");
        println!("  The selected parameters look overfit; treat with caution.");
    }

    if let Some(out) = args.get(3) {
        optimizer.export_json(&report.training_ranking, Path::new(out))?;
        println!();
        println!("Results saved to {}", out);
    }

    Ok(())
}
