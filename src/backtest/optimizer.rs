//! Parameter optimizer
//!
//! Grid search over strategy parameters with walk-forward validation:
//! candidates are ranked on a training window, the leaders are re-scored
//! on a disjoint subsequent validation window, and the winner is the best
//! VALIDATION score. Walk-forward efficiency below the configured floor
//! is reported as a warning, never suppressed.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backtest::engine::{BacktestEngine, BacktestParams, BacktestResult};
use crate::data::HistoricalData;
use crate::error::TradingError;

/// Candidate values for each tunable parameter. The grid is their
/// cartesian product, minus combinations where the target does not clear
/// the stop.
#[derive(Debug, Clone)]
pub struct ParameterGrid {
    pub signal_thresholds: Vec<f64>,
    pub stop_multipliers: Vec<Decimal>,
    pub target_multipliers: Vec<Decimal>,
    pub max_positions: Vec<usize>,
    pub min_structure_scores: Vec<u8>,
}

impl Default for ParameterGrid {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            signal_thresholds: vec![1.5, 1.75, 2.0, 2.25, 2.5],
            stop_multipliers: vec![dec!(0.5), dec!(0.75), dec!(1.0), dec!(1.25)],
            target_multipliers: vec![dec!(1.25), dec!(1.5), dec!(2.0), dec!(2.5), dec!(3.0)],
            max_positions: vec![3, 5, 7],
            min_structure_scores: vec![3],
        }
    }
}

/// One point in the parameter grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateParams {
    pub signal_threshold: f64,
    pub stop_atr_multiplier: Decimal,
    pub target_atr_multiplier: Decimal,
    pub max_positions: usize,
    pub min_structure_score: u8,
}

impl CandidateParams {
    /// Overlay this candidate onto the base backtest configuration
    pub fn apply(&self, base: &BacktestParams) -> BacktestParams {
        let mut params = base.clone();
        params.signal_threshold = self.signal_threshold;
        params.min_structure_score = self.min_structure_score;
        params.limits.max_positions = self.max_positions;
        params.exits.stop_atr_multiplier = self.stop_atr_multiplier;
        params.exits.target_atr_multiplier = self.target_atr_multiplier;
        params
    }
}

impl ParameterGrid {
    /// Enumerate valid candidates in deterministic order
    pub fn candidates(&self) -> Vec<CandidateParams> {
        let mut out = Vec::new();
        for &threshold in &self.signal_thresholds {
            for &stop in &self.stop_multipliers {
                for &target in &self.target_multipliers {
                    // Target must clear the stop for a positive R/R
                    if target <= stop {
                        continue;
                    }
                    for &max_positions in &self.max_positions {
                        for &score in &self.min_structure_scores {
                            out.push(CandidateParams {
                                signal_threshold: threshold,
                                stop_atr_multiplier: stop,
                                target_atr_multiplier: target,
                                max_positions,
                                min_structure_score: score,
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

/// Composite score weights. Configuration, not hardcoded business logic.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub return_weight: f64,
    pub profit_factor_weight: f64,
    pub sharpe_weight: f64,
    pub drawdown_weight: f64,
    pub win_rate_weight: f64,
    /// Below this many trades a run scores zero
    pub min_trades: usize,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            return_weight: 0.30,
            profit_factor_weight: 0.25,
            sharpe_weight: 0.20,
            drawdown_weight: 0.15,
            win_rate_weight: 0.10,
            min_trades: 10,
        }
    }
}

/// Composite score, roughly 0-100. Each component is normalized to the
/// same range before weighting; drawdown is inverted (lower is better).
pub fn composite_score(weights: &ScoreWeights, result: &BacktestResult) -> f64 {
    if result.total_trades < weights.min_trades {
        return 0.0;
    }

    let return_pct = result.total_return_pct.to_f64().unwrap_or(0.0);
    let profit_factor = result.profit_factor.to_f64().unwrap_or(0.0);
    let drawdown_pct = result.max_drawdown_pct.to_f64().unwrap_or(0.0);

    let return_score = (return_pct * 2.0).clamp(0.0, 100.0);
    let pf_score = ((profit_factor - 1.0) * 50.0).clamp(0.0, 100.0);
    let sharpe_score = (result.sharpe_ratio * 33.33).clamp(0.0, 100.0);
    let dd_score = (100.0 - drawdown_pct * 5.0).clamp(0.0, 100.0);
    let wr_score = ((result.win_rate * 100.0 - 20.0) * 2.5).clamp(0.0, 100.0);

    let mut score = return_score * weights.return_weight
        + pf_score * weights.profit_factor_weight
        + sharpe_score * weights.sharpe_weight
        + dd_score * weights.drawdown_weight
        + wr_score * weights.win_rate_weight;

    // Larger samples are statistically more trustworthy
    if result.total_trades >= 100 {
        score *= 1.2;
    } else if result.total_trades >= 50 {
        score *= 1.1;
    }

    (score * 100.0).round() / 100.0
}

/// Compact metrics exported per candidate
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeMetrics {
    pub total_return_pct: Decimal,
    pub win_rate: f64,
    pub profit_factor: Decimal,
    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
}

impl From<&BacktestResult> for OutcomeMetrics {
    fn from(result: &BacktestResult) -> Self {
        Self {
            total_return_pct: result.total_return_pct,
            win_rate: result.win_rate,
            profit_factor: result.profit_factor,
            max_drawdown_pct: result.max_drawdown_pct,
            sharpe_ratio: result.sharpe_ratio,
            total_trades: result.total_trades,
        }
    }
}

/// One scored candidate
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationOutcome {
    pub rank: usize,
    pub params: CandidateParams,
    pub score: f64,
    pub metrics: OutcomeMetrics,
}

/// Walk-forward result: the selected candidate plus the evidence
#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardReport {
    pub selected: CandidateParams,
    pub training_score: f64,
    pub validation_score: f64,
    /// validation / training; below the floor means overfitting
    pub efficiency: f64,
    pub overfit_warning: bool,
    pub training_ranking: Vec<OptimizationOutcome>,
    pub validation_ranking: Vec<OptimizationOutcome>,
}

pub struct ParameterOptimizer {
    base: BacktestParams,
    weights: ScoreWeights,
    /// Training leaders carried into the validation window
    top_k: usize,
    /// Walk-forward efficiency below this emits a warning
    efficiency_floor: f64,
}

impl ParameterOptimizer {
    pub fn new(base: BacktestParams) -> Self {
        Self {
            base,
            weights: ScoreWeights::default(),
            top_k: 10,
            efficiency_floor: 0.6,
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_efficiency_floor(mut self, floor: f64) -> Self {
        self.efficiency_floor = floor;
        self
    }

    /// Score every candidate over one window, best first.
    pub fn run_grid(
        &self,
        data: &HistoricalData,
        benchmark: &str,
        candidates: &[CandidateParams],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<OptimizationOutcome>, TradingError> {
        let mut outcomes = Vec::with_capacity(candidates.len());

        for (i, candidate) in candidates.iter().enumerate() {
            let engine = BacktestEngine::new(candidate.apply(&self.base));
            let result = engine.run(data, benchmark, start, end)?;
            let score = composite_score(&self.weights, &result);
            outcomes.push(OptimizationOutcome {
                rank: 0,
                params: candidate.clone(),
                score,
                metrics: OutcomeMetrics::from(&result),
            });
            if (i + 1) % 25 == 0 {
                info!("optimizer: {}/{} backtests complete", i + 1, candidates.len());
            }
        }

        // Stable sort keeps grid order among ties, so ranking stays
        // deterministic
        outcomes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        for (i, outcome) in outcomes.iter_mut().enumerate() {
            outcome.rank = i + 1;
        }
        Ok(outcomes)
    }

    /// Walk-forward: rank on the training window, carry the top K into
    /// the disjoint validation window that follows it, and select by
    /// validation score.
    pub fn walk_forward(
        &self,
        data: &HistoricalData,
        benchmark: &str,
        grid: &ParameterGrid,
        training_sessions: usize,
        validation_sessions: usize,
    ) -> Result<WalkForwardReport, TradingError> {
        if training_sessions < 2 || validation_sessions < 2 {
            return Err(TradingError::Configuration(
                "walk-forward windows need at least two sessions each".to_string(),
            ));
        }
        let bench_bars = data.get(benchmark).ok_or_else(|| {
            TradingError::Configuration(format!("benchmark {} not loaded", benchmark))
        })?;
        let all_dates: Vec<NaiveDate> = bench_bars.iter().map(|b| b.time.date_naive()).collect();
        let needed = training_sessions + validation_sessions;
        if all_dates.len() < needed {
            return Err(TradingError::Configuration(format!(
                "walk-forward needs {} sessions, have {}",
                needed,
                all_dates.len()
            )));
        }

        let window = &all_dates[all_dates.len() - needed..];
        let train_start = window[0];
        let train_end = window[training_sessions - 1];
        let valid_start = window[training_sessions];
        let valid_end = *window.last().unwrap_or(&train_end);

        info!(
            "walk-forward: training {} to {}, validation {} to {}",
            train_start, train_end, valid_start, valid_end
        );

        let candidates = grid.candidates();
        let training_ranking =
            self.run_grid(data, benchmark, &candidates, Some(train_start), Some(train_end))?;

        let leaders: Vec<CandidateParams> = training_ranking
            .iter()
            .take(self.top_k)
            .map(|o| o.params.clone())
            .collect();
        let validation_ranking =
            self.run_grid(data, benchmark, &leaders, Some(valid_start), Some(valid_end))?;

        let best_validation = validation_ranking.first().ok_or_else(|| {
            TradingError::Configuration("validation window produced no outcomes".to_string())
        })?;
        let selected = best_validation.params.clone();
        let validation_score = best_validation.score;
        let training_score = training_ranking
            .iter()
            .find(|o| o.params == selected)
            .map(|o| o.score)
            .unwrap_or(0.0);

        let efficiency = if training_score > 0.0 {
            validation_score / training_score
        } else {
            0.0
        };
        let overfit_warning = efficiency < self.efficiency_floor;
        if overfit_warning {
            // Reported, never suppressed
            warn!(
                "walk-forward efficiency {:.2} below {:.2}: selected parameters look overfit \
                 to the training window",
                efficiency, self.efficiency_floor
            );
        }

        Ok(WalkForwardReport {
            selected,
            training_score,
            validation_score,
            efficiency,
            overfit_warning,
            training_ranking,
            validation_ranking,
        })
    }

    /// Export ranked outcomes as JSON
    pub fn export_json(
        &self,
        outcomes: &[OptimizationOutcome],
        path: &Path,
    ) -> Result<PathBuf, TradingError> {
        #[derive(Serialize)]
        struct Export<'a> {
            total_candidates: usize,
            top_10: &'a [OptimizationOutcome],
            all: &'a [OptimizationOutcome],
        }

        let export = Export {
            total_candidates: outcomes.len(),
            top_10: &outcomes[..outcomes.len().min(10)],
            all: outcomes,
        };
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| TradingError::Configuration(format!("serialize results: {}", e)))?;
        std::fs::write(path, json)
            .map_err(|e| TradingError::Configuration(format!("write {}: {}", path.display(), e)))?;
        info!("optimizer: results saved to {}", path.display());
        Ok(path.to_path_buf())
    }

    /// Print a ranked table of the best candidates
    pub fn print_summary(&self, outcomes: &[OptimizationOutcome], top_n: usize) {
        println!("================================================================================");
        println!("PARAMETER OPTIMIZATION RESULTS");
        println!("================================================================================");
        println!("Candidates tested: {}", outcomes.len());
        println!();
        println!(
            "{:<5} {:>5} {:>6} {:>7} {:>7} | {:>8} {:>8} {:>6} {:>6} {:>7}",
            "Rank", "RRS", "Stop", "Target", "MaxPos", "Return", "WinRate", "PF", "DD", "Score"
        );
        println!("--------------------------------------------------------------------------------");
        for outcome in outcomes.iter().take(top_n) {
            println!(
                "{:<5} {:>5.2} {:>6.2} {:>7.2} {:>7} | {:>7.2}% {:>7.1}% {:>6.2} {:>5.1}% {:>7.1}",
                outcome.rank,
                outcome.params.signal_threshold,
                outcome.params.stop_atr_multiplier,
                outcome.params.target_atr_multiplier,
                outcome.params.max_positions,
                outcome.metrics.total_return_pct,
                outcome.metrics.win_rate * 100.0,
                outcome.metrics.profit_factor,
                outcome.metrics.max_drawdown_pct,
                outcome.score,
            );
        }
        println!("================================================================================");
    }
}
