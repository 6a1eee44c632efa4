//! Backtest engine
//!
//! Replays historical daily bars through the same sizing, authorization
//! and exit-management code the live pipeline uses, in a synchronous
//! single-threaded loop. Identical inputs always produce an identical
//! trade ledger: symbol iteration is sorted, and every clock the risk
//! engine sees is bar time, never wall time.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::core::events::Topic;
use crate::core::types::{Candle, ClosedTrade, Direction, ExitReason, Position, Signal, StructureSnapshot, TradeSetup};
use crate::data::{DataError, HistoricalData};
use crate::error::TradingError;
use crate::indicators;
use crate::risk::exits::{BarView, ExitConfig, ExitStep};
use crate::risk::manager::{Decision, RiskManager};
use crate::risk::{sizer, RiskLimits};

/// Backtest configuration
#[derive(Debug, Clone)]
pub struct BacktestParams {
    pub initial_capital: Decimal,
    /// Minimum |RRS| for an entry signal
    pub signal_threshold: f64,
    /// Minimum daily structure score in the signal's direction
    pub min_structure_score: u8,
    pub atr_period: usize,
    /// Warmup bars required before a symbol is eligible
    pub min_bars: usize,
    pub limits: RiskLimits,
    pub exits: ExitConfig,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            initial_capital: dec!(25000),
            signal_threshold: 2.0,
            min_structure_score: 3,
            atr_period: indicators::DEFAULT_ATR_PERIOD,
            min_bars: 22,
            limits: RiskLimits::default(),
            exits: ExitConfig::default(),
        }
    }
}

/// One point on the equity curve
#[derive(Debug, Clone)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub open_positions: usize,
}

/// Results of one backtest run. Immutable after completion.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub total_return: Decimal,
    pub total_return_pct: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: f64,
    pub avg_holding_days: f64,
    pub trades_stopped_out: usize,
    pub trades_target_hit: usize,
    pub trades_trailing_stopped: usize,
    pub trades_time_stopped: usize,
    pub trades_stale_exited: usize,
    pub breakeven_activations: usize,
    pub scale_exits: usize,
    pub avg_mfe: Decimal,
    pub avg_mae: Decimal,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
}

pub struct BacktestEngine {
    params: BacktestParams,
}

impl BacktestEngine {
    pub fn new(params: BacktestParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BacktestParams {
        &self.params
    }

    /// Replay the stored history between `start` and `end` inclusive.
    pub fn run(
        &self,
        data: &HistoricalData,
        benchmark: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<BacktestResult, TradingError> {
        let bench_bars = data
            .get(benchmark)
            .ok_or_else(|| DataError::unavailable(benchmark, "benchmark history missing"))?;

        let dates: Vec<NaiveDate> = bench_bars
            .iter()
            .map(|b| b.time.date_naive())
            .filter(|d| start.map(|s| *d >= s).unwrap_or(true))
            .filter(|d| end.map(|e| *d <= e).unwrap_or(true))
            .collect();
        if dates.len() < 2 {
            return Err(TradingError::Configuration(
                "backtest window shorter than two sessions".to_string(),
            ));
        }

        // The engine owns the account; same risk pipeline, bar-time clock
        let risk = RiskManager::new(self.params.limits.clone(), self.params.initial_capital, Topic::new(16));

        // Sorted symbol list keeps the replay deterministic
        let symbols: Vec<String> = data
            .symbols()
            .into_iter()
            .filter(|s| s != benchmark)
            .collect();

        let mut cursors: Vec<(String, &[Candle], usize)> = symbols
            .iter()
            .filter_map(|s| data.get(s).map(|bars| (s.clone(), bars, 0usize)))
            .collect();
        let mut bench_cursor = 0usize;

        let mut trades: Vec<ClosedTrade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut breakeven_activations = 0usize;
        let mut scale_exits = 0usize;

        for date in &dates {
            while bench_cursor < bench_bars.len()
                && bench_bars[bench_cursor].time.date_naive() <= *date
            {
                bench_cursor += 1;
            }
            for (_, bars, cursor) in cursors.iter_mut() {
                while *cursor < bars.len() && bars[*cursor].time.date_naive() <= *date {
                    *cursor += 1;
                }
            }

            // Exit management before entries, as live sweeps do
            for (symbol, bars, cursor) in cursors.iter() {
                let Some(today) = Self::today_bar(bars, *cursor, *date) else {
                    continue;
                };
                if !risk.has_position(symbol) {
                    continue;
                }

                risk.mark_price(symbol, today.close);
                let bar = BarView { high: today.high, low: today.low, close: today.close };
                let was_breakeven = risk
                    .position(symbol)
                    .map(|p| p.breakeven_activated)
                    .unwrap_or(false);
                let steps = risk.run_exit_checks(symbol, &bar, today.time, &self.params.exits);
                if !was_breakeven
                    && risk.position(symbol).map(|p| p.breakeven_activated).unwrap_or(false)
                {
                    breakeven_activations += 1;
                }

                for step in &steps {
                    let Some(applied) = risk.apply_exit_step(symbol, step, today.time) else {
                        continue;
                    };
                    if matches!(step, ExitStep::ScaleOut { .. }) {
                        scale_exits += 1;
                    }
                    if let Some(trade) = applied.trade {
                        trades.push(trade);
                    }
                }
            }

            // Scan for entries with the capacity left after exits
            if risk.open_position_count() < self.params.limits.max_positions
                && bench_cursor >= 2
            {
                let bench_close = bench_bars[bench_cursor - 1].close;
                let bench_prev = bench_bars[bench_cursor - 2].close;

                for (symbol, bars, cursor) in cursors.iter() {
                    if risk.open_position_count() >= self.params.limits.max_positions {
                        break;
                    }
                    if risk.has_position(symbol) {
                        continue;
                    }
                    let Some(today) = Self::today_bar(bars, *cursor, *date) else {
                        continue;
                    };
                    let history = &bars[..*cursor];
                    if history.len() < self.params.min_bars {
                        continue;
                    }

                    if let Some(setup) = self.evaluate_entry(symbol, history, today, bench_close, bench_prev, &risk)
                    {
                        match risk.authorize(&setup, today.time) {
                            Decision::Approved { shares, .. } => {
                                let position =
                                    Position::from_setup(&setup, shares, today.close, today.time);
                                if let Err(e) = risk.open_position(position) {
                                    debug!("{}: entry skipped: {}", symbol, e);
                                }
                            }
                            Decision::Rejected { reason } => {
                                debug!("{}: entry rejected: {}", symbol, reason);
                            }
                        }
                    }
                }
            }

            // Mark all open positions at today's close and record equity
            for (symbol, bars, cursor) in cursors.iter() {
                if let Some(today) = Self::today_bar(bars, *cursor, *date) {
                    if risk.has_position(symbol) {
                        risk.mark_price(symbol, today.close);
                    }
                }
            }
            equity_curve.push(EquityPoint {
                date: *date,
                equity: risk.equity(),
                open_positions: risk.open_position_count(),
            });
        }

        // Force-close whatever is still open at the last session
        for (symbol, bars, cursor) in cursors.iter() {
            if !risk.has_position(symbol) {
                continue;
            }
            let Some(last) = bars[..*cursor].last() else {
                continue;
            };
            let step = ExitStep::Close { price: last.close, reason: ExitReason::SessionEnd };
            if let Some(applied) = risk.apply_exit_step(symbol, &step, last.time) {
                if let Some(trade) = applied.trade {
                    trades.push(trade);
                }
            }
        }

        Ok(self.summarize(trades, equity_curve, breakeven_activations, scale_exits, &dates))
    }

    fn today_bar<'a>(bars: &'a [Candle], cursor: usize, date: NaiveDate) -> Option<&'a Candle> {
        if cursor == 0 {
            return None;
        }
        let bar = &bars[cursor - 1];
        (bar.time.date_naive() == date).then_some(bar)
    }

    /// Same signal logic as the scanner/analyzer pair, against sliced
    /// history instead of live fetches.
    fn evaluate_entry(
        &self,
        symbol: &str,
        history: &[Candle],
        today: &Candle,
        bench_close: Decimal,
        bench_prev: Decimal,
        risk: &RiskManager,
    ) -> Option<TradeSetup> {
        let prev = &history[history.len() - 2];

        let atr = indicators::atr(history, self.params.atr_period)?;
        let rrs = indicators::rrs(today.close, prev.close, bench_close, bench_prev, atr)?;
        if rrs.abs() < self.params.signal_threshold {
            return None;
        }

        let scores = indicators::structure_scores(history)?;
        let direction = if rrs > 0.0 { Direction::Long } else { Direction::Short };
        let score = match direction {
            Direction::Long => scores.strength,
            Direction::Short => scores.weakness,
        };
        if score < self.params.min_structure_score {
            return None;
        }

        let sizing = sizer::size_from_atr(
            risk.equity(),
            today.close,
            atr,
            direction,
            self.params.exits.stop_atr_multiplier,
            self.params.exits.target_atr_multiplier,
            &self.params.limits,
            None,
        )
        .ok()?;

        Some(TradeSetup {
            signal: Signal {
                symbol: symbol.to_string(),
                time: today.time,
                rrs,
                direction,
                price: today.close,
                atr,
                structure: StructureSnapshot {
                    strength_score: scores.strength,
                    weakness_score: scores.weakness,
                    ema3: scores.ema3,
                    ema8: scores.ema8,
                    ema21: scores.ema21,
                },
            },
            entry_price: today.close,
            stop_price: sizing.stop_price,
            target_price: sizing.target_price,
            shares: sizing.shares,
            risk_amount: sizing.risk_amount,
            notional: sizing.notional,
        })
    }

    fn summarize(
        &self,
        trades: Vec<ClosedTrade>,
        equity_curve: Vec<EquityPoint>,
        breakeven_activations: usize,
        scale_exits: usize,
        dates: &[NaiveDate],
    ) -> BacktestResult {
        let final_capital = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.params.initial_capital);
        let total_return = final_capital - self.params.initial_capital;
        let total_return_pct = if self.params.initial_capital.is_zero() {
            Decimal::ZERO
        } else {
            total_return / self.params.initial_capital * dec!(100)
        };

        let total_trades = trades.len();
        let winners: Vec<&ClosedTrade> = trades.iter().filter(|t| t.is_winner()).collect();
        let losers: Vec<&ClosedTrade> = trades.iter().filter(|t| !t.is_winner()).collect();
        let gross_profit: Decimal = winners.iter().map(|t| t.pnl).sum();
        let gross_loss: Decimal = losers.iter().map(|t| t.pnl.abs()).sum();

        let win_rate = if total_trades > 0 {
            winners.len() as f64 / total_trades as f64
        } else {
            0.0
        };
        let profit_factor = if gross_loss > Decimal::ZERO {
            gross_profit / gross_loss
        } else if gross_profit > Decimal::ZERO {
            dec!(999.99)
        } else {
            Decimal::ZERO
        };
        let avg_win = if winners.is_empty() {
            Decimal::ZERO
        } else {
            gross_profit / Decimal::from(winners.len() as u64)
        };
        let avg_loss = if losers.is_empty() {
            Decimal::ZERO
        } else {
            gross_loss / Decimal::from(losers.len() as u64)
        };

        // Max drawdown over the equity curve
        let mut peak = self.params.initial_capital;
        let mut max_drawdown = Decimal::ZERO;
        let mut max_drawdown_pct = Decimal::ZERO;
        for point in &equity_curve {
            if point.equity > peak {
                peak = point.equity;
            }
            let dd = peak - point.equity;
            if dd > max_drawdown {
                max_drawdown = dd;
                if !peak.is_zero() {
                    max_drawdown_pct = dd / peak * dec!(100);
                }
            }
        }

        // Sharpe-like ratio over per-trade returns
        let returns: Vec<f64> = trades
            .iter()
            .filter_map(|t| t.pnl_pct.to_f64())
            .collect();
        let sharpe_ratio = if returns.len() > 1 {
            let mean = returns.iter().sum::<f64>() / returns.len() as f64;
            let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
                / returns.len() as f64;
            let std = variance.sqrt();
            if std > 0.0 {
                mean / std
            } else {
                0.0
            }
        } else {
            0.0
        };

        let avg_holding_days = if total_trades > 0 {
            trades.iter().map(|t| t.holding_days as f64).sum::<f64>() / total_trades as f64
        } else {
            0.0
        };
        let avg_mfe = if total_trades > 0 {
            trades.iter().map(|t| t.mfe).sum::<Decimal>() / Decimal::from(total_trades as u64)
        } else {
            Decimal::ZERO
        };
        let avg_mae = if total_trades > 0 {
            trades.iter().map(|t| t.mae).sum::<Decimal>() / Decimal::from(total_trades as u64)
        } else {
            Decimal::ZERO
        };

        BacktestResult {
            start_date: dates[0],
            end_date: *dates.last().unwrap_or(&dates[0]),
            initial_capital: self.params.initial_capital,
            final_capital,
            total_return,
            total_return_pct,
            total_trades,
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio,
            avg_holding_days,
            trades_stopped_out: trades.iter().filter(|t| t.reason == ExitReason::StopLoss).count(),
            trades_target_hit: trades.iter().filter(|t| t.reason == ExitReason::Target).count(),
            trades_trailing_stopped: trades
                .iter()
                .filter(|t| t.reason == ExitReason::TrailingStop)
                .count(),
            trades_time_stopped: trades.iter().filter(|t| t.reason == ExitReason::TimeStop).count(),
            trades_stale_exited: trades.iter().filter(|t| t.reason == ExitReason::StaleExit).count(),
            breakeven_activations,
            scale_exits,
            avg_mfe,
            avg_mae,
            trades,
            equity_curve,
        }
    }
}

impl BacktestResult {
    /// Print a summary of the results
    pub fn print_summary(&self) {
        println!("================================================================");
        println!("                    BACKTEST RESULTS                           ");
        println!("================================================================");
        println!(" Period:          {} to {}", self.start_date, self.end_date);
        println!(" Initial Capital: ${:>12.2}", self.initial_capital);
        println!(" Final Capital:   ${:>12.2}", self.final_capital);
        println!("----------------------------------------------------------------");
        println!(" Total Trades:    {:>6}", self.total_trades);
        println!(" Wins:            {:>6}", self.winning_trades);
        println!(" Losses:          {:>6}", self.losing_trades);
        println!(" Win Rate:        {:>6.1}%", self.win_rate * 100.0);
        println!("----------------------------------------------------------------");
        println!(" Total Return:   ${:>10.2} ({:+.2}%)", self.total_return, self.total_return_pct);
        println!(" Max Drawdown:   ${:>10.2} ({:.2}%)", self.max_drawdown, self.max_drawdown_pct);
        println!(" Profit Factor:   {:>6.2}", self.profit_factor);
        println!(" Sharpe (trade):  {:>6.2}", self.sharpe_ratio);
        println!(" Avg Hold (days): {:>6.1}", self.avg_holding_days);
        println!("----------------------------------------------------------------");
        println!(" Avg Win:        ${:>10.2}", self.avg_win);
        println!(" Avg Loss:       ${:>10.2}", self.avg_loss);
        println!(" Avg MFE/MAE:    ${:.2} / ${:.2}", self.avg_mfe, self.avg_mae);
        println!("----------------------------------------------------------------");
        println!(
            " Exits: {} stop | {} target | {} trail | {} time | {} stale",
            self.trades_stopped_out,
            self.trades_target_hit,
            self.trades_trailing_stopped,
            self.trades_time_stopped,
            self.trades_stale_exited,
        );
        println!(
            " Scaling: {} partial exits | {} breakeven activations",
            self.scale_exits, self.breakeven_activations,
        );
        println!("================================================================");
    }

    /// Print the last N trades
    pub fn print_trades(&self, count: usize) {
        println!("\nLast {} Trades:", count.min(self.trades.len()));
        println!("----------------------------------------------------------------");
        for trade in self.trades.iter().rev().take(count).rev() {
            println!(
                " {} {} {} @ {:.2} -> {:.2} | {} | P&L: ${:.2} ({:+.2}%)",
                trade.entry_time.format("%Y-%m-%d"),
                trade.direction,
                trade.symbol,
                trade.entry_price,
                trade.exit_price,
                trade.reason,
                trade.pnl,
                trade.pnl_pct,
            );
        }
        println!("----------------------------------------------------------------");
    }
}
