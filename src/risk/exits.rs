//! Exit management
//!
//! One evaluation path shared by the live executor and the backtest
//! engine: stop-loss, scaled exits with breakeven, trailing stop, full
//! target, and time stops. The policy mutates position management state
//! (flags, ratcheting stop) and returns the steps the owner must apply.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::core::types::{Direction, ExitReason, Position};

/// Exit rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Stop distance in ATR multiples
    pub stop_atr_multiplier: Decimal,
    /// Full target distance in ATR multiples
    pub target_atr_multiplier: Decimal,
    pub use_trailing_stop: bool,
    /// Trail distance behind the most favorable price, in ATR multiples
    pub trailing_atr_multiplier: Decimal,
    /// Profit (in R) that moves the stop to breakeven
    pub breakeven_trigger_r: Decimal,
    pub use_scaled_exits: bool,
    /// First scale: target in R and fraction of remaining shares to close
    pub scale_1_target_r: Decimal,
    pub scale_1_fraction: Decimal,
    /// Second scale
    pub scale_2_target_r: Decimal,
    pub scale_2_fraction: Decimal,
    pub use_time_stop: bool,
    /// Force-close after this many days held
    pub max_holding_days: i64,
    /// Flag for priority exit after this many days without progress
    pub stale_trade_days: i64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_atr_multiplier: dec!(0.75),
            target_atr_multiplier: dec!(2.0),
            use_trailing_stop: true,
            trailing_atr_multiplier: dec!(1.0),
            breakeven_trigger_r: dec!(1.0),
            use_scaled_exits: true,
            scale_1_target_r: dec!(1.0),
            scale_1_fraction: dec!(0.5),
            scale_2_target_r: dec!(2.0),
            scale_2_fraction: dec!(0.25),
            use_time_stop: true,
            max_holding_days: 10,
            stale_trade_days: 5,
        }
    }
}

/// Price extent visible to the exit rules for one evaluation
///
/// Backtests supply the full bar; live evaluation collapses the latest
/// snapshot into a one-price view.
#[derive(Debug, Clone, Copy)]
pub struct BarView {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl BarView {
    pub fn from_quote(price: Decimal) -> Self {
        Self { high: price, low: price, close: price }
    }
}

/// An action the position owner must apply
#[derive(Debug, Clone, PartialEq)]
pub enum ExitStep {
    /// Close the full remaining position
    Close { price: Decimal, reason: ExitReason },
    /// Close `fraction` of the remaining shares
    ScaleOut { fraction: Decimal, price: Decimal, reason: ExitReason },
}

/// Price at which an R-multiple target sits for this position
fn r_target_price(position: &Position, r_multiple: Decimal) -> Decimal {
    let distance = position.initial_risk() * r_multiple;
    match position.direction {
        Direction::Long => position.entry_price + distance,
        Direction::Short => position.entry_price - distance,
    }
}

/// Whether the bar's favorable extreme reached the given price
fn favorable_reached(position: &Position, bar: &BarView, price: Decimal) -> bool {
    match position.direction {
        Direction::Long => bar.high >= price,
        Direction::Short => bar.low <= price,
    }
}

/// Whether the bar's adverse extreme crossed the given price
fn adverse_crossed(position: &Position, bar: &BarView, price: Decimal) -> bool {
    match position.direction {
        Direction::Long => bar.low <= price,
        Direction::Short => bar.high >= price,
    }
}

/// Evaluate every exit rule against one bar, in priority order.
///
/// MFE/MAE are updated first but never influence the decisions below.
/// Returns scale-outs followed by at most one full close.
pub fn evaluate(
    cfg: &ExitConfig,
    position: &mut Position,
    bar: &BarView,
    now: DateTime<Utc>,
) -> Vec<ExitStep> {
    let mut steps = Vec::new();

    position.update_excursions(bar.close);

    if position.initial_risk().is_zero() {
        return steps;
    }

    let profit_r = position.profit_r(bar.close);

    // Hard stop first. The stop may already have been ratcheted by a
    // previous evaluation.
    if adverse_crossed(position, bar, position.stop_price) {
        let reason = if position.stop_price == position.original_stop {
            ExitReason::StopLoss
        } else {
            ExitReason::TrailingStop
        };
        steps.push(ExitStep::Close { price: position.stop_price, reason });
        return steps;
    }

    // First scale: take partial profit at 1R
    if cfg.use_scaled_exits && !position.scale_1_done {
        let scale_price = r_target_price(position, cfg.scale_1_target_r);
        if favorable_reached(position, bar, scale_price) {
            position.scale_1_done = true;
            steps.push(ExitStep::ScaleOut {
                fraction: cfg.scale_1_fraction,
                price: scale_price,
                reason: ExitReason::ScaleOut,
            });
        }
    }

    // Breakeven: once up 1R, the remainder can no longer lose
    if cfg.use_trailing_stop
        && !position.breakeven_activated
        && profit_r >= cfg.breakeven_trigger_r
    {
        position.stop_price = position.entry_price;
        position.breakeven_activated = true;
    }

    // Trailing stop: ratchet behind the most favorable close seen,
    // never loosen
    if cfg.use_trailing_stop && position.breakeven_activated {
        let trail = position.atr_at_entry * cfg.trailing_atr_multiplier;
        match position.direction {
            Direction::Long => {
                let candidate = bar.close - trail;
                if candidate > position.stop_price {
                    position.stop_price = candidate;
                }
            }
            Direction::Short => {
                let candidate = bar.close + trail;
                if candidate < position.stop_price {
                    position.stop_price = candidate;
                }
            }
        }
    }

    // Second scale
    if cfg.use_scaled_exits && position.scale_1_done && !position.scale_2_done {
        let scale_price = r_target_price(position, cfg.scale_2_target_r);
        if favorable_reached(position, bar, scale_price) {
            position.scale_2_done = true;
            steps.push(ExitStep::ScaleOut {
                fraction: cfg.scale_2_fraction,
                price: scale_price,
                reason: ExitReason::ScaleOut,
            });
        }
    }

    // Full target
    if favorable_reached(position, bar, position.target_price) {
        steps.push(ExitStep::Close {
            price: position.target_price,
            reason: ExitReason::Target,
        });
        return steps;
    }

    // Time stops
    if cfg.use_time_stop {
        let holding_days = (now.date_naive() - position.entry_time.date_naive()).num_days();

        if holding_days >= cfg.max_holding_days {
            steps.push(ExitStep::Close { price: bar.close, reason: ExitReason::TimeStop });
            return steps;
        }

        if holding_days >= cfg.stale_trade_days {
            position.stale_flagged = true;
        }

        // A stale position exits on the next favorable tick
        if position.stale_flagged && position.profit_per_share(bar.close) > Decimal::ZERO {
            steps.push(ExitStep::Close { price: bar.close, reason: ExitReason::StaleExit });
            return steps;
        }
    }

    steps
}
