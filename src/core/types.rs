//! Core type definitions for the trading system
//!
//! Prices, quantities and P&L are `Decimal`; dimensionless statistics
//! (RRS values, win rates, ratios) are `f64`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single price candle (OHLCV)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Timestamp of the candle open
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl Candle {
    pub fn new(
        time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
    ) -> Self {
        Self { time, open, high, low, close, volume }
    }

    /// Check if this is a bullish (green) candle
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Check if this is a bearish (red) candle
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Get the full range (high - low)
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Daily-chart structure snapshot attached to a signal
///
/// Scores are 0-5 counts of bullish/bearish structural conditions
/// (EMA alignment, close vs 8 EMA, higher lows / lower highs, green/red
/// day counts). The analyzer filters on these; the scanner only records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub strength_score: u8,
    pub weakness_score: u8,
    pub ema3: Decimal,
    pub ema8: Decimal,
    pub ema21: Decimal,
}

/// Relative-strength signal produced by the scanner
///
/// Immutable once created; consumed and discarded after routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub time: DateTime<Utc>,
    /// Relative strength vs the benchmark, ATR-normalized
    pub rrs: f64,
    pub direction: Direction,
    pub price: Decimal,
    pub atr: Decimal,
    pub structure: StructureSnapshot,
}

/// A sized, validated trade proposal
///
/// Created by the analyzer from a signal plus a sizing decision; owned
/// exclusively until the executor consumes or discards it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub signal: Signal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub shares: Decimal,
    pub risk_amount: Decimal,
    pub notional: Decimal,
}

impl TradeSetup {
    pub fn symbol(&self) -> &str {
        &self.signal.symbol
    }

    pub fn direction(&self) -> Direction {
        self.signal.direction
    }

    /// Reward-to-risk ratio of the proposed trade
    pub fn risk_reward_ratio(&self) -> Decimal {
        let risk = (self.entry_price - self.stop_price).abs();
        if risk.is_zero() {
            return Decimal::ZERO;
        }
        (self.target_price - self.entry_price).abs() / risk
    }
}

/// Why a position (or part of one) was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    Target,
    TrailingStop,
    TimeStop,
    StaleExit,
    ScaleOut,
    SessionEnd,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Target => "target",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TimeStop => "time_stop",
            ExitReason::StaleExit => "stale_exit",
            ExitReason::ScaleOut => "scale_out",
            ExitReason::SessionEnd => "session_end",
        };
        write!(f, "{}", s)
    }
}

/// An open position under management
///
/// Mutated only by its single owner (the executor in live mode, the
/// backtest engine in replay mode): trailing-stop updates, scaled partial
/// exits, excursion tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    /// Shares at entry
    pub shares: Decimal,
    /// Shares still open after scaled exits
    pub remaining_shares: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub current_price: Decimal,
    /// Current protective stop. Only ever tightens, never loosens.
    pub stop_price: Decimal,
    /// Initial stop, kept for R-multiple arithmetic
    pub original_stop: Decimal,
    pub target_price: Decimal,
    pub atr_at_entry: Decimal,
    pub breakeven_activated: bool,
    pub scale_1_done: bool,
    pub scale_2_done: bool,
    /// Flagged for priority exit on the next favorable tick
    pub stale_flagged: bool,
    /// Realized P&L from scaled partial exits
    pub realized_pnl: Decimal,
    /// Max favorable excursion while open (reporting only)
    pub max_favorable_excursion: Decimal,
    /// Max adverse excursion while open (reporting only)
    pub max_adverse_excursion: Decimal,
}

impl Position {
    /// Build a position from an authorized setup at fill time
    pub fn from_setup(
        setup: &TradeSetup,
        shares: Decimal,
        fill_price: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: setup.signal.symbol.clone(),
            direction: setup.signal.direction,
            shares,
            remaining_shares: shares,
            entry_price: fill_price,
            entry_time: at,
            current_price: fill_price,
            stop_price: setup.stop_price,
            original_stop: setup.stop_price,
            target_price: setup.target_price,
            atr_at_entry: setup.signal.atr,
            breakeven_activated: false,
            scale_1_done: false,
            scale_2_done: false,
            stale_flagged: false,
            realized_pnl: Decimal::ZERO,
            max_favorable_excursion: Decimal::ZERO,
            max_adverse_excursion: Decimal::ZERO,
        }
    }

    /// Initial per-share risk (1R in price terms)
    pub fn initial_risk(&self) -> Decimal {
        (self.entry_price - self.original_stop).abs()
    }

    /// Signed per-share profit at the given price
    pub fn profit_per_share(&self, price: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => price - self.entry_price,
            Direction::Short => self.entry_price - price,
        }
    }

    /// Current profit expressed in R multiples
    pub fn profit_r(&self, price: Decimal) -> Decimal {
        let risk = self.initial_risk();
        if risk.is_zero() {
            return Decimal::ZERO;
        }
        self.profit_per_share(price) / risk
    }

    /// Entry notional still reserved by the open part of the position
    pub fn reserved_notional(&self) -> Decimal {
        self.entry_price * self.remaining_shares
    }

    /// Unrealized P&L on the open part at the current mark
    pub fn unrealized_pnl(&self) -> Decimal {
        self.profit_per_share(self.current_price) * self.remaining_shares
    }

    /// Update MFE/MAE from the latest close. Reporting only; exit
    /// decisions never read these.
    pub fn update_excursions(&mut self, close: Decimal) {
        let profit = self.profit_per_share(close);
        if profit > self.max_favorable_excursion {
            self.max_favorable_excursion = profit;
        }
        if -profit > self.max_adverse_excursion {
            self.max_adverse_excursion = -profit;
        }
    }
}

/// A fully closed trade in the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub shares: Decimal,
    /// Total P&L including scaled partial exits
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub reason: ExitReason,
    pub holding_days: i64,
    pub mfe: Decimal,
    pub mae: Decimal,
    /// Whether the trailing stop was ever ratcheted
    pub trailed: bool,
}

impl ClosedTrade {
    pub fn is_winner(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// Account state: the single logical owner is the risk manager in live
/// mode and the backtest engine in replay mode. All mutation funnels
/// through one serialization point per operation.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub equity: Decimal,
    pub cash: Decimal,
    /// Open positions keyed by symbol. BTreeMap keeps iteration order
    /// deterministic for replay.
    pub positions: BTreeMap<String, Position>,
    pub realized_pnl_today: Decimal,
    /// Monotonically non-decreasing
    pub peak_equity: Decimal,
    /// Current trading day, for daily resets
    pub day: Option<NaiveDate>,
}

impl AccountState {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            equity: starting_cash,
            cash: starting_cash,
            positions: BTreeMap::new(),
            realized_pnl_today: Decimal::ZERO,
            peak_equity: starting_cash,
            day: None,
        }
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// Sum of open entry notional
    pub fn open_notional(&self) -> Decimal {
        self.positions.values().map(|p| p.reserved_notional()).sum()
    }

    /// Risk still at stake across open positions: per-share distance from
    /// entry to the current stop, zero once the stop is at or beyond
    /// breakeven.
    pub fn open_risk(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| {
                let at_risk = match p.direction {
                    Direction::Long => p.entry_price - p.stop_price,
                    Direction::Short => p.stop_price - p.entry_price,
                };
                at_risk.max(Decimal::ZERO) * p.remaining_shares
            })
            .sum()
    }

    /// Recompute equity from cash plus open positions at current marks,
    /// ratcheting the peak.
    pub fn recompute_equity(&mut self) {
        let open_value: Decimal = self
            .positions
            .values()
            .map(|p| p.reserved_notional() + p.unrealized_pnl())
            .sum();
        self.equity = self.cash + open_value;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
    }

    /// Drawdown from peak equity as a fraction (0.05 = 5%)
    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_equity.is_zero() {
            return Decimal::ZERO;
        }
        ((self.peak_equity - self.equity) / self.peak_equity).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_setup() -> TradeSetup {
        TradeSetup {
            signal: Signal {
                symbol: "NVDA".to_string(),
                time: Utc::now(),
                rrs: 2.45,
                direction: Direction::Long,
                price: dec!(485.50),
                atr: dec!(10),
                structure: StructureSnapshot {
                    strength_score: 4,
                    weakness_score: 1,
                    ema3: dec!(480),
                    ema8: dec!(475),
                    ema21: dec!(470),
                },
            },
            entry_price: dec!(485.50),
            stop_price: dec!(478.00),
            target_price: dec!(505.50),
            shares: dec!(33),
            risk_amount: dec!(247.50),
            notional: dec!(16021.50),
        }
    }

    #[test]
    fn test_position_r_multiples() {
        let setup = sample_setup();
        let pos = Position::from_setup(&setup, dec!(33), dec!(485.50), Utc::now());

        assert_eq!(pos.initial_risk(), dec!(7.50));
        assert_eq!(pos.profit_per_share(dec!(493.00)), dec!(7.50));
        assert_eq!(pos.profit_r(dec!(493.00)), dec!(1));
    }

    #[test]
    fn test_excursions_track_extremes_only() {
        let setup = sample_setup();
        let mut pos = Position::from_setup(&setup, dec!(33), dec!(485.50), Utc::now());

        pos.update_excursions(dec!(490));
        pos.update_excursions(dec!(482));
        pos.update_excursions(dec!(488));

        assert_eq!(pos.max_favorable_excursion, dec!(4.50));
        assert_eq!(pos.max_adverse_excursion, dec!(3.50));
    }

    #[test]
    fn test_peak_equity_is_monotone() {
        let mut account = AccountState::new(dec!(25000));
        account.cash = dec!(26000);
        account.recompute_equity();
        assert_eq!(account.peak_equity, dec!(26000));

        account.cash = dec!(24000);
        account.recompute_equity();
        assert_eq!(account.equity, dec!(24000));
        assert_eq!(account.peak_equity, dec!(26000));
    }

    #[test]
    fn test_open_risk_zero_after_breakeven() {
        let setup = sample_setup();
        let mut pos = Position::from_setup(&setup, dec!(33), dec!(485.50), Utc::now());
        let mut account = AccountState::new(dec!(25000));

        account.positions.insert(pos.symbol.clone(), pos.clone());
        assert_eq!(account.open_risk(), dec!(247.50));

        pos.stop_price = pos.entry_price;
        account.positions.insert(pos.symbol.clone(), pos);
        assert_eq!(account.open_risk(), dec!(0));
    }

    #[test]
    fn test_risk_reward_ratio() {
        let setup = sample_setup();
        // Risk 7.50, reward 20.00
        let rr = setup.risk_reward_ratio();
        assert!(rr > dec!(2.6) && rr < dec!(2.7));
    }
}
