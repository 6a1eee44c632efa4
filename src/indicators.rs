//! Relative-strength and volatility indicators
//!
//! Pure, deterministic functions over candle series. No side effects.
//!
//! RRS = (stock %change - benchmark %change) / ATR, the ATR-normalized
//! measure of how much a symbol moved beyond what the benchmark implied.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::core::types::Candle;

/// Default ATR lookback
pub const DEFAULT_ATR_PERIOD: usize = 14;

/// Average True Range over the trailing `period` bars.
///
/// True range is max(high-low, |high-prev_close|, |low-prev_close|);
/// ATR is its simple moving average. Returns None with fewer than
/// `period + 1` bars.
pub fn atr(bars: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let start = bars.len() - period;
    let mut sum = Decimal::ZERO;
    for i in start..bars.len() {
        let bar = &bars[i];
        let prev_close = bars[i - 1].close;
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        sum += tr;
    }

    Some(sum / Decimal::from(period as u64))
}

/// Last value of the exponential moving average of closes.
pub fn ema(bars: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || bars.is_empty() {
        return None;
    }

    let k = Decimal::from(2u64) / Decimal::from(period as u64 + 1);
    let mut value = bars[0].close;
    for bar in &bars[1..] {
        value = bar.close * k + value * (Decimal::ONE - k);
    }
    Some(value)
}

/// Percent change between two closes, in percentage points.
pub fn percent_change(current: Decimal, previous: Decimal) -> Option<f64> {
    if previous.is_zero() {
        return None;
    }
    ((current / previous - Decimal::ONE) * Decimal::from(100u64)).to_f64()
}

/// Real relative strength of a symbol versus its benchmark.
///
/// Positive values mean the symbol outperformed what the benchmark move
/// implied, in units of its own ATR. Returns None when the ATR is zero
/// or inputs are degenerate.
pub fn rrs(
    stock_close: Decimal,
    stock_prev_close: Decimal,
    bench_close: Decimal,
    bench_prev_close: Decimal,
    stock_atr: Decimal,
) -> Option<f64> {
    let stock_pc = percent_change(stock_close, stock_prev_close)?;
    let bench_pc = percent_change(bench_close, bench_prev_close)?;
    let atr = stock_atr.to_f64()?;
    if atr <= 0.0 {
        return None;
    }
    Some((stock_pc - bench_pc) / atr)
}

/// Daily-chart structure scores
///
/// Five bullish conditions and five mirrored bearish conditions, each
/// counted once: short EMA alignment, medium EMA alignment, close vs the
/// 8 EMA, higher lows / lower highs over five bars, and two-of-three
/// green/red days.
#[derive(Debug, Clone)]
pub struct StructureScores {
    pub strength: u8,
    pub weakness: u8,
    pub ema3: Decimal,
    pub ema8: Decimal,
    pub ema21: Decimal,
}

pub fn structure_scores(bars: &[Candle]) -> Option<StructureScores> {
    if bars.len() < 21 {
        return None;
    }

    let ema3 = ema(bars, 3)?;
    let ema8 = ema(bars, 8)?;
    let ema21 = ema(bars, 21)?;
    let close = bars.last()?.close;

    let last3 = &bars[bars.len() - 3..];
    let green_days = last3.iter().filter(|b| b.is_bullish()).count();
    let red_days = last3.iter().filter(|b| b.is_bearish()).count();

    let last5 = &bars[bars.len() - 5..];
    let higher_lows = last5.last()?.low > last5.first()?.low;
    let lower_highs = last5.last()?.high < last5.first()?.high;

    let strength = [
        ema3 > ema8,
        ema8 > ema21,
        close > ema8,
        higher_lows,
        green_days >= 2,
    ]
    .iter()
    .filter(|c| **c)
    .count() as u8;

    let weakness = [
        ema8 > ema3,
        ema21 > ema8,
        close < ema8,
        lower_highs,
        red_days >= 2,
    ]
    .iter()
    .filter(|c| **c)
    .count() as u8;

    Some(StructureScores { strength, weakness, ema3, ema8, ema21 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(i: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i);
        Candle::new(time, open, high, low, close, 1_000_000)
    }

    fn flat_series(n: i64, price: Decimal) -> Vec<Candle> {
        (0..n)
            .map(|i| bar(i, price, price + dec!(1), price - dec!(1), price))
            .collect()
    }

    fn rising_series(n: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = dec!(100) + Decimal::from(i as u64);
                bar(i, base - dec!(0.5), base + dec!(1), base - dec!(1), base)
            })
            .collect()
    }

    #[test]
    fn test_atr_flat_series() {
        let bars = flat_series(20, dec!(100));
        // Every true range is high - low = 2
        assert_eq!(atr(&bars, 14), Some(dec!(2)));
    }

    #[test]
    fn test_atr_needs_enough_bars() {
        let bars = flat_series(10, dec!(100));
        assert!(atr(&bars, 14).is_none());
    }

    #[test]
    fn test_ema_converges_to_constant() {
        let bars = flat_series(30, dec!(50));
        let value = ema(&bars, 8).unwrap();
        assert_eq!(value, dec!(50));
    }

    #[test]
    fn test_rrs_outperformance() {
        // Stock up 2%, benchmark flat, ATR 1.0 -> RRS = 2.0
        let value = rrs(dec!(102), dec!(100), dec!(400), dec!(400), dec!(1)).unwrap();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rrs_underperformance_is_negative() {
        let value = rrs(dec!(98), dec!(100), dec!(400), dec!(400), dec!(1)).unwrap();
        assert!(value < -1.9);
    }

    #[test]
    fn test_rrs_rejects_zero_atr() {
        assert!(rrs(dec!(102), dec!(100), dec!(400), dec!(400), dec!(0)).is_none());
    }

    #[test]
    fn test_structure_scores_rising_market() {
        let bars = rising_series(30);
        let scores = structure_scores(&bars).unwrap();
        // Uptrend: EMAs aligned, close above, higher lows, green days
        assert!(scores.strength >= 4);
        assert!(scores.weakness <= 1);
    }

    #[test]
    fn test_structure_scores_need_history() {
        let bars = rising_series(10);
        assert!(structure_scores(&bars).is_none());
    }
}
