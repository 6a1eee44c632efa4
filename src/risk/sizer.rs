//! Position sizing
//!
//! Pure functions, no side effects: (signal, account state, limits) in,
//! share count or rejection out. Default is fixed-fractional ATR sizing;
//! half-Kelly is optional and falls back to fixed-fractional whenever the
//! measured edge is non-positive.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::core::types::Direction;
use crate::risk::RiskLimits;

/// Trailing trade statistics feeding the Kelly criterion
#[derive(Debug, Clone, Copy)]
pub struct KellyStats {
    /// Historical win probability, 0..1
    pub win_rate: f64,
    /// Average win divided by average loss
    pub win_loss_ratio: f64,
}

/// Raw Kelly fraction f* = (b*p - q) / b. Can be negative; callers must
/// treat a non-positive value as "no edge" and fall back.
pub fn kelly_fraction(stats: &KellyStats) -> f64 {
    let p = stats.win_rate;
    let b = stats.win_loss_ratio;
    if b <= 0.0 || p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    (b * p - (1.0 - p)) / b
}

/// A sizing decision
#[derive(Debug, Clone)]
pub struct Sizing {
    pub shares: Decimal,
    pub risk_amount: Decimal,
    /// Fraction of equity actually risked
    pub risk_fraction: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub notional: Decimal,
    /// True when the half-Kelly fraction drove the size
    pub used_kelly: bool,
    pub reason: &'static str,
}

/// Why no position could be sized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRejection {
    InvalidStopDistance,
    ZeroShares,
}

impl std::fmt::Display for SizeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeRejection::InvalidStopDistance => write!(f, "invalid stop distance"),
            SizeRejection::ZeroShares => write!(f, "position size rounds to zero"),
        }
    }
}

/// Pick the risk fraction: half-Kelly capped at the configured ceiling
/// when stats show a positive edge, fixed-fractional otherwise. The
/// fallback is flagged in the reason so a non-positive edge never
/// silently scales a trade up.
pub fn risk_fraction(
    limits: &RiskLimits,
    kelly: Option<&KellyStats>,
) -> (Decimal, bool, &'static str) {
    let Some(stats) = kelly else {
        return (limits.max_risk_per_trade, false, "fixed fractional");
    };

    let f = kelly_fraction(stats);
    if f <= 0.0 {
        return (
            limits.max_risk_per_trade,
            false,
            "non-positive Kelly edge, fixed-fractional fallback",
        );
    }

    let half = Decimal::from_f64(f / 2.0).unwrap_or(limits.max_risk_per_trade);
    (half.min(limits.kelly_ceiling), true, "half-Kelly")
}

/// Size against a fixed stop: shares = floor(risk_amount / stop distance),
/// clamped so the notional stays inside `max_position_size`.
pub fn size_with_stop(
    equity: Decimal,
    entry_price: Decimal,
    stop_price: Decimal,
    fraction: Decimal,
    limits: &RiskLimits,
) -> Result<(Decimal, Decimal, &'static str), SizeRejection> {
    let stop_distance = (entry_price - stop_price).abs();
    if stop_distance.is_zero() || entry_price <= Decimal::ZERO {
        return Err(SizeRejection::InvalidStopDistance);
    }

    let risk_amount = equity * fraction;
    let mut shares = (risk_amount / stop_distance).floor();
    let mut reason = "risk per trade";

    let max_notional = equity * limits.max_position_size;
    let max_shares = (max_notional / entry_price).floor();
    if shares > max_shares {
        shares = max_shares;
        reason = "clamped by max position size";
    }

    if shares.is_zero() || shares < Decimal::ZERO {
        return Err(SizeRejection::ZeroShares);
    }

    Ok((shares, shares * stop_distance, reason))
}

/// Derive stop and target from ATR multipliers, then size. This is the
/// one code path shared by the live analyzer and the backtest engine.
#[allow(clippy::too_many_arguments)]
pub fn size_from_atr(
    equity: Decimal,
    entry_price: Decimal,
    atr: Decimal,
    direction: Direction,
    stop_atr_multiplier: Decimal,
    target_atr_multiplier: Decimal,
    limits: &RiskLimits,
    kelly: Option<&KellyStats>,
) -> Result<Sizing, SizeRejection> {
    let stop_distance = atr * stop_atr_multiplier;
    let target_distance = atr * target_atr_multiplier;

    let (stop_price, target_price) = match direction {
        Direction::Long => (entry_price - stop_distance, entry_price + target_distance),
        Direction::Short => (entry_price + stop_distance, entry_price - target_distance),
    };

    let (fraction, used_kelly, reason) = risk_fraction(limits, kelly);
    let (shares, risk_amount, clamp_reason) =
        size_with_stop(equity, entry_price, stop_price, fraction, limits)?;

    Ok(Sizing {
        shares,
        risk_amount,
        risk_fraction: fraction,
        stop_price,
        target_price,
        notional: shares * entry_price,
        used_kelly,
        reason: if clamp_reason == "clamped by max position size" {
            clamp_reason
        } else {
            reason
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fixed_fractional_reference_trade() {
        // $25,000 equity, 1% risk, entry 485.50, stop 478.00:
        // risk $250, distance $7.50 -> floor(33.33) = 33 shares, $247.50 at risk
        let limits = RiskLimits::default();
        let (shares, risk_amount, _) =
            size_with_stop(dec!(25000), dec!(485.50), dec!(478.00), dec!(0.01), &limits).unwrap();

        assert_eq!(shares, dec!(33));
        assert_eq!(risk_amount, dec!(247.50));
        // Never exceeds the configured per-trade budget
        assert!(risk_amount <= dec!(25000) * limits.max_risk_per_trade);
    }

    #[test]
    fn test_notional_clamp() {
        // Tight stop would size 1000 shares ($100k notional); the 10% cap
        // allows only $10k / $100 = 100 shares
        let limits = RiskLimits::default();
        let (shares, _, reason) =
            size_with_stop(dec!(100000), dec!(100), dec!(99), dec!(0.01), &limits).unwrap();

        assert_eq!(shares, dec!(100));
        assert_eq!(reason, "clamped by max position size");
    }

    #[test]
    fn test_zero_stop_distance_rejected() {
        let limits = RiskLimits::default();
        let err =
            size_with_stop(dec!(25000), dec!(100), dec!(100), dec!(0.01), &limits).unwrap_err();
        assert_eq!(err, SizeRejection::InvalidStopDistance);
    }

    #[test]
    fn test_unaffordable_share_rejected() {
        // Risk budget $25 cannot cover one share of $50 stop distance
        let limits = RiskLimits::default();
        let err =
            size_with_stop(dec!(2500), dec!(2000), dec!(1950), dec!(0.01), &limits).unwrap_err();
        assert_eq!(err, SizeRejection::ZeroShares);
    }

    #[test]
    fn test_negative_kelly_falls_back_to_fixed_fractional() {
        // win_rate 0.38, ratio 1.55 -> f* = (0.589 - 0.62) / 1.55 < 0
        let stats = KellyStats { win_rate: 0.38, win_loss_ratio: 1.55 };
        assert!(kelly_fraction(&stats) < 0.0);

        let limits = RiskLimits::default();
        let (fraction, used_kelly, reason) = risk_fraction(&limits, Some(&stats));
        assert_eq!(fraction, limits.max_risk_per_trade);
        assert!(!used_kelly);
        assert!(reason.contains("fallback"));
    }

    #[test]
    fn test_half_kelly_applied_and_capped() {
        // p=0.6, b=2 -> f*=0.4, half-Kelly 0.2 (under the 0.25 ceiling)
        let stats = KellyStats { win_rate: 0.6, win_loss_ratio: 2.0 };
        let limits = RiskLimits::default();
        let (fraction, used_kelly, _) = risk_fraction(&limits, Some(&stats));
        assert!(used_kelly);
        assert!((fraction - dec!(0.2)).abs() < dec!(0.0001));

        // p=0.9, b=3 -> f* ~ 0.867, half-Kelly ~ 0.433, capped at 0.25
        let stats = KellyStats { win_rate: 0.9, win_loss_ratio: 3.0 };
        let (fraction, _, _) = risk_fraction(&limits, Some(&stats));
        assert_eq!(fraction, limits.kelly_ceiling);
    }

    #[test]
    fn test_size_from_atr_derives_stop_and_target() {
        let limits = RiskLimits::default();
        let sizing = size_from_atr(
            dec!(25000),
            dec!(100),
            dec!(4),
            Direction::Long,
            dec!(0.75),
            dec!(2.0),
            &limits,
            None,
        )
        .unwrap();

        assert_eq!(sizing.stop_price, dec!(97));
        assert_eq!(sizing.target_price, dec!(108));
        // risk $250 / $3 distance = 83 shares, but notional cap is
        // $2500 / $100 = 25 shares
        assert_eq!(sizing.shares, dec!(25));
        assert_eq!(sizing.reason, "clamped by max position size");
    }

    #[test]
    fn test_size_from_atr_short_direction() {
        let limits = RiskLimits::default();
        let sizing = size_from_atr(
            dec!(100000),
            dec!(50),
            dec!(2),
            Direction::Short,
            dec!(1.0),
            dec!(2.0),
            &limits,
            None,
        )
        .unwrap();

        assert_eq!(sizing.stop_price, dec!(52));
        assert_eq!(sizing.target_price, dec!(46));
        assert!(sizing.shares > Decimal::ZERO);
    }
}
