//! Risk engine
//!
//! Limits are ENFORCED, strategy parameters are discovered. No trade
//! reaches the broker without passing the manager's ordered checks.

pub mod exits;
pub mod manager;
pub mod sizer;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub use exits::{BarView, ExitConfig, ExitStep};
pub use manager::{AppliedExit, Decision, RiskManager, RiskReason};
pub use sizer::{kelly_fraction, size_from_atr, size_with_stop, KellyStats, SizeRejection, Sizing};

/// Risk limit configuration. Immutable at runtime; read by the manager
/// and the sizer, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Fraction of equity risked per trade (e.g. 0.01 = 1%)
    pub max_risk_per_trade: Decimal,
    /// Daily loss fraction halting all trading for the day
    pub max_daily_loss: Decimal,
    /// Max position notional as a fraction of equity
    pub max_position_size: Decimal,
    /// Concurrent position cap
    pub max_positions: usize,
    /// Optional per-sector notional cap as a fraction of equity
    pub max_sector_exposure: Option<Decimal>,
    /// Ceiling on the Kelly-derived risk fraction
    pub kelly_ceiling: Decimal,
    /// Drawdown tier that halves all subsequent size multipliers
    pub drawdown_soft_pct: Decimal,
    /// Size multiplier applied inside the soft tier
    pub drawdown_soft_scale: Decimal,
    /// Drawdown tier that rejects all new setups until manual reset
    pub drawdown_lockout_pct: Decimal,
    /// Drawdown tier that trips the circuit breaker
    pub drawdown_breaker_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_risk_per_trade: dec!(0.01),
            max_daily_loss: dec!(0.03),
            max_position_size: dec!(0.10),
            max_positions: 5,
            max_sector_exposure: None,
            kelly_ceiling: dec!(0.25),
            drawdown_soft_pct: dec!(0.05),
            drawdown_soft_scale: dec!(0.5),
            drawdown_lockout_pct: dec!(0.15),
            drawdown_breaker_pct: dec!(0.20),
        }
    }
}
