//! Error taxonomy for the trading core
//!
//! Transient faults (data gaps) are retried by the calling agent on its
//! next tick. Risk rejections are expected business outcomes, not system
//! faults. Only configuration errors and internal invariant violations
//! terminate the process.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::data::DataError;

#[derive(Debug, Error)]
pub enum TradingError {
    /// Transient data-fetch failure. Never fatal; the agent logs it and
    /// proceeds on the next tick.
    #[error(transparent)]
    Data(#[from] DataError),

    /// A trade was rejected by the risk engine. Surfaced as a
    /// `TradeRejected` event, not an error path.
    #[error("risk violation: {0}")]
    Risk(String),

    /// Broker-side order fault. The position is never created.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Drawdown breaker fired. Fatal to the trade-submission path only.
    #[error("circuit breaker tripped at {drawdown_pct:.2}% drawdown")]
    CircuitBreaker { drawdown_pct: Decimal },

    /// Invalid configuration. The process must not begin scheduling.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation (e.g. negative equity). Fatal.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
