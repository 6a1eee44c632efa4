//! Market data access
//!
//! The provider boundary: callers treat `DataError::Unavailable` as
//! transient and retry on their next tick, never as fatal.

pub mod csv;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::types::Candle;

pub use csv::{load_csv, HistoricalData};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("data unavailable for {symbol}: {detail}")]
    Unavailable { symbol: String, detail: String },
}

impl DataError {
    pub fn unavailable(symbol: &str, detail: impl Into<String>) -> Self {
        Self::Unavailable { symbol: symbol.to_string(), detail: detail.into() }
    }
}

/// Bar granularity requested from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarInterval {
    Daily,
    Minutes(u32),
}

/// Latest price snapshot for a symbol
#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: String,
    pub last: Decimal,
    pub previous_close: Decimal,
    pub time: DateTime<Utc>,
}

/// Market-data collaborator
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Ordered OHLCV history, oldest first, at most `lookback` bars
    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: BarInterval,
        lookback: usize,
    ) -> Result<Vec<Candle>, DataError>;

    /// Latest price for a symbol
    async fn fetch_snapshot(&self, symbol: &str) -> Result<Quote, DataError>;
}
