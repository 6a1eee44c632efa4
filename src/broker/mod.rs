//! Broker abstractions
//!
//! Order submission carries an idempotency key so it is never silently
//! retried into a duplicate fill; status queries are safely retryable.

pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::core::types::Direction;

pub use paper::PaperBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Broker refused the order. The position is never created.
    #[error("order rejected: {0}")]
    Rejected(String),
    /// Transport-level failure; the order state is unknown. Callers must
    /// re-submit with the same idempotency key, never a fresh one.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("unknown order id: {0}")]
    UnknownOrder(String),
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
    SellShort,
    BuyToCover,
}

impl OrderSide {
    /// Side that opens a position in the given direction
    pub fn entry(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::SellShort,
        }
    }

    /// Side that closes a position in the given direction
    pub fn exit(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::BuyToCover,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, OrderSide::Buy | OrderSide::SellShort)
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
            OrderSide::SellShort => "SELL_SHORT",
            OrderSide::BuyToCover => "BUY_TO_COVER",
        };
        write!(f, "{}", s)
    }
}

/// An order request. `idempotency_key` deduplicates re-submissions.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub idempotency_key: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: Decimal,
    /// Requested fill price; paper fills happen here
    pub price: Decimal,
    /// Protective stop attached to an entry
    pub stop_price: Option<Decimal>,
    /// Profit target attached to an entry
    pub target_price: Option<Decimal>,
}

/// Confirmation of a filled order
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: Decimal,
    pub fill_price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// A position as the broker reports it
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub direction: Direction,
    pub shares: Decimal,
    pub avg_entry_price: Decimal,
}

/// Broker collaborator
#[async_trait]
pub trait Broker: Send + Sync {
    async fn submit_order(&self, order: OrderRequest) -> Result<OrderConfirmation, BrokerError>;

    /// Idempotent status query
    async fn open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;
}
