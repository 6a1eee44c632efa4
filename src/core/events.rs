//! Typed publish/subscribe event bus
//!
//! Each topic is a broadcast ring with a closed payload union. Publishing
//! enqueues and never blocks the publisher; every subscriber runs on its
//! own task, so a slow handler lags its own receiver without stalling
//! unrelated agents. Dropping a receiver is the unsubscription.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::core::types::{Direction, ExitReason, Signal, TradeSetup};

/// Default ring capacity per topic
pub const TOPIC_CAPACITY: usize = 256;

/// A single typed topic backed by a broadcast channel
#[derive(Debug, Clone)]
pub struct Topic<T: Clone + Send + 'static> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    /// Enqueue an event for all current subscribers. Returns the number
    /// of receivers it reached; zero subscribers is not an error.
    pub fn publish(&self, event: T) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Register a subscriber. The returned receiver doubles as the
    /// unsubscription token: dropping it unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// `SignalDetected`: a raw scanner signal crossing the RRS threshold
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub signal: Signal,
    pub published_at: DateTime<Utc>,
}

/// `TradeSetupReady`: a validated, sized setup awaiting authorization
#[derive(Debug, Clone)]
pub struct SetupEvent {
    pub setup: TradeSetup,
    pub published_at: DateTime<Utc>,
}

/// Execution outcomes, both fills and rejections
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// `TradeExecuted`: order confirmed, position registered
    Executed {
        symbol: String,
        direction: Direction,
        shares: Decimal,
        fill_price: Decimal,
        order_id: String,
        at: DateTime<Utc>,
    },
    /// `TradeRejected`: refused by the risk engine or the broker
    Rejected {
        symbol: String,
        reason: String,
        at: DateTime<Utc>,
    },
    /// A position (or part of one) was closed by exit management
    Closed {
        symbol: String,
        shares: Decimal,
        exit_price: Decimal,
        reason: ExitReason,
        pnl: Decimal,
        at: DateTime<Utc>,
    },
}

/// Risk-engine notifications consumed by the orchestrator
#[derive(Debug, Clone)]
pub enum RiskEvent {
    DailyLimitReached {
        daily_loss: Decimal,
        at: DateTime<Utc>,
    },
    DrawdownWarning {
        drawdown_pct: Decimal,
        at: DateTime<Utc>,
    },
    /// Fatal to the trade-submission path. Scanning continues;
    /// execution does not.
    CircuitBreakerTripped {
        drawdown_pct: Decimal,
        at: DateTime<Utc>,
    },
}

/// The closed set of topics connecting the agents
#[derive(Debug, Clone)]
pub struct EventBus {
    pub signals: Topic<SignalEvent>,
    pub setups: Topic<SetupEvent>,
    pub executions: Topic<ExecutionEvent>,
    pub risk: Topic<RiskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            signals: Topic::new(TOPIC_CAPACITY),
            setups: Topic::new(TOPIC_CAPACITY),
            executions: Topic::new(TOPIC_CAPACITY),
            risk: Topic::new(TOPIC_CAPACITY),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let topic: Topic<u64> = Topic::new(32);
        let mut rx = topic.subscribe();
        assert_eq!(topic.publish(7), 1);
        assert_eq!(rx.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn each_subscriber_gets_one_copy() {
        let topic: Topic<u64> = Topic::new(32);
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();
        assert_eq!(topic.publish(42), 2);
        assert_eq!(a.recv().await.unwrap(), 42);
        assert_eq!(b.recv().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let topic: Topic<u64> = Topic::new(32);
        assert_eq!(topic.publish(1), 0);
    }

    #[tokio::test]
    async fn dropped_receiver_unsubscribes() {
        let topic: Topic<u64> = Topic::new(32);
        let rx = topic.subscribe();
        assert_eq!(topic.receiver_count(), 1);
        drop(rx);
        assert_eq!(topic.receiver_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_publisher() {
        let topic: Topic<u64> = Topic::new(16);
        let mut rx = topic.subscribe();

        // Overrun the ring; publish never blocks
        for i in 0..100u64 {
            topic.publish(i);
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed > 0),
            other => panic!("expected lag, got {:?}", other),
        }
    }
}
