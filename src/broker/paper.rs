//! Paper broker
//!
//! Fills at the requested price, tracks positions and buying power, and
//! deduplicates submissions by idempotency key so a retried order can
//! never double-fill.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::{
    Broker, BrokerError, BrokerPosition, OrderConfirmation, OrderRequest, OrderSide,
};
use crate::core::types::Direction;

#[derive(Debug, Default)]
struct PaperState {
    cash: Decimal,
    positions: HashMap<String, BrokerPosition>,
    /// Confirmations by idempotency key for dedup
    seen: HashMap<Uuid, OrderConfirmation>,
    /// Resting protective orders by id
    working_orders: HashMap<String, String>,
    next_id: u64,
}

pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(starting_cash: Decimal) -> Self {
        info!("PaperBroker: ${} buying power", starting_cash);
        Self {
            state: Mutex::new(PaperState { cash: starting_cash, ..PaperState::default() }),
        }
    }

    pub async fn cash(&self) -> Decimal {
        self.state.lock().await.cash
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit_order(&self, order: OrderRequest) -> Result<OrderConfirmation, BrokerError> {
        let mut state = self.state.lock().await;

        // Same key, same confirmation: a retry is not a new fill
        if let Some(existing) = state.seen.get(&order.idempotency_key) {
            debug!("{}: duplicate submission ignored ({})", order.symbol, existing.order_id);
            return Ok(existing.clone());
        }

        if order.shares <= Decimal::ZERO {
            return Err(BrokerError::Rejected("non-positive share count".to_string()));
        }
        if order.price <= Decimal::ZERO {
            return Err(BrokerError::Rejected("non-positive price".to_string()));
        }

        let notional = order.shares * order.price;

        match order.side {
            side if side.is_entry() => {
                if notional > state.cash {
                    return Err(BrokerError::Rejected(format!(
                        "insufficient buying power: need ${}, have ${}",
                        notional, state.cash
                    )));
                }
                if state.positions.contains_key(&order.symbol) {
                    return Err(BrokerError::Rejected(format!(
                        "position already open in {}",
                        order.symbol
                    )));
                }

                state.cash -= notional;
                let direction = match side {
                    OrderSide::Buy => Direction::Long,
                    _ => Direction::Short,
                };
                state.positions.insert(
                    order.symbol.clone(),
                    BrokerPosition {
                        symbol: order.symbol.clone(),
                        direction,
                        shares: order.shares,
                        avg_entry_price: order.price,
                    },
                );
            }
            _ => {
                let Some(position) = state.positions.get_mut(&order.symbol) else {
                    return Err(BrokerError::Rejected(format!(
                        "no open position in {}",
                        order.symbol
                    )));
                };
                if order.shares > position.shares {
                    return Err(BrokerError::Rejected(format!(
                        "close size {} exceeds open {}",
                        order.shares, position.shares
                    )));
                }

                let pnl = match position.direction {
                    Direction::Long => (order.price - position.avg_entry_price) * order.shares,
                    Direction::Short => (position.avg_entry_price - order.price) * order.shares,
                };
                let released = position.avg_entry_price * order.shares + pnl;
                position.shares -= order.shares;
                let flat = position.shares.is_zero();
                if flat {
                    state.positions.remove(&order.symbol);
                }
                state.cash += released;
            }
        }

        state.next_id += 1;
        let confirmation = OrderConfirmation {
            order_id: format!("paper-{}", state.next_id),
            symbol: order.symbol.clone(),
            side: order.side,
            shares: order.shares,
            fill_price: order.price,
            filled_at: Utc::now(),
        };
        state.seen.insert(order.idempotency_key, confirmation.clone());

        // Track attached protective orders so shutdown can cancel them
        if order.stop_price.is_some() || order.target_price.is_some() {
            let stop_id = format!("{}-protective", confirmation.order_id);
            state.working_orders.insert(stop_id, order.symbol.clone());
        }

        debug!(
            "{}: {} {} filled at {}",
            order.symbol, order.side, order.shares, order.price
        );
        Ok(confirmation)
    }

    async fn open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let state = self.state.lock().await;
        let mut positions: Vec<_> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state
            .working_orders
            .remove(order_id)
            .map(|_| ())
            .ok_or_else(|| BrokerError::UnknownOrder(order_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(symbol: &str, shares: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            idempotency_key: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            shares,
            price,
            stop_price: Some(price - dec!(1)),
            target_price: Some(price + dec!(2)),
        }
    }

    #[tokio::test]
    async fn test_entry_reserves_cash_and_opens_position() {
        let broker = PaperBroker::new(dec!(10000));
        let conf = broker.submit_order(buy("AAPL", dec!(10), dec!(100))).await.unwrap();
        assert_eq!(conf.fill_price, dec!(100));

        assert_eq!(broker.cash().await, dec!(9000));
        let positions = broker.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].shares, dec!(10));
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_fills_once() {
        let broker = PaperBroker::new(dec!(10000));
        let order = buy("AAPL", dec!(10), dec!(100));
        let first = broker.submit_order(order.clone()).await.unwrap();
        let second = broker.submit_order(order).await.unwrap();

        assert_eq!(first.order_id, second.order_id);
        // Cash debited exactly once
        assert_eq!(broker.cash().await, dec!(9000));
    }

    #[tokio::test]
    async fn test_insufficient_buying_power_rejected() {
        let broker = PaperBroker::new(dec!(500));
        let err = broker.submit_order(buy("AAPL", dec!(10), dec!(100))).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_partial_close_returns_pnl() {
        let broker = PaperBroker::new(dec!(10000));
        broker.submit_order(buy("AAPL", dec!(10), dec!(100))).await.unwrap();

        let close = OrderRequest {
            idempotency_key: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Sell,
            shares: dec!(5),
            price: dec!(110),
            stop_price: None,
            target_price: None,
        };
        broker.submit_order(close).await.unwrap();

        // 5 shares released at $100 basis plus $50 profit
        assert_eq!(broker.cash().await, dec!(9550));
        let positions = broker.open_positions().await.unwrap();
        assert_eq!(positions[0].shares, dec!(5));
    }

    #[tokio::test]
    async fn test_close_without_position_rejected() {
        let broker = PaperBroker::new(dec!(10000));
        let close = OrderRequest {
            idempotency_key: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Sell,
            shares: dec!(5),
            price: dec!(110),
            stop_price: None,
            target_price: None,
        };
        assert!(broker.submit_order(close).await.is_err());
    }
}
