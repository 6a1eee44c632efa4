//! Executor agent
//!
//! Consumes `TradeSetupReady`, authorizes through the risk manager, and
//! submits orders. The halt flag is checked at tick start AND immediately
//! before submission so a circuit-breaker trip can never race one more
//! order through. Also runs the scheduled exit sweep over open positions.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerError, OrderRequest, OrderSide};
use crate::comms::Notifier;
use crate::core::agent::{Agent, AgentMetrics};
use crate::core::events::{ExecutionEvent, SetupEvent, Topic};
use crate::core::types::{Position, TradeSetup};
use crate::data::DataProvider;
use crate::error::TradingError;
use crate::risk::exits::{BarView, ExitConfig};
use crate::risk::manager::{Decision, RiskManager};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// When false, approved setups are notified but not submitted
    pub auto_trade: bool,
    /// Seconds between exit-management sweeps over open positions
    pub exit_check_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { auto_trade: false, exit_check_secs: 30 }
    }
}

pub struct ExecutorAgent {
    rx: broadcast::Receiver<SetupEvent>,
    executions: Topic<ExecutionEvent>,
    risk: Arc<RiskManager>,
    broker: Arc<dyn Broker>,
    data: Arc<dyn DataProvider>,
    notifier: Notifier,
    halt: watch::Receiver<bool>,
    exits: ExitConfig,
    cfg: ExecutorConfig,
    /// Protective order ids to cancel on shutdown
    working_orders: Vec<String>,
    last_exit_sweep: Option<Instant>,
    metrics: AgentMetrics,
}

impl ExecutorAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: broadcast::Receiver<SetupEvent>,
        executions: Topic<ExecutionEvent>,
        risk: Arc<RiskManager>,
        broker: Arc<dyn Broker>,
        data: Arc<dyn DataProvider>,
        notifier: Notifier,
        halt: watch::Receiver<bool>,
        exits: ExitConfig,
        cfg: ExecutorConfig,
    ) -> Self {
        Self {
            rx,
            executions,
            risk,
            broker,
            data,
            notifier,
            halt,
            exits,
            cfg,
            working_orders: Vec::new(),
            last_exit_sweep: None,
            metrics: AgentMetrics::default(),
        }
    }

    fn halted(&self) -> bool {
        *self.halt.borrow()
    }

    async fn handle_setup(&mut self, setup: TradeSetup) {
        let symbol = setup.symbol().to_string();

        match self.risk.authorize(&setup, Utc::now()) {
            Decision::Rejected { reason } => {
                info!("rejected: {} - {}", symbol, reason);
                self.executions.publish(ExecutionEvent::Rejected {
                    symbol: symbol.clone(),
                    reason: reason.to_string(),
                    at: Utc::now(),
                });
                self.notifier.notify_rejection(&symbol, &reason.to_string());
            }
            Decision::Approved { shares, risk_amount } => {
                if !self.cfg.auto_trade {
                    info!(
                        "approved (manual mode): {} {} x{} risking ${}",
                        setup.direction(),
                        symbol,
                        shares,
                        risk_amount
                    );
                    self.notifier.notify_setup(&setup);
                    return;
                }

                // Re-check the halt flag at the last possible moment: a
                // trip between authorize and submit must not admit one
                // more order
                if self.halted() {
                    info!("halted after authorization, dropping {}", symbol);
                    self.executions.publish(ExecutionEvent::Rejected {
                        symbol,
                        reason: "trading halted".to_string(),
                        at: Utc::now(),
                    });
                    return;
                }

                self.submit(setup, shares).await;
            }
        }
    }

    async fn submit(&mut self, setup: TradeSetup, shares: rust_decimal::Decimal) {
        let symbol = setup.symbol().to_string();
        let order = OrderRequest {
            idempotency_key: Uuid::new_v4(),
            symbol: symbol.clone(),
            side: OrderSide::entry(setup.direction()),
            shares,
            price: setup.entry_price,
            stop_price: Some(setup.stop_price),
            target_price: Some(setup.target_price),
        };

        match self.broker.submit_order(order).await {
            Ok(confirmation) => {
                let position =
                    Position::from_setup(&setup, shares, confirmation.fill_price, confirmation.filled_at);
                if let Err(e) = self.risk.open_position(position) {
                    error!("{}: fill confirmed but registration failed: {}", symbol, e);
                    return;
                }

                info!(
                    "executed: {} {} x{} @ {} ({})",
                    setup.direction(),
                    symbol,
                    shares,
                    confirmation.fill_price,
                    confirmation.order_id
                );
                self.working_orders.push(format!("{}-protective", confirmation.order_id));
                self.executions.publish(ExecutionEvent::Executed {
                    symbol: symbol.clone(),
                    direction: setup.direction(),
                    shares,
                    fill_price: confirmation.fill_price,
                    order_id: confirmation.order_id,
                    at: confirmation.filled_at,
                });
                self.notifier.notify_execution(
                    &symbol,
                    &setup.direction().to_string(),
                    shares,
                    confirmation.fill_price,
                );
                self.metrics.record_published(1);
            }
            Err(BrokerError::Rejected(reason)) => {
                warn!("order rejected: {} - {}", symbol, reason);
                self.executions.publish(ExecutionEvent::Rejected {
                    symbol: symbol.clone(),
                    reason: reason.clone(),
                    at: Utc::now(),
                });
                self.notifier.notify_rejection(&symbol, &reason);
            }
            Err(e) => {
                // Unknown order state: surfaced, never silently retried
                // with a fresh idempotency key
                warn!("order submission failed for {}: {}", symbol, e);
            }
        }
    }

    /// Walk open positions, mark prices, evaluate the exit policy and
    /// apply whatever it returns.
    async fn manage_positions(&mut self) {
        let now = Utc::now();

        for symbol in self.risk.open_symbols() {
            let quote = match self.data.fetch_snapshot(&symbol).await {
                Ok(quote) => quote,
                Err(e) => {
                    debug!("exit sweep: {} skipped: {}", symbol, e);
                    continue;
                }
            };

            self.risk.mark_price(&symbol, quote.last);
            let bar = BarView::from_quote(quote.last);
            let steps = self.risk.run_exit_checks(&symbol, &bar, now, &self.exits);

            for step in steps {
                let Some(applied) = self.risk.apply_exit_step(&symbol, &step, now) else {
                    continue;
                };

                // Mirror the account-side close at the broker
                let order = OrderRequest {
                    idempotency_key: Uuid::new_v4(),
                    symbol: symbol.clone(),
                    side: OrderSide::exit(applied.direction),
                    shares: applied.shares_closed,
                    price: applied.price,
                    stop_price: None,
                    target_price: None,
                };
                if let Err(e) = self.broker.submit_order(order).await {
                    warn!("exit order failed for {}: {}", symbol, e);
                }

                info!(
                    "exit: {} x{} @ {} ({}) P&L ${}",
                    symbol, applied.shares_closed, applied.price, applied.reason, applied.pnl
                );
                self.executions.publish(ExecutionEvent::Closed {
                    symbol: symbol.clone(),
                    shares: applied.shares_closed,
                    exit_price: applied.price,
                    reason: applied.reason,
                    pnl: applied.pnl,
                    at: now,
                });
                if let Some(trade) = applied.trade {
                    self.notifier.notify_close(&trade);
                }
            }
        }
    }

    fn exit_sweep_due(&self) -> bool {
        match self.last_exit_sweep {
            None => true,
            Some(last) => last.elapsed() >= Duration::from_secs(self.cfg.exit_check_secs),
        }
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
    fn name(&self) -> &str {
        "executor"
    }

    async fn start(&mut self) -> Result<(), TradingError> {
        info!(
            "executor: auto_trade={}, exit sweep every {}s",
            self.cfg.auto_trade, self.cfg.exit_check_secs
        );
        Ok(())
    }

    async fn tick(&mut self) -> Result<(), TradingError> {
        // Drain pending setups
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.halted() {
                        info!("halted: dropping setup {}", event.setup.symbol());
                        self.executions.publish(ExecutionEvent::Rejected {
                            symbol: event.setup.symbol().to_string(),
                            reason: "trading halted".to_string(),
                            at: Utc::now(),
                        });
                        continue;
                    }
                    self.handle_setup(event.setup).await;
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("executor lagged, {} setups dropped", missed);
                }
                Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }

        // Exit management runs even while halted: existing positions are
        // still managed, only new submission stops
        if self.exit_sweep_due() {
            self.last_exit_sweep = Some(Instant::now());
            self.manage_positions().await;
        }

        self.metrics.record_tick();
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TradingError> {
        for order_id in self.working_orders.drain(..) {
            if let Err(e) = self.broker.cancel_order(&order_id).await {
                debug!("cancel {} on shutdown: {}", order_id, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::core::events::RiskEvent;
    use crate::core::types::{Direction, Signal, StructureSnapshot};
    use crate::data::HistoricalData;
    use crate::risk::RiskLimits;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn setup(symbol: &str) -> TradeSetup {
        TradeSetup {
            signal: Signal {
                symbol: symbol.to_string(),
                time: Utc::now(),
                rrs: 2.45,
                direction: Direction::Long,
                price: dec!(100),
                atr: dec!(4),
                structure: StructureSnapshot {
                    strength_score: 4,
                    weakness_score: 0,
                    ema3: dec!(99),
                    ema8: dec!(98),
                    ema21: dec!(97),
                },
            },
            entry_price: dec!(100),
            stop_price: dec!(97),
            target_price: dec!(108),
            shares: dec!(20),
            risk_amount: dec!(60),
            notional: dec!(2000),
        }
    }

    struct Harness {
        executor: ExecutorAgent,
        executions: broadcast::Receiver<ExecutionEvent>,
        halt_tx: watch::Sender<bool>,
        risk: Arc<RiskManager>,
    }

    fn harness(auto_trade: bool) -> Harness {
        let setups: Topic<SetupEvent> = Topic::new(16);
        let executions: Topic<ExecutionEvent> = Topic::new(16);
        let executions_rx = executions.subscribe();
        let risk_topic: Topic<RiskEvent> = Topic::new(16);
        let risk = Arc::new(RiskManager::new(RiskLimits::default(), dec!(25000), risk_topic));
        let broker = Arc::new(PaperBroker::new(dec!(25000)));
        let data = Arc::new(HistoricalData::new());
        let (halt_tx, halt_rx) = watch::channel(false);

        let executor = ExecutorAgent::new(
            setups.subscribe(),
            executions,
            risk.clone(),
            broker,
            data,
            Notifier::disabled(),
            halt_rx,
            ExitConfig::default(),
            ExecutorConfig { auto_trade, exit_check_secs: 3600 },
        );

        Harness { executor, executions: executions_rx, halt_tx, risk }
    }

    #[tokio::test]
    async fn test_approved_setup_executes_and_registers_position() {
        let mut h = harness(true);
        h.executor.handle_setup(setup("AAPL")).await;

        match h.executions.try_recv().unwrap() {
            ExecutionEvent::Executed { symbol, shares, fill_price, .. } => {
                assert_eq!(symbol, "AAPL");
                assert_eq!(shares, dec!(20));
                assert_eq!(fill_price, dec!(100));
            }
            other => panic!("expected fill, got {:?}", other),
        }
        assert!(h.risk.has_position("AAPL"));
    }

    #[tokio::test]
    async fn test_manual_mode_notifies_without_submitting() {
        let mut h = harness(false);
        h.executor.handle_setup(setup("AAPL")).await;

        assert!(h.executions.try_recv().is_err());
        assert!(!h.risk.has_position("AAPL"));
    }

    #[tokio::test]
    async fn test_halt_blocks_submission_after_authorization() {
        let mut h = harness(true);
        h.halt_tx.send(true).unwrap();
        h.executor.handle_setup(setup("AAPL")).await;

        match h.executions.try_recv().unwrap() {
            ExecutionEvent::Rejected { reason, .. } => {
                assert!(reason.contains("halted"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!h.risk.has_position("AAPL"));
    }

    #[tokio::test]
    async fn test_risk_rejection_publishes_trade_rejected() {
        let mut h = harness(true);
        // Fill the position slots
        for sym in ["A", "B", "C", "D", "E"] {
            h.executor.handle_setup(setup(sym)).await;
        }
        while h.executions.try_recv().is_ok() {}

        h.executor.handle_setup(setup("F")).await;
        match h.executions.try_recv().unwrap() {
            ExecutionEvent::Rejected { symbol, reason, .. } => {
                assert_eq!(symbol, "F");
                assert!(reason.contains("positions"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exit_sweep_closes_stopped_position() {
        let mut h = harness(true);
        h.executor.handle_setup(setup("AAPL")).await;
        assert!(h.risk.has_position("AAPL"));

        // Feed a snapshot below the stop
        let mut store = HistoricalData::new();
        let t0 = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<_> = (0..3)
            .map(|i| {
                crate::core::types::Candle::new(
                    t0 + chrono::Duration::days(i),
                    dec!(96),
                    dec!(97),
                    dec!(95),
                    dec!(96),
                    1_000_000,
                )
            })
            .collect();
        store.insert("AAPL", bars);
        h.executor.data = Arc::new(store);

        h.executor.manage_positions().await;

        assert!(!h.risk.has_position("AAPL"));
        let mut saw_close = false;
        while let Ok(event) = h.executions.try_recv() {
            if let ExecutionEvent::Closed { symbol, reason, shares, .. } = event {
                assert_eq!(symbol, "AAPL");
                assert_eq!(reason, crate::core::types::ExitReason::StopLoss);
                assert_eq!(shares, dec!(20));
                saw_close = true;
            }
        }
        assert!(saw_close);

        // Realized loss flows into the daily P&L
        let snapshot = h.risk.account_snapshot().unwrap();
        assert_eq!(snapshot.realized_pnl_today, dec!(-60));
        let _: Decimal = snapshot.equity;
    }
}
