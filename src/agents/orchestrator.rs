//! Orchestrator
//!
//! Owns the agent lifecycles: constructs them in dependency order (data
//! before scanning, scanning before analysis, analysis before execution),
//! wires them through the event bus, supervises risk events, and stops
//! everything in reverse order with a bounded drain timeout.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::comms::Notifier;
use crate::core::agent::{AgentState, Scheduler};
use crate::core::events::{EventBus, RiskEvent};
use crate::data::DataProvider;
use crate::risk::exits::ExitConfig;
use crate::risk::manager::RiskManager;
use crate::risk::RiskLimits;

use super::analyzer::{AnalyzerAgent, AnalyzerConfig};
use super::executor::{ExecutorAgent, ExecutorConfig};
use super::scanner::{ScannerAgent, ScannerConfig};

/// Everything needed to assemble the live pipeline
pub struct OrchestratorConfig {
    pub watchlist: Vec<String>,
    pub benchmark: String,
    pub starting_cash: Decimal,
    pub scan_interval: Duration,
    pub pipeline_interval: Duration,
    pub drain_timeout: Duration,
    pub limits: RiskLimits,
    pub exits: ExitConfig,
    pub scanner: ScannerConfig,
    pub analyzer: AnalyzerConfig,
    pub executor: ExecutorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            watchlist: Vec::new(),
            benchmark: crate::universe::BENCHMARK.to_string(),
            starting_cash: Decimal::from(25_000u64),
            scan_interval: Duration::from_secs(60),
            pipeline_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(10),
            limits: RiskLimits::default(),
            exits: ExitConfig::default(),
            scanner: ScannerConfig::default(),
            analyzer: AnalyzerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

pub struct Orchestrator {
    bus: EventBus,
    risk: Arc<RiskManager>,
    notifier: Notifier,
    cfg: OrchestratorConfig,
    data: Arc<dyn DataProvider>,
    broker: Arc<dyn Broker>,
    halt_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    /// Agent handles in start order; stopped in reverse
    handles: Vec<(String, JoinHandle<AgentState>)>,
    supervisor: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        data: Arc<dyn DataProvider>,
        broker: Arc<dyn Broker>,
        notifier: Notifier,
    ) -> Self {
        let bus = EventBus::new();
        let risk = Arc::new(RiskManager::new(
            cfg.limits.clone(),
            cfg.starting_cash,
            bus.risk.clone(),
        ));
        let (halt_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            bus,
            risk,
            notifier,
            cfg,
            data,
            broker,
            halt_tx,
            shutdown_tx,
            handles: Vec::new(),
            supervisor: None,
        }
    }

    pub fn risk(&self) -> Arc<RiskManager> {
        self.risk.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Manually halt the trade-submission path
    pub fn halt(&self, reason: &str) {
        warn!("HALTING TRADE SUBMISSION: {}", reason);
        self.halt_tx.send_replace(true);
    }

    /// Resume after a manual halt and reset the breaker
    pub fn resume(&self) {
        info!("resuming trade submission");
        self.risk.reset_circuit_breaker();
        self.halt_tx.send_replace(false);
    }

    /// Construct agents in dependency order, wire their subscriptions,
    /// and start the schedulers.
    pub fn start(&mut self) {
        // Supervisor first so no risk event is missed
        let risk_rx = self.bus.risk.subscribe();
        let halt_tx = self.halt_tx.clone();
        let notifier = self.notifier.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.supervisor = Some(tokio::spawn(async move {
            let mut risk_rx = risk_rx;
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    event = risk_rx.recv() => match event {
                        Ok(RiskEvent::CircuitBreakerTripped { drawdown_pct, at: _ }) => {
                            warn!("circuit breaker tripped, halting submission path");
                            halt_tx.send_replace(true);
                            notifier.notify_circuit_breaker(drawdown_pct);
                        }
                        Ok(RiskEvent::DailyLimitReached { daily_loss, at: _ }) => {
                            notifier.notify_daily_limit(daily_loss);
                        }
                        Ok(RiskEvent::DrawdownWarning { drawdown_pct, at: _ }) => {
                            warn!(
                                "drawdown warning: {:.2}% from peak, sizes halved",
                                drawdown_pct * Decimal::from(100u64)
                            );
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("supervisor lagged {} risk events", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }));

        // Subscribe downstream stages before the upstream publishes
        let analyzer = AnalyzerAgent::new(
            self.bus.signals.subscribe(),
            self.bus.setups.clone(),
            self.risk.clone(),
            self.cfg.analyzer.clone(),
            self.cfg.exits.clone(),
        );
        let executor = ExecutorAgent::new(
            self.bus.setups.subscribe(),
            self.bus.executions.clone(),
            self.risk.clone(),
            self.broker.clone(),
            self.data.clone(),
            self.notifier.clone(),
            self.halt_tx.subscribe(),
            self.cfg.exits.clone(),
            self.cfg.executor.clone(),
        );
        let scanner = ScannerAgent::new(
            self.cfg.watchlist.clone(),
            self.cfg.benchmark.clone(),
            self.data.clone(),
            self.bus.signals.clone(),
            self.cfg.scanner.clone(),
        );

        let executor_handle = Scheduler::new(self.cfg.pipeline_interval, self.shutdown_tx.subscribe())
            .spawn(executor);
        let analyzer_handle = Scheduler::new(self.cfg.pipeline_interval, self.shutdown_tx.subscribe())
            .spawn(analyzer);
        let scanner_handle =
            Scheduler::new(self.cfg.scan_interval, self.shutdown_tx.subscribe()).spawn(scanner);

        // Start order: execution sinks first, producer last
        self.handles.push(("executor".to_string(), executor_handle));
        self.handles.push(("analyzer".to_string(), analyzer_handle));
        self.handles.push(("scanner".to_string(), scanner_handle));

        info!("orchestrator: {} agents started", self.handles.len());
    }

    /// Stop agents in reverse start order, draining in-flight work with a
    /// bounded timeout before forced cancellation.
    pub async fn shutdown(&mut self) {
        info!("orchestrator: shutting down");
        self.shutdown_tx.send_replace(true);

        while let Some((name, handle)) = self.handles.pop() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.cfg.drain_timeout, handle).await {
                Ok(Ok(state)) => info!("{}: {}", name, state),
                Ok(Err(e)) => warn!("{}: join error: {}", name, e),
                Err(_) => {
                    warn!("{}: drain timeout, aborting", name);
                    abort.abort();
                }
            }
        }

        if let Some(supervisor) = self.supervisor.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), supervisor).await;
        }

        info!("orchestrator: shutdown complete | {}", self.risk.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::core::events::ExecutionEvent;
    use crate::core::types::Candle;
    use crate::data::HistoricalData;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// One strongly outperforming symbol against a flat benchmark
    fn seeded_store() -> HistoricalData {
        let mut store = HistoricalData::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let spy: Vec<Candle> = (0..40)
            .map(|i| {
                Candle::new(
                    t0 + ChronoDuration::days(i),
                    dec!(400),
                    dec!(401),
                    dec!(399),
                    dec!(400),
                    5_000_000,
                )
            })
            .collect();
        store.insert("SPY", spy);

        let mover: Vec<Candle> = (0..40)
            .map(|i| {
                let base = dec!(100) + Decimal::from(i as u64) * dec!(0.3);
                let close = if i == 39 { base + dec!(6) } else { base };
                Candle::new(
                    t0 + ChronoDuration::days(i),
                    base - dec!(0.2),
                    close + dec!(0.5),
                    base - dec!(0.5),
                    close,
                    2_000_000,
                )
            })
            .collect();
        store.insert("NVDA", mover);
        store
    }

    #[tokio::test]
    async fn test_end_to_end_signal_to_execution() {
        let cfg = OrchestratorConfig {
            watchlist: vec!["NVDA".to_string()],
            starting_cash: dec!(100000),
            scan_interval: std::time::Duration::from_millis(50),
            pipeline_interval: std::time::Duration::from_millis(20),
            executor: ExecutorConfig { auto_trade: true, exit_check_secs: 3600 },
            ..OrchestratorConfig::default()
        };

        let data = Arc::new(seeded_store());
        let broker = Arc::new(PaperBroker::new(dec!(100000)));
        let mut orchestrator = Orchestrator::new(cfg, data, broker, Notifier::disabled());

        let mut executions = orchestrator.bus().executions.subscribe();
        let risk = orchestrator.risk();

        orchestrator.start();

        // Let the pipeline run a few scan cycles
        let fill = tokio::time::timeout(std::time::Duration::from_secs(3), executions.recv())
            .await
            .expect("pipeline produced no execution")
            .expect("executions channel closed");

        match fill {
            ExecutionEvent::Executed { symbol, shares, .. } => {
                assert_eq!(symbol, "NVDA");
                assert!(shares > Decimal::ZERO);
            }
            other => panic!("expected a fill, got {:?}", other),
        }
        assert!(risk.has_position("NVDA"));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_halt_stops_submission_but_not_scanning() {
        let cfg = OrchestratorConfig {
            watchlist: vec!["NVDA".to_string()],
            starting_cash: dec!(100000),
            scan_interval: std::time::Duration::from_millis(50),
            pipeline_interval: std::time::Duration::from_millis(20),
            executor: ExecutorConfig { auto_trade: true, exit_check_secs: 3600 },
            scanner: ScannerConfig { cooldown_secs: 0, ..ScannerConfig::default() },
            ..OrchestratorConfig::default()
        };

        let data = Arc::new(seeded_store());
        let broker = Arc::new(PaperBroker::new(dec!(100000)));
        let mut orchestrator = Orchestrator::new(cfg, data, broker, Notifier::disabled());

        let mut signals = orchestrator.bus().signals.subscribe();
        let mut executions = orchestrator.bus().executions.subscribe();
        let risk = orchestrator.risk();

        orchestrator.halt("test");
        orchestrator.start();

        // Scanner keeps producing signals while halted
        let signal = tokio::time::timeout(std::time::Duration::from_secs(3), signals.recv())
            .await
            .expect("scanner stopped")
            .expect("signals channel closed");
        assert_eq!(signal.signal.symbol, "NVDA");

        // The execution path only ever rejects
        let event = tokio::time::timeout(std::time::Duration::from_secs(3), executions.recv())
            .await
            .expect("no execution event")
            .expect("executions channel closed");
        match event {
            ExecutionEvent::Rejected { reason, .. } => assert!(reason.contains("halted")),
            other => panic!("expected rejection while halted, got {:?}", other),
        }
        assert!(!risk.has_position("NVDA"));

        orchestrator.shutdown().await;
    }
}
