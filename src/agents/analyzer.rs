//! Analyzer agent
//!
//! Consumes `SignalDetected`, applies the structural and volatility
//! filters, sizes the trade, and publishes `TradeSetupReady`. A filtered
//! signal is dropped silently with a debug log: an expected outcome, not
//! an error.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::agent::{Agent, AgentMetrics};
use crate::core::events::{SetupEvent, SignalEvent, Topic};
use crate::core::types::{Direction, Signal, TradeSetup};
use crate::error::TradingError;
use crate::risk::exits::ExitConfig;
use crate::risk::manager::RiskManager;
use crate::risk::sizer;

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Minimum daily structure score (0-5) in the signal's direction
    pub min_structure_score: u8,
    /// Minimum reward-to-risk ratio
    pub min_risk_reward: Decimal,
    /// Maximum ATR as a percentage of price
    pub max_atr_percent: Decimal,
    /// Use trailing half-Kelly sizing when enough history exists
    pub use_kelly: bool,
    pub kelly_min_trades: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_structure_score: 3,
            min_risk_reward: dec!(2.0),
            max_atr_percent: dec!(5.0),
            use_kelly: false,
            kelly_min_trades: 30,
        }
    }
}

pub struct AnalyzerAgent {
    rx: broadcast::Receiver<SignalEvent>,
    setups: Topic<SetupEvent>,
    risk: Arc<RiskManager>,
    cfg: AnalyzerConfig,
    exits: ExitConfig,
    metrics: AgentMetrics,
    analyzed: u64,
    approved: u64,
}

impl AnalyzerAgent {
    pub fn new(
        rx: broadcast::Receiver<SignalEvent>,
        setups: Topic<SetupEvent>,
        risk: Arc<RiskManager>,
        cfg: AnalyzerConfig,
        exits: ExitConfig,
    ) -> Self {
        Self {
            rx,
            setups,
            risk,
            cfg,
            exits,
            metrics: AgentMetrics::default(),
            analyzed: 0,
            approved: 0,
        }
    }

    pub fn approval_rate(&self) -> f64 {
        if self.analyzed == 0 {
            return 0.0;
        }
        self.approved as f64 / self.analyzed as f64
    }

    /// Validate and size one signal. Returns the setup it published.
    fn analyze(&mut self, signal: Signal) -> Option<TradeSetup> {
        self.analyzed += 1;

        // Structural filter: the daily chart must agree with the direction
        let score = match signal.direction {
            Direction::Long => signal.structure.strength_score,
            Direction::Short => signal.structure.weakness_score,
        };
        if score < self.cfg.min_structure_score {
            debug!(
                "{}: dropped, structure score {} < {}",
                signal.symbol, score, self.cfg.min_structure_score
            );
            return None;
        }

        // Volatility sanity: reject names whose ATR dwarfs the price
        if signal.price > Decimal::ZERO {
            let atr_percent = signal.atr / signal.price * dec!(100);
            if atr_percent > self.cfg.max_atr_percent {
                debug!("{}: dropped, ATR {:.1}% of price", signal.symbol, atr_percent);
                return None;
            }
        }

        let equity = self.risk.equity();
        let kelly = if self.cfg.use_kelly {
            self.risk.kelly_stats(self.cfg.kelly_min_trades)
        } else {
            None
        };

        let sizing = match sizer::size_from_atr(
            equity,
            signal.price,
            signal.atr,
            signal.direction,
            self.exits.stop_atr_multiplier,
            self.exits.target_atr_multiplier,
            self.risk.limits(),
            kelly.as_ref(),
        ) {
            Ok(sizing) => sizing,
            Err(rejection) => {
                debug!("{}: dropped, {}", signal.symbol, rejection);
                return None;
            }
        };

        let setup = TradeSetup {
            entry_price: signal.price,
            stop_price: sizing.stop_price,
            target_price: sizing.target_price,
            shares: sizing.shares,
            risk_amount: sizing.risk_amount,
            notional: sizing.notional,
            signal,
        };

        if setup.risk_reward_ratio() < self.cfg.min_risk_reward {
            debug!(
                "{}: dropped, R/R {:.2} < {}",
                setup.symbol(),
                setup.risk_reward_ratio(),
                self.cfg.min_risk_reward
            );
            return None;
        }

        self.approved += 1;
        info!(
            "setup: {} {} x{} entry {} stop {} target {} ({})",
            setup.direction(),
            setup.symbol(),
            setup.shares,
            setup.entry_price,
            setup.stop_price,
            setup.target_price,
            sizing.reason,
        );
        self.setups.publish(SetupEvent { setup: setup.clone(), published_at: Utc::now() });
        self.metrics.record_published(1);
        Some(setup)
    }
}

#[async_trait]
impl Agent for AnalyzerAgent {
    fn name(&self) -> &str {
        "analyzer"
    }

    async fn start(&mut self) -> Result<(), TradingError> {
        info!(
            "analyzer: structure >= {}, R/R >= {}",
            self.cfg.min_structure_score, self.cfg.min_risk_reward
        );
        Ok(())
    }

    async fn tick(&mut self) -> Result<(), TradingError> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.analyze(event.signal);
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("analyzer lagged, {} signals dropped", missed);
                }
                Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
        self.metrics.record_tick();
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TradingError> {
        info!(
            "analyzer: {} analyzed, {} approved ({:.0}%)",
            self.analyzed,
            self.approved,
            self.approval_rate() * 100.0
        );
        Ok(())
    }
}
