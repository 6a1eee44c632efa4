//! Agent lifecycle and scheduling
//!
//! An agent is a unit of concurrent work with a start/tick/stop contract.
//! The generic `Scheduler` owns the timing loop and drives any conforming
//! agent: no overlapping ticks, tick errors are caught and counted without
//! terminating the schedule, and shutdown is observed at tick boundaries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::TradingError;

/// Agent lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Created => "created",
            AgentState::Started => "started",
            AgentState::Running => "running",
            AgentState::Stopping => "stopping",
            AgentState::Stopped => "stopped",
            AgentState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Per-agent activity counters
#[derive(Debug, Clone, Default)]
pub struct AgentMetrics {
    pub ticks: u64,
    pub events_published: u64,
    pub errors: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AgentMetrics {
    pub fn record_tick(&mut self) {
        self.ticks += 1;
        self.last_activity = Some(Utc::now());
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn record_published(&mut self, count: u64) {
        self.events_published += count;
    }
}

/// A unit of concurrent work
#[async_trait]
pub trait Agent: Send {
    fn name(&self) -> &str;

    /// Acquire resources and register subscriptions
    async fn start(&mut self) -> Result<(), TradingError>;

    /// One unit of recurring work. Errors are transient by contract:
    /// the scheduler logs them and the next tick proceeds.
    async fn tick(&mut self) -> Result<(), TradingError>;

    /// Release resources, cancel outstanding work
    async fn stop(&mut self) -> Result<(), TradingError>;
}

/// Drives an agent on a fixed interval
pub struct Scheduler {
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self { interval, shutdown }
    }

    /// Spawn the agent loop onto the runtime. The handle resolves to the
    /// agent's terminal state.
    pub fn spawn<A: Agent + 'static>(self, agent: A) -> JoinHandle<AgentState> {
        tokio::spawn(self.run(agent))
    }

    async fn run<A: Agent>(mut self, mut agent: A) -> AgentState {
        let name = agent.name().to_string();

        if let Err(e) = agent.start().await {
            error!("{}: failed to start: {}", name, e);
            return AgentState::Failed;
        }
        info!("{}: started (interval {:?})", name, self.interval);

        let mut errors = 0u64;
        let mut ticker = tokio::time::interval(self.interval);
        // A tick that overruns its slot is skipped, never overlapped
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    if let Err(e) = agent.tick().await {
                        errors += 1;
                        warn!("{}: tick error ({} total): {}", name, errors, e);
                    }
                    let elapsed = started.elapsed();
                    if elapsed > self.interval {
                        warn!(
                            "{}: tick ran {:?}, longer than its {:?} interval; skipping missed ticks",
                            name, elapsed, self.interval
                        );
                    }
                }
            }
        }

        info!("{}: stopping", name);
        if let Err(e) = agent.stop().await {
            error!("{}: error during stop: {}", name, e);
            return AgentState::Failed;
        }
        info!("{}: stopped ({} tick errors)", name, errors);
        AgentState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingAgent {
        ticks: Arc<AtomicU64>,
        fail_every_other: bool,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn name(&self) -> &str {
            "counting"
        }

        async fn start(&mut self) -> Result<(), TradingError> {
            Ok(())
        }

        async fn tick(&mut self) -> Result<(), TradingError> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other && n % 2 == 0 {
                return Err(TradingError::Risk("transient".to_string()));
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), TradingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn scheduler_runs_ticks_and_stops_cleanly() {
        let ticks = Arc::new(AtomicU64::new(0));
        let (tx, rx) = watch::channel(false);

        let handle = Scheduler::new(Duration::from_millis(10), rx).spawn(CountingAgent {
            ticks: ticks.clone(),
            fail_every_other: false,
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();

        let state = handle.await.unwrap();
        assert_eq!(state, AgentState::Stopped);
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn tick_errors_do_not_kill_the_schedule() {
        let ticks = Arc::new(AtomicU64::new(0));
        let (tx, rx) = watch::channel(false);

        let handle = Scheduler::new(Duration::from_millis(10), rx).spawn(CountingAgent {
            ticks: ticks.clone(),
            fail_every_other: true,
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();

        let state = handle.await.unwrap();
        assert_eq!(state, AgentState::Stopped);
        // Failing ticks kept being followed by further ticks
        assert!(ticks.load(Ordering::SeqCst) >= 4);
    }
}
