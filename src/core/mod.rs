//! Core trading infrastructure
//!
//! Shared types, the typed event bus, and the agent lifecycle model that
//! the concrete agents build on.

pub mod agent;
pub mod events;
pub mod types;

pub use agent::{Agent, AgentMetrics, AgentState, Scheduler};
pub use events::{EventBus, ExecutionEvent, RiskEvent, SetupEvent, SignalEvent, Topic};
pub use types::{
    AccountState, Candle, ClosedTrade, Direction, ExitReason, Position, Signal,
    StructureSnapshot, TradeSetup,
};
