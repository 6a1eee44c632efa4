//! Meridian - relative-strength agent trading system
//!
//! Concurrently scheduled agents (scanner, analyzer, executor) talk over
//! a typed event bus, gated by a risk engine with tiered drawdown
//! response. The backtest engine replays the same decision logic
//! deterministically, and the optimizer searches parameters with
//! walk-forward validation.

pub mod agents;
pub mod backtest;
pub mod broker;
pub mod comms;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod indicators;
pub mod risk;
pub mod universe;

pub use config::Config;
pub use error::TradingError;
