//! Concrete trading agents
//!
//! Scanner produces candidate signals, the analyzer validates and sizes
//! them, the executor authorizes and submits orders. The orchestrator
//! owns their lifecycles and the halt path.

pub mod analyzer;
pub mod executor;
pub mod orchestrator;
pub mod scanner;

pub use analyzer::{AnalyzerAgent, AnalyzerConfig};
pub use executor::{ExecutorAgent, ExecutorConfig};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use scanner::{ScannerAgent, ScannerConfig};
