//! Per-symbol trade simulation
//!
//! `TradeSimulator` executes decisions against a bar stream for one symbol;
//! `SymbolAgent` wraps a simulator together with its evaluator handle and the
//! serializable state the orchestrator checkpoints.

mod agent;
mod simulator;

pub use agent::{AgentState, SymbolAgent};
pub use simulator::TradeSimulator;
