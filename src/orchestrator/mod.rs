//! Session orchestration
//!
//! The orchestrator drives lockstep cycles over per-symbol workers. Workers
//! own their agents; the orchestrator owns everything cross-symbol: the
//! cycle ledger, penalty policy, checkpoints and the barrier release.

mod orchestrator;
mod session;
mod worker;

pub use orchestrator::{CycleOrchestrator, EvaluatorFactory, SessionHandle};
pub use session::{Cycle, SessionConfig, SessionResult, SessionState, SessionStatus};
pub use worker::{CycleDirective, WorkerReport};
