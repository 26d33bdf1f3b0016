pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod penalty;
pub mod persistence;
pub mod sim;
pub mod strategy;

pub use config::AppConfig;
pub use coordination::{BarrierConfig, BarrierError, CancelToken, CycleBarrier, StallPolicy};
pub use domain::{Bar, FeedError, KpiSnapshot, Ratio, RejectedOrder, Side, Trade};
pub use error::{LockstepError, Result};
pub use metrics::{aggregate, CycleAggregate};
pub use orchestrator::{
    CycleOrchestrator, EvaluatorFactory, SessionConfig, SessionHandle, SessionResult,
    SessionState, SessionStatus,
};
pub use penalty::{PenaltyConfig, PenaltyManager, PenaltyRecord, PenaltyVerdict};
pub use persistence::{ArtifactWriter, CheckpointConfig, CheckpointStore};
pub use sim::{AgentState, SymbolAgent, TradeSimulator};
pub use strategy::{Decision, LearnedState, MomentumEvaluator, StrategyEvaluator};
