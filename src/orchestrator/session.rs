//! Session state shared between the orchestrator, checkpoints and artifacts

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::KpiSnapshot;
use crate::metrics::CycleAggregate;
use crate::penalty::PenaltyManager;
use crate::sim::AgentState;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Symbols to simulate, one worker each
    pub symbols: Vec<String>,
    /// Starting balance per agent
    pub initial_balance: f64,
    /// Bars per cycle
    pub cycle_bars: usize,
    /// Bars of history kept for the evaluator
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Expected bar spacing in seconds; 0 disables gap detection
    #[serde(default)]
    pub bar_interval_secs: u64,
    /// Stop after this many cycles even if data remains (0 = run to exhaustion)
    #[serde(default)]
    pub max_cycles: u64,
}

fn default_history_window() -> usize {
    64
}

impl SessionConfig {
    pub fn bar_interval(&self) -> Option<chrono::Duration> {
        if self.bar_interval_secs == 0 {
            None
        } else {
            Some(chrono::Duration::seconds(self.bar_interval_secs as i64))
        }
    }
}

/// Orchestrator state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    AwaitingBarrier,
    Aggregating,
    PersistingCheckpoint,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::AwaitingBarrier => write!(f, "awaiting_barrier"),
            SessionStatus::Aggregating => write!(f, "aggregating"),
            SessionStatus::PersistingCheckpoint => write!(f, "persisting_checkpoint"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One sealed cycle. Never mutated after sealing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub number: u64,
    pub start_bar: usize,
    pub end_bar: usize,
    pub per_symbol: BTreeMap<String, KpiSnapshot>,
    pub aggregate: CycleAggregate,
    pub sealed_at: DateTime<Utc>,
}

/// Full serializable session state — the checkpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub config: SessionConfig,
    pub agents: BTreeMap<String, AgentState>,
    pub cycles: Vec<Cycle>,
    pub penalties: PenaltyManager,
    /// Symbols dropped mid-session, with the reason
    pub excluded: BTreeMap<String, String>,
    /// Next cycle to run; everything below is sealed
    pub next_cycle: u64,
}

impl SessionState {
    /// No sealed cycle number may repeat — resuming must never replay one.
    pub fn cycle_numbers_unique(&self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        self.cycles.iter().all(|c| seen.insert(c.number))
    }
}

/// Terminal outcome of `CycleOrchestrator::run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycles_completed: u64,
    /// Whole-session KPIs per symbol
    pub per_symbol: BTreeMap<String, KpiSnapshot>,
    /// Whole-session aggregate
    pub aggregate: CycleAggregate,
    pub excluded: BTreeMap<String, String>,
    /// Diagnostic for Failed sessions
    pub failure: Option<String>,
}
