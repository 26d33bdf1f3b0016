//! Penalty manager
//!
//! Per-symbol discipline state machine: `Healthy -> Warned -> Penalized`,
//! with a reset issued when penalties pile up inside a rolling window of
//! cycles. Runs strictly inside the orchestrator's single-threaded
//! aggregation phase, so it needs no locking. The manager only returns
//! verdicts; applying a reset to the agent is the worker's job.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::KpiSnapshot;

/// Penalty thresholds, all in one place so the transition logic stays pure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Cycle PnL% below this floor counts as a breach (e.g. -0.02 = -2%)
    pub warn_pnl_floor_pct: f64,
    /// Cycle drawdown above this ceiling counts as a breach (e.g. 0.10)
    pub warn_drawdown_ceiling: f64,
    /// Rolling window, in cycles, over which penalties accumulate
    pub penalty_window: u32,
    /// Penalties within the window that trigger a reset
    pub reset_threshold: u32,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            warn_pnl_floor_pct: -0.02,
            warn_drawdown_ceiling: 0.10,
            penalty_window: 10,
            reset_threshold: 3,
        }
    }
}

/// Discipline state of one symbol agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentHealth {
    Healthy,
    Warned,
    Penalized,
}

impl std::fmt::Display for AgentHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentHealth::Healthy => write!(f, "healthy"),
            AgentHealth::Warned => write!(f, "warned"),
            AgentHealth::Penalized => write!(f, "penalized"),
        }
    }
}

/// What the orchestrator should do with the agent after this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyVerdict {
    Ok,
    Warned,
    Penalized,
    /// Penalty count crossed the threshold: clear the agent's learned state
    Reset,
}

/// Why a penalty record was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyReason {
    PnlBelowFloor,
    DrawdownAboveCeiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltySeverity {
    Warning,
    Penalty,
    Reset,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRecord {
    pub symbol: String,
    pub cycle: u64,
    pub reason: PenaltyReason,
    pub severity: PenaltySeverity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SymbolDiscipline {
    health: Option<AgentHealth>,
    /// Cycle numbers of penalties inside the rolling window
    penalty_cycles: VecDeque<u64>,
    resets: u32,
}

impl SymbolDiscipline {
    fn health(&self) -> AgentHealth {
        self.health.unwrap_or(AgentHealth::Healthy)
    }
}

/// Evaluates each symbol's cycle KPIs against the thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyManager {
    config: PenaltyConfig,
    states: BTreeMap<String, SymbolDiscipline>,
    records: Vec<PenaltyRecord>,
}

impl PenaltyManager {
    pub fn new(config: PenaltyConfig) -> Self {
        Self {
            config,
            states: BTreeMap::new(),
            records: Vec::new(),
        }
    }

    /// Append-only penalty audit trail.
    pub fn records(&self) -> &[PenaltyRecord] {
        &self.records
    }

    pub fn health(&self, symbol: &str) -> AgentHealth {
        self.states
            .get(symbol)
            .map(|s| s.health())
            .unwrap_or(AgentHealth::Healthy)
    }

    pub fn reset_count(&self, symbol: &str) -> u32 {
        self.states.get(symbol).map(|s| s.resets).unwrap_or(0)
    }

    fn breach(&self, kpi: &KpiSnapshot) -> Option<PenaltyReason> {
        if let Some(pnl_pct) = kpi.pnl_pct.value() {
            if pnl_pct < self.config.warn_pnl_floor_pct {
                return Some(PenaltyReason::PnlBelowFloor);
            }
        }
        if let Some(dd) = kpi.max_drawdown.value() {
            if dd > self.config.warn_drawdown_ceiling {
                return Some(PenaltyReason::DrawdownAboveCeiling);
            }
        }
        None
    }

    /// Evaluate one symbol's cycle KPIs. Called once per symbol per cycle
    /// from the orchestrator's aggregation phase.
    pub fn evaluate(&mut self, symbol: &str, cycle: u64, kpi: &KpiSnapshot) -> PenaltyVerdict {
        let breach = self.breach(kpi);
        let window = self.config.penalty_window as u64;
        let threshold = self.config.reset_threshold;

        let state = self.states.entry(symbol.to_string()).or_default();

        // Slide the rolling window forward.
        while let Some(&front) = state.penalty_cycles.front() {
            if cycle >= front + window {
                state.penalty_cycles.pop_front();
            } else {
                break;
            }
        }

        let Some(reason) = breach else {
            if state.health() != AgentHealth::Healthy {
                debug!(symbol, cycle, "agent recovered to healthy");
            }
            state.health = Some(AgentHealth::Healthy);
            return PenaltyVerdict::Ok;
        };

        match state.health() {
            AgentHealth::Healthy => {
                state.health = Some(AgentHealth::Warned);
                self.records.push(PenaltyRecord {
                    symbol: symbol.to_string(),
                    cycle,
                    reason,
                    severity: PenaltySeverity::Warning,
                });
                debug!(symbol, cycle, ?reason, "agent warned");
                PenaltyVerdict::Warned
            }
            AgentHealth::Warned | AgentHealth::Penalized => {
                state.health = Some(AgentHealth::Penalized);
                state.penalty_cycles.push_back(cycle);

                if state.penalty_cycles.len() as u32 >= threshold {
                    state.penalty_cycles.clear();
                    state.health = Some(AgentHealth::Healthy);
                    state.resets += 1;
                    self.records.push(PenaltyRecord {
                        symbol: symbol.to_string(),
                        cycle,
                        reason,
                        severity: PenaltySeverity::Reset,
                    });
                    info!(symbol, cycle, ?reason, "agent reset issued");
                    PenaltyVerdict::Reset
                } else {
                    self.records.push(PenaltyRecord {
                        symbol: symbol.to_string(),
                        cycle,
                        reason,
                        severity: PenaltySeverity::Penalty,
                    });
                    debug!(symbol, cycle, ?reason, "agent penalized");
                    PenaltyVerdict::Penalized
                }
            }
        }
    }
}
