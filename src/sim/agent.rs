//! Symbol agent: one simulator plus one strategy-evaluator handle
//!
//! An agent is owned exclusively by its worker task. The orchestrator only
//! ever sees the serializable [`AgentState`] snapshots the worker reports at
//! barrier points.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, FeedError, Trade, validate_bar_sequence};
use crate::sim::TradeSimulator;
use crate::strategy::{Decision, LearnedState, StrategyEvaluator};

/// Serializable whole of an agent, checkpointed each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub symbol: String,
    pub simulator: TradeSimulator,
    pub learned: LearnedState,
    /// Recent bars kept for the evaluator, bounded by the history window
    pub history: Vec<Bar>,
    /// Index of the next bar to consume from the symbol's feed
    pub bar_cursor: usize,
    pub penalty_count: u32,
    pub reset_count: u32,
}

/// One symbol's simulation plus its strategy evaluator.
pub struct SymbolAgent {
    state: AgentState,
    evaluator: Box<dyn StrategyEvaluator>,
    history_window: usize,
    bar_interval: Option<Duration>,
    last_bar: Option<Bar>,
}

impl SymbolAgent {
    pub fn new(
        symbol: impl Into<String>,
        initial_balance: f64,
        evaluator: Box<dyn StrategyEvaluator>,
        history_window: usize,
        bar_interval: Option<Duration>,
    ) -> Self {
        let symbol = symbol.into();
        let history_window = history_window.max(evaluator.warmup_bars());
        Self {
            state: AgentState {
                symbol: symbol.clone(),
                simulator: TradeSimulator::new(symbol, initial_balance),
                learned: LearnedState::default(),
                history: Vec::new(),
                bar_cursor: 0,
                penalty_count: 0,
                reset_count: 0,
            },
            evaluator,
            history_window,
            bar_interval,
            last_bar: None,
        }
    }

    /// Rebuild an agent from a checkpointed state (resume path).
    pub fn from_state(
        state: AgentState,
        evaluator: Box<dyn StrategyEvaluator>,
        history_window: usize,
        bar_interval: Option<Duration>,
    ) -> Self {
        let history_window = history_window.max(evaluator.warmup_bars());
        let last_bar = state.history.last().copied();
        Self {
            state,
            evaluator,
            history_window,
            bar_interval,
            last_bar,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.state.symbol
    }

    pub fn bar_cursor(&self) -> usize {
        self.state.bar_cursor
    }

    pub fn simulator(&self) -> &TradeSimulator {
        &self.state.simulator
    }

    /// Consume one bar: validate feed integrity, consult the evaluator,
    /// advance the simulator.
    pub fn advance(&mut self, bar: &Bar) -> Result<Option<Trade>, FeedError> {
        validate_bar_sequence(self.last_bar.as_ref(), bar, self.bar_interval)?;

        self.state.history.push(*bar);
        if self.state.history.len() > self.history_window {
            let excess = self.state.history.len() - self.history_window;
            self.state.history.drain(..excess);
        }
        self.state.learned.observations += 1;

        let decision = if self.state.history.len() >= self.evaluator.warmup_bars() {
            self.evaluator.evaluate(&self.state.history, &self.state.learned)
        } else {
            Decision::Hold
        };

        let trade = self.state.simulator.advance(bar, decision);
        self.state.bar_cursor += 1;
        self.last_bar = Some(*bar);
        Ok(trade)
    }

    /// KPIs for the cycle window; resets the window.
    pub fn cycle_snapshot(&mut self) -> crate::domain::KpiSnapshot {
        self.state.simulator.cycle_snapshot()
    }

    /// KPIs over the whole session.
    pub fn session_snapshot(&self) -> crate::domain::KpiSnapshot {
        self.state.simulator.session_snapshot()
    }

    /// Record a penalty issued against this agent.
    pub fn note_penalty(&mut self) {
        self.state.penalty_count += 1;
    }

    /// Penalty reset: clears learned state, preserves the trade log.
    pub fn reset_strategy_state(&mut self) {
        self.state.learned.clear();
        self.state.reset_count += 1;
        tracing::info!(
            symbol = %self.state.symbol,
            reset_count = self.state.reset_count,
            "strategy state reset"
        );
    }

    /// Snapshot for reporting/checkpointing.
    pub fn state(&self) -> AgentState {
        self.state.clone()
    }

    /// Timestamp of the last consumed bar, if any.
    pub fn last_bar_at(&self) -> Option<DateTime<Utc>> {
        self.last_bar.map(|b| b.timestamp)
    }
}
