//! Core strategy trait and types
//!
//! Defines the common interface that all strategy evaluators must implement.

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Side};

/// What the evaluator wants done with the position this bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Open a position of `size` units on `side`
    Open { side: Side, size: f64 },
    /// Close the open position, if any
    Close,
    /// Do nothing
    Hold,
}

/// Agent-owned learned state, cleared by a penalty reset.
///
/// The evaluator reads this but never mutates core state; the owning agent
/// updates the observation counter and any adaptation happens through the
/// weights it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedState {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub observations: u64,
}

impl Default for LearnedState {
    fn default() -> Self {
        Self {
            weights: Vec::new(),
            bias: 0.0,
            observations: 0,
        }
    }
}

impl LearnedState {
    /// Clear everything learned. Trade history is kept elsewhere for audit.
    pub fn clear(&mut self) {
        self.weights.clear();
        self.bias = 0.0;
        self.observations = 0;
    }
}

/// Capability interface for signal generation.
///
/// Called once per bar per symbol; must be side-effect-free with respect to
/// core state and deterministic given the same history and learned state.
#[cfg_attr(test, mockall::automock)]
pub trait StrategyEvaluator: Send {
    /// Decide what to do given recent bar history (oldest first, current bar
    /// last) and the agent's learned state.
    fn evaluate(&self, history: &[Bar], state: &LearnedState) -> Decision;

    /// Bars of history required before the evaluator produces non-Hold
    /// decisions. The agent holds at least this many bars in its window.
    fn warmup_bars(&self) -> usize {
        0
    }
}
