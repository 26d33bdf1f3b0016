//! Strategy evaluation seam
//!
//! The coordinator treats signal generation as a black box behind
//! [`StrategyEvaluator`]. Concrete evaluators live here too, but nothing in
//! the core depends on anything beyond the trait.

mod evaluator;
mod momentum;

pub use evaluator::{Decision, LearnedState, StrategyEvaluator};
pub use momentum::{HoldEvaluator, MomentumConfig, MomentumEvaluator};

#[cfg(test)]
pub use evaluator::MockStrategyEvaluator;
