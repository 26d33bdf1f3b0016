//! Built-in evaluators
//!
//! `MomentumEvaluator` trades close-to-close momentum over a lookback window;
//! `HoldEvaluator` never trades and exists to exercise idle-symbol paths.

use serde::{Deserialize, Serialize};

use super::{Decision, LearnedState, StrategyEvaluator};
use crate::domain::{Bar, Side};

/// Momentum evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Lookback window for momentum calculation (bars)
    pub lookback_bars: usize,
    /// Minimum relative move over the lookback to open (e.g. 0.003 = 0.3%)
    pub min_move_pct: f64,
    /// Momentum magnitude below which an open position is closed
    pub exit_move_pct: f64,
    /// Units per trade
    pub size: f64,
    /// Whether to take short positions on negative momentum
    pub allow_short: bool,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 10,
            min_move_pct: 0.003,
            exit_move_pct: 0.001,
            size: 1.0,
            allow_short: true,
        }
    }
}

/// Opens with momentum, closes when it fades.
#[derive(Debug, Clone)]
pub struct MomentumEvaluator {
    config: MomentumConfig,
}

impl MomentumEvaluator {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }

    fn momentum(&self, history: &[Bar]) -> Option<f64> {
        if history.len() <= self.config.lookback_bars {
            return None;
        }
        let last = history[history.len() - 1].close;
        let base = history[history.len() - 1 - self.config.lookback_bars].close;
        if base <= 0.0 {
            return None;
        }
        Some((last - base) / base)
    }
}

impl Default for MomentumEvaluator {
    fn default() -> Self {
        Self::new(MomentumConfig::default())
    }
}

impl StrategyEvaluator for MomentumEvaluator {
    fn evaluate(&self, history: &[Bar], state: &LearnedState) -> Decision {
        let Some(momentum) = self.momentum(history) else {
            return Decision::Hold;
        };

        // First learned weight scales the entry threshold; a reset agent
        // falls back to the configured baseline.
        let scale = 1.0 + state.weights.first().copied().unwrap_or(0.0).clamp(-0.9, 9.0);
        let entry = self.config.min_move_pct * scale;

        if momentum >= entry {
            Decision::Open {
                side: Side::Long,
                size: self.config.size,
            }
        } else if momentum <= -entry && self.config.allow_short {
            Decision::Open {
                side: Side::Short,
                size: self.config.size,
            }
        } else if momentum.abs() < self.config.exit_move_pct {
            Decision::Close
        } else {
            Decision::Hold
        }
    }

    fn warmup_bars(&self) -> usize {
        self.config.lookback_bars + 1
    }
}

/// Never trades.
#[derive(Debug, Clone, Default)]
pub struct HoldEvaluator;

impl StrategyEvaluator for HoldEvaluator {
    fn evaluate(&self, _history: &[Bar], _state: &LearnedState) -> Decision {
        Decision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc::now();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::minutes(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_holds_during_warmup() {
        let eval = MomentumEvaluator::default();
        let bars = bars_from_closes(&[100.0; 5]);
        assert_eq!(
            eval.evaluate(&bars, &LearnedState::default()),
            Decision::Hold
        );
    }

    #[test]
    fn test_opens_long_on_positive_momentum() {
        let eval = MomentumEvaluator::new(MomentumConfig {
            lookback_bars: 3,
            min_move_pct: 0.01,
            ..MomentumConfig::default()
        });
        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 100.0, 105.0]);

        match eval.evaluate(&bars, &LearnedState::default()) {
            Decision::Open { side, .. } => assert_eq!(side, Side::Long),
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_opens_short_on_negative_momentum() {
        let eval = MomentumEvaluator::new(MomentumConfig {
            lookback_bars: 3,
            min_move_pct: 0.01,
            ..MomentumConfig::default()
        });
        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 100.0, 95.0]);

        match eval.evaluate(&bars, &LearnedState::default()) {
            Decision::Open { side, .. } => assert_eq!(side, Side::Short),
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_closes_when_momentum_fades() {
        let eval = MomentumEvaluator::new(MomentumConfig {
            lookback_bars: 3,
            min_move_pct: 0.01,
            exit_move_pct: 0.002,
            ..MomentumConfig::default()
        });
        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 100.0, 100.01]);

        assert_eq!(
            eval.evaluate(&bars, &LearnedState::default()),
            Decision::Close
        );
    }

    #[test]
    fn test_learned_weight_raises_entry_threshold() {
        let eval = MomentumEvaluator::new(MomentumConfig {
            lookback_bars: 3,
            min_move_pct: 0.01,
            ..MomentumConfig::default()
        });
        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 100.0, 101.5]);

        // Baseline: 1.5% move clears the 1% threshold.
        assert!(matches!(
            eval.evaluate(&bars, &LearnedState::default()),
            Decision::Open { .. }
        ));

        // A learned weight of 1.0 doubles the threshold to 2%.
        let learned = LearnedState {
            weights: vec![1.0],
            bias: 0.0,
            observations: 10,
        };
        assert!(!matches!(
            eval.evaluate(&bars, &learned),
            Decision::Open { .. }
        ));
    }

    #[test]
    fn test_hold_evaluator_never_trades() {
        let eval = HoldEvaluator;
        let bars = bars_from_closes(&[100.0, 200.0, 50.0, 300.0]);
        assert_eq!(
            eval.evaluate(&bars, &LearnedState::default()),
            Decision::Hold
        );
    }
}
