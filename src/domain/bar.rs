//! OHLCV bars and feed validation
//!
//! The coordinator consumes one ordered, gap-free bar sequence per symbol.
//! A gap or out-of-order timestamp is fatal for that symbol only; the
//! orchestrator excludes it and the session continues.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single closed OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Bar midpoint, occasionally useful for sizing heuristics.
    pub fn mid(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// Feed integrity violation for one symbol
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("out-of-order timestamp: {current} does not advance past {previous}")]
    OutOfOrder { previous: String, current: String },

    #[error("gap in feed: expected bar at {expected}, got {actual}")]
    Gap { expected: String, actual: String },
}

/// Validate that `bar` follows `previous` in a gap-free, strictly ordered feed.
///
/// `interval` is the expected bar spacing; `None` skips gap detection and
/// only enforces strict ordering.
pub fn validate_bar_sequence(
    previous: Option<&Bar>,
    bar: &Bar,
    interval: Option<Duration>,
) -> Result<(), FeedError> {
    let Some(prev) = previous else {
        return Ok(());
    };

    if bar.timestamp <= prev.timestamp {
        return Err(FeedError::OutOfOrder {
            previous: prev.timestamp.to_rfc3339(),
            current: bar.timestamp.to_rfc3339(),
        });
    }

    if let Some(step) = interval {
        let expected = prev.timestamp + step;
        if bar.timestamp != expected {
            return Err(FeedError::Gap {
                expected: expected.to_rfc3339(),
                actual: bar.timestamp.to_rfc3339(),
            });
        }
    }

    Ok(())
}

/// Generate a synthetic random-walk bar feed for testing and demos.
///
/// Prices follow a mean-reverting random walk around `start_price`; one bar
/// per minute starting `count` minutes in the past.
pub fn generate_bars(count: usize, start_price: f64, volatility: f64) -> Vec<Bar> {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let mut bars = Vec::with_capacity(count);
    let start_ts = Utc::now() - Duration::minutes(count as i64);

    let mut price = start_price;
    for i in 0..count {
        let drift = 0.001 * (start_price - price) / start_price;
        let change = rng.gen_range(-volatility..volatility) + drift;
        let open = price;
        let close = (price * (1.0 + change)).max(start_price * 0.01);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..volatility / 2.0));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..volatility / 2.0));

        bars.push(Bar {
            timestamp: start_ts + Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            volume: rng.gen_range(10.0..1000.0),
        });

        price = close;
    }

    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_at(ts: DateTime<Utc>) -> Bar {
        Bar {
            timestamp: ts,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 42.0,
        }
    }

    #[test]
    fn test_first_bar_always_valid() {
        let bar = bar_at(Utc::now());
        assert!(validate_bar_sequence(None, &bar, Some(Duration::minutes(1))).is_ok());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let now = Utc::now();
        let prev = bar_at(now);
        let bar = bar_at(now - Duration::minutes(1));

        let err = validate_bar_sequence(Some(&prev), &bar, None).unwrap_err();
        assert!(matches!(err, FeedError::OutOfOrder { .. }));
    }

    #[test]
    fn test_gap_detected_with_interval() {
        let now = Utc::now();
        let prev = bar_at(now);
        let bar = bar_at(now + Duration::minutes(3));

        let err = validate_bar_sequence(Some(&prev), &bar, Some(Duration::minutes(1))).unwrap_err();
        assert!(matches!(err, FeedError::Gap { .. }));
    }

    #[test]
    fn test_gap_ignored_without_interval() {
        let now = Utc::now();
        let prev = bar_at(now);
        let bar = bar_at(now + Duration::minutes(3));

        assert!(validate_bar_sequence(Some(&prev), &bar, None).is_ok());
    }

    #[test]
    fn test_generated_bars_are_ordered_and_gap_free() {
        let bars = generate_bars(100, 100.0, 0.01);
        assert_eq!(bars.len(), 100);

        for pair in bars.windows(2) {
            validate_bar_sequence(Some(&pair[0]), &pair[1], Some(Duration::minutes(1))).unwrap();
        }
    }

    #[test]
    fn test_generated_prices_positive() {
        let bars = generate_bars(500, 50.0, 0.05);
        assert!(bars.iter().all(|b| b.close > 0.0 && b.low > 0.0));
    }
}
