//! KPI snapshots and guarded ratio values
//!
//! Every division in KPI computation goes through [`Ratio::of`], which turns a
//! degenerate denominator into an explicit [`Ratio::Undefined`] instead of a
//! floating NaN/Inf. Undefined values serialize as `null` and render as `n/a`,
//! so they can never leak into persisted artifacts as `nan%`.

use serde::{Deserialize, Serialize};

/// A ratio or percentage that is either a finite number or explicitly
/// undefined ("no data").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ratio {
    Defined(f64),
    Undefined,
}

impl Ratio {
    /// Guarded division: undefined when the denominator is non-positive or
    /// either operand is non-finite.
    pub fn of(numerator: f64, denominator: f64) -> Self {
        if denominator <= 0.0 || !denominator.is_finite() || !numerator.is_finite() {
            Ratio::Undefined
        } else {
            Ratio::Defined(numerator / denominator)
        }
    }

    /// Wrap an already-computed value, demoting non-finite input to Undefined.
    pub fn defined(value: f64) -> Self {
        if value.is_finite() {
            Ratio::Defined(value)
        } else {
            Ratio::Undefined
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Defined(v) => Some(*v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Ratio::Defined(_))
    }

    /// Render as a percentage string, `n/a` when undefined.
    pub fn as_pct(&self) -> String {
        match self {
            Ratio::Defined(v) => format!("{:.2}%", v * 100.0),
            Ratio::Undefined => "n/a".to_string(),
        }
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ratio::Defined(v) => write!(f, "{:.4}", v),
            Ratio::Undefined => write!(f, "n/a"),
        }
    }
}

/// Key performance indicators for one symbol over one window (cycle or
/// session), or for the cross-symbol aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    /// Realized PnL in account currency
    pub pnl: f64,
    /// Realized PnL relative to the window's starting balance
    pub pnl_pct: Ratio,
    /// won / trades, undefined when no trades
    pub win_rate: Ratio,
    pub trades: u32,
    pub won: u32,
    pub lost: u32,
    /// (peak equity - equity) / peak equity, undefined for non-positive peaks
    pub max_drawdown: Ratio,
    pub long_trades: u32,
    pub short_trades: u32,
    /// Mean bars a closed trade was held, undefined when no trades
    pub mean_bars_held: Ratio,
    pub rejected_orders: u32,
}

impl KpiSnapshot {
    /// Neutral snapshot for a symbol with no activity in the window.
    ///
    /// Idle symbols contribute a neutral row (pnl 0, zero counts), not a
    /// missing one; only trade-derived ratios are undefined.
    pub fn idle(starting_balance: f64) -> Self {
        Self {
            pnl: 0.0,
            pnl_pct: Ratio::of(0.0, starting_balance),
            win_rate: Ratio::Undefined,
            trades: 0,
            won: 0,
            lost: 0,
            max_drawdown: Ratio::of(0.0, starting_balance),
            long_trades: 0,
            short_trades: 0,
            mean_bars_held: Ratio::Undefined,
            rejected_orders: 0,
        }
    }

    /// Internal consistency: counts add up and no ratio hides a NaN.
    pub fn is_consistent(&self) -> bool {
        let counts_ok = self.trades == self.won + self.lost
            && self.trades == self.long_trades + self.short_trades;
        let ratios_ok = [
            self.pnl_pct,
            self.win_rate,
            self.max_drawdown,
            self.mean_bars_held,
        ]
        .iter()
        .all(|r| r.value().map(|v| v.is_finite()).unwrap_or(true));

        counts_ok && ratios_ok && self.pnl.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_zero_denominator_is_undefined() {
        assert_eq!(Ratio::of(5.0, 0.0), Ratio::Undefined);
        assert_eq!(Ratio::of(5.0, -1.0), Ratio::Undefined);
        assert_eq!(Ratio::of(5.0, f64::NAN), Ratio::Undefined);
        assert_eq!(Ratio::of(f64::INFINITY, 2.0), Ratio::Undefined);
    }

    #[test]
    fn test_ratio_division() {
        assert_eq!(Ratio::of(1.0, 4.0), Ratio::Defined(0.25));
        assert_eq!(Ratio::of(0.0, 4.0), Ratio::Defined(0.0));
    }

    #[test]
    fn test_ratio_serializes_as_null_or_number() {
        let defined = serde_json::to_value(Ratio::Defined(0.5)).unwrap();
        let undefined = serde_json::to_value(Ratio::Undefined).unwrap();

        assert_eq!(defined, serde_json::json!(0.5));
        assert!(undefined.is_null());

        let back: Ratio = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert_eq!(back, Ratio::Undefined);
        let back: Ratio = serde_json::from_value(serde_json::json!(0.25)).unwrap();
        assert_eq!(back, Ratio::Defined(0.25));
    }

    #[test]
    fn test_ratio_display() {
        assert_eq!(Ratio::Defined(0.125).as_pct(), "12.50%");
        assert_eq!(Ratio::Undefined.as_pct(), "n/a");
    }

    #[test]
    fn test_idle_snapshot() {
        let idle = KpiSnapshot::idle(1000.0);
        assert_eq!(idle.pnl, 0.0);
        assert_eq!(idle.trades, 0);
        assert_eq!(idle.pnl_pct, Ratio::Defined(0.0));
        assert_eq!(idle.win_rate, Ratio::Undefined);
        assert!(idle.is_consistent());
    }

    #[test]
    fn test_idle_snapshot_zero_balance() {
        // Misconfigured agent with no capital still never yields NaN.
        let idle = KpiSnapshot::idle(0.0);
        assert_eq!(idle.pnl_pct, Ratio::Undefined);
        assert_eq!(idle.max_drawdown, Ratio::Undefined);
        assert!(idle.is_consistent());
    }
}
