//! Trades and positions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// A closed trade. Immutable once created; appended to the agent's trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub bars_held: u32,
    /// Realized profit/loss in account currency
    pub pnl: f64,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// An open position held by a simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    pub bars_held: u32,
}

impl OpenPosition {
    /// Unrealized PnL at the given mark price
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        match self.side {
            Side::Long => (mark - self.entry_price) * self.size,
            Side::Short => (self.entry_price - mark) * self.size,
        }
    }
}

/// An order the simulator could not fill. Recorded, never a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOrder {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrealized_pnl_long_short() {
        let now = Utc::now();
        let long = OpenPosition {
            side: Side::Long,
            size: 2.0,
            entry_price: 100.0,
            opened_at: now,
            bars_held: 0,
        };
        let short = OpenPosition {
            side: Side::Short,
            ..long.clone()
        };

        assert_eq!(long.unrealized_pnl(105.0), 10.0);
        assert_eq!(short.unrealized_pnl(105.0), -10.0);
        assert_eq!(short.unrealized_pnl(95.0), 10.0);
    }
}
