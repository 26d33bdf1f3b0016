//! Trade simulator for one symbol
//!
//! Executes strategy decisions against a bar stream and keeps the books:
//! balance, open position, closed-trade log, equity peaks and drawdown.
//! Fills happen at bar close. The simulator knows nothing about other symbols.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Bar, KpiSnapshot, OpenPosition, Ratio, RejectedOrder, Side, Trade};
use crate::strategy::Decision;

/// Position accounting for a single symbol.
///
/// Snapshot windows: `cycle_snapshot` reports KPIs accumulated since the last
/// call and resets the window; `session_snapshot` covers the whole run.
/// Serializable as a whole so agents can be checkpointed and restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSimulator {
    symbol: String,
    balance: f64,
    initial_balance: f64,
    position: Option<OpenPosition>,
    trades: Vec<Trade>,
    rejected: Vec<RejectedOrder>,
    equity: f64,
    peak_equity: f64,
    session_max_drawdown: Option<f64>,
    // Current snapshot window
    window_start_equity: f64,
    window_trade_offset: usize,
    window_rejected_offset: usize,
    window_peak_equity: f64,
    window_max_drawdown: Option<f64>,
}

impl TradeSimulator {
    pub fn new(symbol: impl Into<String>, initial_balance: f64) -> Self {
        Self {
            symbol: symbol.into(),
            balance: initial_balance,
            initial_balance,
            position: None,
            trades: Vec::new(),
            rejected: Vec::new(),
            equity: initial_balance,
            peak_equity: initial_balance,
            session_max_drawdown: None,
            window_start_equity: initial_balance,
            window_trade_offset: 0,
            window_rejected_offset: 0,
            window_peak_equity: initial_balance,
            window_max_drawdown: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    /// Full closed-trade log, preserved across strategy resets for audit.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn rejected_orders(&self) -> &[RejectedOrder] {
        &self.rejected
    }

    /// Consume one bar: apply the decision, update unrealized equity and
    /// drawdown peaks. Returns the trade closed on this bar, if any.
    pub fn advance(&mut self, bar: &Bar, decision: Decision) -> Option<Trade> {
        if let Some(pos) = self.position.as_mut() {
            pos.bars_held += 1;
        }

        let closed = match decision {
            Decision::Open { side, size } => {
                self.try_open(bar, side, size);
                None
            }
            Decision::Close => self.close_position(bar),
            Decision::Hold => None,
        };

        self.mark_to_market(bar);
        closed
    }

    fn try_open(&mut self, bar: &Bar, side: Side, size: f64) {
        // Redundant open signals while a position is held are no-ops.
        if self.position.is_some() {
            return;
        }

        let notional = bar.close * size;
        if size <= 0.0 || notional > self.balance {
            self.rejected.push(RejectedOrder {
                timestamp: bar.timestamp,
                reason: format!(
                    "insufficient balance: notional {:.2} exceeds {:.2}",
                    notional, self.balance
                ),
            });
            return;
        }

        self.position = Some(OpenPosition {
            side,
            size,
            entry_price: bar.close,
            opened_at: bar.timestamp,
            bars_held: 0,
        });
    }

    fn close_position(&mut self, bar: &Bar) -> Option<Trade> {
        let pos = self.position.take()?;
        let pnl = pos.unrealized_pnl(bar.close);
        self.balance += pnl;

        let trade = Trade {
            id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            side: pos.side,
            size: pos.size,
            entry_price: pos.entry_price,
            exit_price: bar.close,
            opened_at: pos.opened_at,
            closed_at: bar.timestamp,
            bars_held: pos.bars_held,
            pnl,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }

    fn mark_to_market(&mut self, bar: &Bar) {
        let unrealized = self
            .position
            .as_ref()
            .map(|p| p.unrealized_pnl(bar.close))
            .unwrap_or(0.0);
        self.equity = self.balance + unrealized;

        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
        if self.equity > self.window_peak_equity {
            self.window_peak_equity = self.equity;
        }

        // Drawdown against a non-positive peak is undefined, never Inf.
        if self.peak_equity > 0.0 {
            let dd = (self.peak_equity - self.equity) / self.peak_equity;
            if dd > self.session_max_drawdown.unwrap_or(0.0) || self.session_max_drawdown.is_none()
            {
                self.session_max_drawdown = Some(dd.max(0.0));
            }
        }
        if self.window_peak_equity > 0.0 {
            let dd = (self.window_peak_equity - self.equity) / self.window_peak_equity;
            if dd > self.window_max_drawdown.unwrap_or(0.0) || self.window_max_drawdown.is_none() {
                self.window_max_drawdown = Some(dd.max(0.0));
            }
        }
    }

    fn snapshot_over(
        &self,
        trades: &[Trade],
        rejected: usize,
        start_equity: f64,
        max_drawdown: Option<f64>,
    ) -> KpiSnapshot {
        let pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let won = trades.iter().filter(|t| t.is_win()).count() as u32;
        let count = trades.len() as u32;
        let lost = count - won;
        let long_trades = trades.iter().filter(|t| t.side == Side::Long).count() as u32;
        let bars_held: u32 = trades.iter().map(|t| t.bars_held).sum();

        let snapshot = KpiSnapshot {
            pnl,
            pnl_pct: Ratio::of(pnl, start_equity),
            win_rate: Ratio::of(won as f64, count as f64),
            trades: count,
            won,
            lost,
            max_drawdown: match max_drawdown {
                Some(dd) => Ratio::defined(dd),
                None => Ratio::Undefined,
            },
            long_trades,
            short_trades: count - long_trades,
            mean_bars_held: Ratio::of(bars_held as f64, count as f64),
            rejected_orders: rejected as u32,
        };
        debug_assert!(snapshot.is_consistent());
        snapshot
    }

    /// KPIs since the previous cycle snapshot; resets the window.
    pub fn cycle_snapshot(&mut self) -> KpiSnapshot {
        let snapshot = self.snapshot_over(
            &self.trades[self.window_trade_offset..],
            self.rejected.len() - self.window_rejected_offset,
            self.window_start_equity,
            self.window_max_drawdown,
        );

        self.window_start_equity = self.equity;
        self.window_trade_offset = self.trades.len();
        self.window_rejected_offset = self.rejected.len();
        self.window_peak_equity = self.equity;
        self.window_max_drawdown = None;

        snapshot
    }

    /// KPIs over the whole session so far. Does not touch the cycle window.
    pub fn session_snapshot(&self) -> KpiSnapshot {
        self.snapshot_over(
            &self.trades,
            self.rejected.len(),
            self.initial_balance,
            self.session_max_drawdown,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn bar(ts: DateTime<Utc>, close: f64) -> Bar {
        Bar {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn open_long(size: f64) -> Decision {
        Decision::Open {
            side: Side::Long,
            size,
        }
    }

    #[test]
    fn test_long_round_trip_pnl() {
        let mut sim = TradeSimulator::new("BTCUSDT", 1000.0);
        let t0 = Utc::now();

        assert!(sim.advance(&bar(t0, 100.0), open_long(2.0)).is_none());
        let trade = sim
            .advance(&bar(t0 + Duration::minutes(1), 110.0), Decision::Close)
            .expect("trade should close");

        assert_eq!(trade.pnl, 20.0);
        assert_eq!(trade.bars_held, 1);
        assert_eq!(sim.balance(), 1020.0);
        assert_eq!(sim.equity(), 1020.0);
    }

    #[test]
    fn test_short_round_trip_pnl() {
        let mut sim = TradeSimulator::new("ETHUSDT", 1000.0);
        let t0 = Utc::now();

        sim.advance(
            &bar(t0, 100.0),
            Decision::Open {
                side: Side::Short,
                size: 3.0,
            },
        );
        let trade = sim
            .advance(&bar(t0 + Duration::minutes(1), 90.0), Decision::Close)
            .unwrap();

        assert_eq!(trade.pnl, 30.0);
        assert_eq!(sim.balance(), 1030.0);
    }

    #[test]
    fn test_unaffordable_open_is_rejected_not_fatal() {
        let mut sim = TradeSimulator::new("BTCUSDT", 100.0);
        let t0 = Utc::now();

        assert!(sim.advance(&bar(t0, 1000.0), open_long(1.0)).is_none());
        assert!(sim.position().is_none());
        assert_eq!(sim.rejected_orders().len(), 1);

        // Simulator keeps running afterwards.
        sim.advance(&bar(t0 + Duration::minutes(1), 50.0), open_long(1.0));
        assert!(sim.position().is_some());
    }

    #[test]
    fn test_redundant_signals_are_noops() {
        let mut sim = TradeSimulator::new("BTCUSDT", 1000.0);
        let t0 = Utc::now();

        // Close with no position.
        assert!(sim.advance(&bar(t0, 100.0), Decision::Close).is_none());
        assert!(sim.rejected_orders().is_empty());

        // Open on top of an open position keeps the original entry.
        sim.advance(&bar(t0 + Duration::minutes(1), 100.0), open_long(1.0));
        sim.advance(&bar(t0 + Duration::minutes(2), 120.0), open_long(5.0));
        assert_eq!(sim.position().unwrap().entry_price, 100.0);
        assert_eq!(sim.position().unwrap().size, 1.0);
    }

    #[test]
    fn test_drawdown_tracks_equity_trough() {
        let mut sim = TradeSimulator::new("BTCUSDT", 1000.0);
        let t0 = Utc::now();

        sim.advance(&bar(t0, 100.0), open_long(5.0));
        // Price falls 10: equity 950 against peak 1000.
        sim.advance(&bar(t0 + Duration::minutes(1), 90.0), Decision::Hold);
        let snap = sim.session_snapshot();

        match snap.max_drawdown {
            Ratio::Defined(dd) => assert!((dd - 0.05).abs() < 1e-9),
            Ratio::Undefined => panic!("drawdown should be defined"),
        }
    }

    #[test]
    fn test_zero_balance_never_yields_nan() {
        // Misconfigured agent: non-positive starting balance.
        let mut sim = TradeSimulator::new("BTCUSDT", 0.0);
        let t0 = Utc::now();

        sim.advance(&bar(t0, 100.0), open_long(1.0));
        sim.advance(&bar(t0 + Duration::minutes(1), 90.0), Decision::Hold);

        let snap = sim.session_snapshot();
        assert_eq!(snap.max_drawdown, Ratio::Undefined);
        assert_eq!(snap.pnl_pct, Ratio::Undefined);
        assert!(snap.is_consistent());

        // And nothing in the serialized form is NaN/Inf.
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("nan") && !json.contains("inf"));
    }

    #[test]
    fn test_cycle_snapshot_resets_window() {
        let mut sim = TradeSimulator::new("BTCUSDT", 1000.0);
        let t0 = Utc::now();

        sim.advance(&bar(t0, 100.0), open_long(1.0));
        sim.advance(&bar(t0 + Duration::minutes(1), 110.0), Decision::Close);

        let first = sim.cycle_snapshot();
        assert_eq!(first.trades, 1);
        assert_eq!(first.pnl, 10.0);

        // New window starts empty and idle.
        let second = sim.cycle_snapshot();
        assert_eq!(second.trades, 0);
        assert_eq!(second.pnl, 0.0);
        assert_eq!(second.win_rate, Ratio::Undefined);

        // Session view still has the full history.
        assert_eq!(sim.session_snapshot().trades, 1);
    }

    #[test]
    fn test_counts_add_up() {
        let mut sim = TradeSimulator::new("BTCUSDT", 1000.0);
        let mut t = Utc::now();
        let closes = [100.0, 105.0, 103.0, 98.0, 101.0, 99.0];

        for (i, close) in closes.iter().enumerate() {
            let decision = if i % 2 == 0 {
                open_long(1.0)
            } else {
                Decision::Close
            };
            sim.advance(&bar(t, *close), decision);
            t += Duration::minutes(1);
        }

        let snap = sim.session_snapshot();
        assert_eq!(snap.trades, snap.won + snap.lost);
        assert_eq!(snap.trades, snap.long_trades + snap.short_trades);
        assert!(snap.is_consistent());
    }
}
