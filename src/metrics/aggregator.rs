//! KPI aggregation across symbols
//!
//! Pure function over one cycle's per-symbol snapshots. Ratio means are taken
//! over symbols that actually traded; idle symbols stay in the table as
//! neutral rows but do not dilute the means. BTreeMap input keeps ranking
//! deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{KpiSnapshot, Ratio};

/// Aggregate KPIs for one cycle plus per-symbol rankings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleAggregate {
    pub kpi: KpiSnapshot,
    /// Symbols that traded this cycle
    pub active_symbols: u32,
    /// Symbols present but without trades
    pub idle_symbols: u32,
    pub best_symbol: Option<String>,
    pub worst_symbol: Option<String>,
}

fn mean_of<F>(snapshots: &BTreeMap<String, KpiSnapshot>, f: F) -> Ratio
where
    F: Fn(&KpiSnapshot) -> Ratio,
{
    let values: Vec<f64> = snapshots
        .values()
        .filter(|s| s.trades > 0)
        .filter_map(|s| f(s).value())
        .collect();
    Ratio::of(values.iter().sum(), values.len() as f64)
}

/// Ranking order: PnL, then trade count, then symbol name (ascending) so ties
/// break deterministically.
fn rank_key(symbol: &str, kpi: &KpiSnapshot) -> (f64, u32, std::cmp::Reverse<String>) {
    (kpi.pnl, kpi.trades, std::cmp::Reverse(symbol.to_string()))
}

fn compare(a: &(f64, u32, std::cmp::Reverse<String>), b: &(f64, u32, std::cmp::Reverse<String>)) -> std::cmp::Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.1.cmp(&b.1))
        .then(a.2.cmp(&b.2))
}

/// Merge one cycle's per-symbol snapshots into a single aggregate.
pub fn aggregate(per_symbol: &BTreeMap<String, KpiSnapshot>) -> CycleAggregate {
    let mut totals = KpiSnapshot {
        pnl: 0.0,
        pnl_pct: Ratio::Undefined,
        win_rate: Ratio::Undefined,
        trades: 0,
        won: 0,
        lost: 0,
        max_drawdown: Ratio::Undefined,
        long_trades: 0,
        short_trades: 0,
        mean_bars_held: Ratio::Undefined,
        rejected_orders: 0,
    };

    for kpi in per_symbol.values() {
        totals.pnl += kpi.pnl;
        totals.trades += kpi.trades;
        totals.won += kpi.won;
        totals.lost += kpi.lost;
        totals.long_trades += kpi.long_trades;
        totals.short_trades += kpi.short_trades;
        totals.rejected_orders += kpi.rejected_orders;
    }

    totals.pnl_pct = mean_of(per_symbol, |s| s.pnl_pct);
    totals.win_rate = mean_of(per_symbol, |s| s.win_rate);
    totals.max_drawdown = mean_of(per_symbol, |s| s.max_drawdown);
    totals.mean_bars_held = mean_of(per_symbol, |s| s.mean_bars_held);
    debug_assert!(totals.is_consistent());

    let active_symbols = per_symbol.values().filter(|s| s.trades > 0).count() as u32;
    let idle_symbols = per_symbol.len() as u32 - active_symbols;

    let best_symbol = per_symbol
        .iter()
        .max_by(|a, b| compare(&rank_key(a.0, a.1), &rank_key(b.0, b.1)))
        .map(|(s, _)| s.clone());
    let worst_symbol = per_symbol
        .iter()
        .min_by(|a, b| compare(&rank_key(a.0, a.1), &rank_key(b.0, b.1)))
        .map(|(s, _)| s.clone());

    CycleAggregate {
        kpi: totals,
        active_symbols,
        idle_symbols,
        best_symbol,
        worst_symbol,
    }
}
