//! Domain types shared across the coordinator
//!
//! Bars, trades, and KPI snapshots. Everything here is plain data; the
//! components that mutate it live in `sim`, `metrics`, and `orchestrator`.

mod bar;
mod kpi;
mod trade;

pub use bar::{generate_bars, validate_bar_sequence, Bar, FeedError};
pub use kpi::{KpiSnapshot, Ratio};
pub use trade::{OpenPosition, RejectedOrder, Side, Trade};
