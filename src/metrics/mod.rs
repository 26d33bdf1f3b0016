//! Cross-symbol KPI aggregation

mod aggregator;

pub use aggregator::{aggregate, CycleAggregate};
