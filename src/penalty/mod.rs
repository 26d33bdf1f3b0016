//! Penalty and reset policy for underperforming symbol agents

mod manager;

pub use manager::{
    AgentHealth, PenaltyConfig, PenaltyManager, PenaltyReason, PenaltyRecord, PenaltySeverity,
    PenaltyVerdict,
};
