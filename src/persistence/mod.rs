//! Durable session state and reporting artifacts

mod artifacts;
mod checkpoint;

pub use artifacts::{ArtifactWriter, SessionSummary};
pub use checkpoint::{CheckpointConfig, CheckpointId, CheckpointStore};
