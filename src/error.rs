use thiserror::Error;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum LockstepError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Bar feed errors (fatal for one symbol only)
    #[error("Feed error for {symbol}: {reason}")]
    Feed { symbol: String, reason: String },

    // Barrier / worker coordination errors
    #[error("Worker stalled at generation {generation}: waiting on {missing:?}")]
    WorkerStalled {
        generation: u64,
        missing: Vec<String>,
    },

    #[error("Barrier participant not registered: {0}")]
    UnknownParticipant(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Persistence errors
    #[error("Checkpoint write failed after {attempts} attempts: {reason}")]
    CheckpointWrite { attempts: u32, reason: String },

    #[error("Checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for LockstepError
pub type Result<T> = std::result::Result<T, LockstepError>;
