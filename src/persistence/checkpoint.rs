//! Checkpoint store
//!
//! File-based session snapshots for crash recovery and resume. Writes go to a
//! temp file first and are renamed into place, so a crash mid-write leaves
//! the previous checkpoint intact. Each file embeds a sha256 digest of its
//! payload; `load_latest` skips anything truncated or tampered and falls back
//! to the next most recent file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{LockstepError, Result};
use crate::orchestrator::SessionState;

/// Checkpoint store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory for checkpoint files
    pub dir: String,
    /// Maximum checkpoints to keep per session (older ones are pruned)
    pub max_checkpoints: usize,
    /// Write attempts before giving up
    pub max_retries: u32,
    /// Backoff between write attempts
    pub retry_backoff_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: "./data/checkpoints".to_string(),
            max_checkpoints: 10,
            max_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

/// Identifier of a written checkpoint (the file stem)
pub type CheckpointId = String;

/// On-disk envelope: digest over the serialized payload
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    digest: String,
    payload: serde_json::Value,
}

fn digest_of(payload: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Atomically-written, integrity-checked checkpoint files.
pub struct CheckpointStore {
    config: CheckpointConfig,
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.dir);
        fs::create_dir_all(&dir)?;
        Ok(Self { config, dir })
    }

    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut config = CheckpointConfig::default();
        config.dir = dir.as_ref().to_string_lossy().into_owned();
        Self::new(config)
    }

    fn file_name(session_id: &str, cycle: u64) -> String {
        format!("{}_c{:06}.json", session_id, cycle)
    }

    fn write_once(&self, state: &SessionState) -> Result<CheckpointId> {
        let payload = serde_json::to_value(state)?;
        let envelope = CheckpointFile {
            digest: digest_of(&payload)?,
            payload,
        };

        let name = Self::file_name(&state.session_id, state.next_cycle);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{}.tmp", name));

        fs::write(&tmp, serde_json::to_vec_pretty(&envelope)?)?;
        fs::rename(&tmp, &path)?;

        Ok(name.trim_end_matches(".json").to_string())
    }

    /// Write a new checkpoint, retrying with backoff. The previous checkpoint
    /// is never overwritten in place.
    pub async fn save(&self, state: &SessionState) -> Result<CheckpointId> {
        let mut last_err = None;
        for attempt in 1..=self.config.max_retries.max(1) {
            match self.write_once(state) {
                Ok(id) => {
                    info!(checkpoint = %id, cycle = state.next_cycle, "checkpoint written");
                    self.prune(&state.session_id);
                    return Ok(id);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "checkpoint write failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
            }
        }

        Err(LockstepError::CheckpointWrite {
            attempts: self.config.max_retries.max(1),
            reason: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn list(&self, session_id: &str) -> Vec<PathBuf> {
        let prefix = format!("{}_c", session_id);
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }

    fn read_verified(&self, path: &Path) -> Result<SessionState> {
        let bytes = fs::read(path)?;
        let envelope: CheckpointFile = serde_json::from_slice(&bytes)?;

        let digest = digest_of(&envelope.payload)?;
        if digest != envelope.digest {
            return Err(LockstepError::CheckpointCorrupt(format!(
                "digest mismatch in {}",
                path.display()
            )));
        }

        Ok(serde_json::from_value(envelope.payload)?)
    }

    /// Most recent checkpoint that parses and passes its integrity check.
    pub fn load_latest(&self, session_id: &str) -> Result<Option<SessionState>> {
        for path in self.list(session_id).into_iter().rev() {
            match self.read_verified(&path) {
                Ok(state) => {
                    info!(path = %path.display(), cycle = state.next_cycle, "checkpoint loaded");
                    return Ok(Some(state));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping bad checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Keep only the newest `max_checkpoints` files for the session.
    fn prune(&self, session_id: &str) {
        let files = self.list(session_id);
        if files.len() <= self.config.max_checkpoints {
            return;
        }

        let excess = files.len() - self.config.max_checkpoints;
        for path in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to prune checkpoint");
            } else {
                debug!(path = %path.display(), "pruned old checkpoint");
            }
        }
    }
}
