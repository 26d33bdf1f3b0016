//! Cycle barrier
//!
//! Gates all symbol workers plus the orchestrator so that everyone finishes a
//! unit of work before anyone proceeds to the next. Generations are monotonic:
//! nobody is released into generation G+1 until every active participant has
//! arrived for generation G. Cancellation and stalled-participant detection
//! are built in; both surface as errors instead of blocking forever.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use super::CancelToken;

/// What the orchestrator does about a stalled symbol worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallPolicy {
    /// Drop the symbol from the session and keep going
    ExcludeSymbol,
    /// Abort the whole session
    FailSession,
}

/// Barrier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// How long a waiter blocks before reporting a stall (0 = no limit)
    pub stall_timeout_ms: u64,
    pub on_stall: StallPolicy,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: 30_000,
            on_stall: StallPolicy::ExcludeSymbol,
        }
    }
}

impl BarrierConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        if self.stall_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.stall_timeout_ms))
        }
    }
}

/// Why an `arrive_and_wait` call did not complete normally
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("barrier cancelled")]
    Cancelled,

    #[error("stalled at generation {generation}: waiting on {missing:?}")]
    Stalled {
        generation: u64,
        missing: Vec<String>,
    },

    #[error("unknown barrier participant: {0}")]
    UnknownParticipant(String),
}

struct BarrierState {
    active: BTreeSet<String>,
    arrived: BTreeSet<String>,
    generation: u64,
}

/// Generation-counting barrier over named participants.
#[derive(Clone)]
pub struct CycleBarrier {
    state: Arc<Mutex<BarrierState>>,
    generation_tx: Arc<watch::Sender<u64>>,
    cancel: CancelToken,
    stall_timeout: Option<Duration>,
}

impl CycleBarrier {
    /// Create a barrier over the given participants sharing `cancel`.
    pub fn new<I, S>(participants: I, stall_timeout: Option<Duration>, cancel: CancelToken) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let active: BTreeSet<String> = participants.into_iter().map(Into::into).collect();
        let (generation_tx, _) = watch::channel(0u64);

        Self {
            state: Arc::new(Mutex::new(BarrierState {
                active,
                arrived: BTreeSet::new(),
                generation: 0,
            })),
            generation_tx: Arc::new(generation_tx),
            cancel,
            stall_timeout,
        }
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.state.lock().expect("barrier lock poisoned").generation
    }

    /// Number of participants still registered.
    pub fn active_count(&self) -> usize {
        self.state.lock().expect("barrier lock poisoned").active.len()
    }

    /// Signal cancellation: all blocked and future waiters return
    /// `BarrierError::Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Remove a participant (excluded symbol). If it was the only arrival
    /// still outstanding, the waiting participants are released.
    pub fn deregister(&self, participant: &str) {
        let mut state = self.state.lock().expect("barrier lock poisoned");
        state.active.remove(participant);
        state.arrived.remove(participant);
        debug!(participant, remaining = state.active.len(), "barrier deregister");

        if !state.active.is_empty() && state.arrived.len() == state.active.len() {
            Self::release(&mut state, &self.generation_tx);
        }
    }

    fn release(state: &mut BarrierState, tx: &watch::Sender<u64>) {
        state.generation += 1;
        state.arrived.clear();
        let _ = tx.send(state.generation);
    }

    /// Arrive for the current generation and wait until everyone else has.
    ///
    /// Returns the new generation on release. Errors on cancellation, on a
    /// stall (another participant did not arrive within the stall timeout),
    /// or if the caller was deregistered.
    pub async fn arrive_and_wait(&self, participant: &str) -> Result<u64, BarrierError> {
        if self.cancel.is_cancelled() {
            return Err(BarrierError::Cancelled);
        }

        let waited_generation = {
            let mut state = self.state.lock().expect("barrier lock poisoned");
            if !state.active.contains(participant) {
                return Err(BarrierError::UnknownParticipant(participant.to_string()));
            }

            state.arrived.insert(participant.to_string());
            if state.arrived.len() == state.active.len() {
                Self::release(&mut state, &self.generation_tx);
                return Ok(state.generation);
            }
            state.generation
        };

        self.wait_for_release(waited_generation).await
    }

    /// Wait for `waited_generation` to be released without registering a new
    /// arrival. This is the re-wait path after `Stalled`: the caller already
    /// arrived for that generation, and arriving again would count it toward
    /// the NEXT generation once this one is released behind its back.
    pub async fn wait_for_release(&self, waited_generation: u64) -> Result<u64, BarrierError> {
        let mut generation_rx = self.generation_tx.subscribe();
        let deadline = self.stall_timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            {
                let state = self.state.lock().expect("barrier lock poisoned");
                if state.generation > waited_generation {
                    return Ok(state.generation);
                }
            }

            tokio::select! {
                changed = generation_rx.changed() => {
                    if changed.is_err() {
                        return Err(BarrierError::Cancelled);
                    }
                }
                _ = self.cancel.cancelled() => {
                    return Err(BarrierError::Cancelled);
                }
                _ = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => std::future::pending().await,
                    }
                } => {
                    let state = self.state.lock().expect("barrier lock poisoned");
                    // Release may have raced the timeout.
                    if state.generation > waited_generation {
                        return Ok(state.generation);
                    }
                    let missing: Vec<String> = state
                        .active
                        .difference(&state.arrived)
                        .cloned()
                        .collect();
                    return Err(BarrierError::Stalled {
                        generation: waited_generation,
                        missing,
                    });
                }
            }
        }
    }
}
