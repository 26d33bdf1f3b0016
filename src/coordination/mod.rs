//! Worker synchronization primitives
//!
//! The cycle barrier keeps all symbol workers in lockstep; the cancel token
//! is the single cooperative stop signal threaded through the barrier and
//! every worker's bar loop.

mod barrier;
mod cancel;

pub use barrier::{BarrierConfig, BarrierError, CycleBarrier, StallPolicy};
pub use cancel::CancelToken;
