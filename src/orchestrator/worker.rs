//! Symbol worker task
//!
//! One worker per symbol. The worker owns its [`SymbolAgent`] exclusively;
//! the orchestrator only sees the serializable snapshots carried in each
//! [`WorkerReport`]. Per cycle the worker consumes its bar slice, reports,
//! waits for the orchestrator's directive, then arrives at the barrier.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordination::{BarrierError, CancelToken, CycleBarrier};
use crate::domain::{Bar, KpiSnapshot};
use crate::sim::{AgentState, SymbolAgent};

/// What a worker hands the orchestrator at the end of each cycle.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub symbol: String,
    pub cycle: u64,
    /// KPIs over this cycle's window
    pub kpi: KpiSnapshot,
    /// Full agent snapshot for checkpointing
    pub state: AgentState,
    pub bars_consumed: usize,
    /// The symbol's feed has no bars left after this cycle
    pub exhausted: bool,
    /// Feed integrity violation that aborted the cycle, if any
    pub feed_fault: Option<String>,
}

/// Orchestrator's per-cycle instruction to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleDirective {
    /// Carry on into the next cycle
    Continue,
    /// Record a penalty against the agent, then carry on
    Penalize,
    /// Record a penalty and clear the agent's learned state
    Reset,
    /// Leave the session; the symbol is excluded
    Exclude { reason: String },
    /// Session is over; shut down cleanly
    Stop,
}

pub(crate) struct Worker {
    agent: SymbolAgent,
    feed: Arc<Vec<Bar>>,
    cycle_bars: usize,
    start_cycle: u64,
    barrier: CycleBarrier,
    cancel: CancelToken,
    reports: mpsc::Sender<WorkerReport>,
    directives: mpsc::Receiver<CycleDirective>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        agent: SymbolAgent,
        feed: Arc<Vec<Bar>>,
        cycle_bars: usize,
        start_cycle: u64,
        barrier: CycleBarrier,
        cancel: CancelToken,
        reports: mpsc::Sender<WorkerReport>,
        directives: mpsc::Receiver<CycleDirective>,
    ) -> JoinHandle<()> {
        let worker = Worker {
            agent,
            feed,
            cycle_bars,
            start_cycle,
            barrier,
            cancel,
            reports,
            directives,
        };
        tokio::spawn(worker.run())
    }

    fn leave(&self) {
        self.barrier.deregister(self.agent.symbol());
    }

    async fn run(mut self) {
        let symbol = self.agent.symbol().to_string();
        let mut cycle = self.start_cycle;
        debug!(%symbol, cycle, "worker started");

        loop {
            if self.cancel.is_cancelled() {
                self.leave();
                return;
            }

            let mut bars_consumed = 0;
            let mut feed_fault = None;
            while bars_consumed < self.cycle_bars {
                if self.cancel.is_cancelled() {
                    self.leave();
                    return;
                }
                let Some(bar) = self.feed.get(self.agent.bar_cursor()).copied() else {
                    break;
                };
                match self.agent.advance(&bar) {
                    Ok(_) => bars_consumed += 1,
                    Err(e) => {
                        warn!(%symbol, cycle, error = %e, "feed fault");
                        feed_fault = Some(e.to_string());
                        break;
                    }
                }
                // The bar loop is pure CPU; yield periodically so other
                // workers on the same runtime thread make progress.
                if bars_consumed % 256 == 0 {
                    tokio::task::yield_now().await;
                }
            }

            let exhausted = self.agent.bar_cursor() >= self.feed.len();
            let report = WorkerReport {
                symbol: symbol.clone(),
                cycle,
                kpi: self.agent.cycle_snapshot(),
                state: self.agent.state(),
                bars_consumed,
                exhausted,
                feed_fault,
            };

            if self.reports.send(report).await.is_err() {
                // Orchestrator is gone.
                self.leave();
                return;
            }

            let directive = tokio::select! {
                d = self.directives.recv() => d,
                _ = self.cancel.cancelled() => {
                    self.leave();
                    return;
                }
            };

            match directive {
                Some(CycleDirective::Continue) => {}
                Some(CycleDirective::Penalize) => self.agent.note_penalty(),
                Some(CycleDirective::Reset) => {
                    self.agent.note_penalty();
                    self.agent.reset_strategy_state();
                }
                Some(CycleDirective::Exclude { reason }) => {
                    info!(%symbol, cycle, %reason, "worker excluded");
                    self.leave();
                    return;
                }
                Some(CycleDirective::Stop) | None => {
                    debug!(%symbol, cycle, "worker stopping");
                    self.leave();
                    return;
                }
            }

            let mut waited = None;
            loop {
                // After a stall, wait on the generation already arrived for;
                // arriving again would leak into the next generation.
                let outcome = match waited {
                    None => self.barrier.arrive_and_wait(&symbol).await,
                    Some(generation) => self.barrier.wait_for_release(generation).await,
                };
                match outcome {
                    Ok(_) => break,
                    Err(BarrierError::Stalled {
                        generation,
                        missing,
                    }) => {
                        // The orchestrator resolves stalls; keep waiting.
                        warn!(%symbol, cycle, ?missing, "barrier stall, re-waiting");
                        waited = Some(generation);
                    }
                    Err(_) => {
                        self.leave();
                        return;
                    }
                }
            }

            cycle += 1;
        }
    }
}
