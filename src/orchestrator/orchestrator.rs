//! Cycle orchestrator
//!
//! Drives the session state machine: spawn one worker per symbol, then per
//! cycle collect every worker's report, aggregate KPIs, apply the penalty
//! policy, checkpoint, and release everyone through the barrier together.
//! The orchestrator is itself a barrier participant, so workers never start
//! cycle N+1 before cycle N is sealed and persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::coordination::{BarrierConfig, BarrierError, CancelToken, CycleBarrier, StallPolicy};
use crate::domain::{Bar, KpiSnapshot};
use crate::error::{LockstepError, Result};
use crate::metrics::aggregate;
use crate::penalty::{PenaltyConfig, PenaltyManager, PenaltyVerdict};
use crate::persistence::{ArtifactWriter, CheckpointStore};
use crate::sim::SymbolAgent;
use crate::strategy::StrategyEvaluator;

use super::session::{Cycle, SessionConfig, SessionResult, SessionState, SessionStatus};
use super::worker::{CycleDirective, Worker, WorkerReport};

/// Builds one evaluator per symbol worker.
pub type EvaluatorFactory = Arc<dyn Fn(&str) -> Box<dyn StrategyEvaluator> + Send + Sync>;

const ORCHESTRATOR: &str = "orchestrator";

/// Control handle for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: CancelToken,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Request a graceful stop. Partial-cycle results are discarded; the
    /// session finishes with `Cancelled`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// Wait until the session reaches a terminal status.
    pub async fn wait_terminal(&mut self) -> SessionStatus {
        loop {
            let status = *self.status_rx.borrow();
            if status.is_terminal() {
                return status;
            }
            if self.status_rx.changed().await.is_err() {
                return *self.status_rx.borrow();
            }
        }
    }
}

/// Lockstep coordinator for one session.
pub struct CycleOrchestrator {
    session: SessionConfig,
    penalty: PenaltyConfig,
    barrier_config: BarrierConfig,
    feeds: BTreeMap<String, Arc<Vec<Bar>>>,
    factory: EvaluatorFactory,
    checkpoints: Option<CheckpointStore>,
    artifacts: Option<ArtifactWriter>,
    resume_from: Option<SessionState>,
    cancel: CancelToken,
    status_tx: watch::Sender<SessionStatus>,
}

impl CycleOrchestrator {
    pub fn new(
        session: SessionConfig,
        feeds: BTreeMap<String, Vec<Bar>>,
        factory: EvaluatorFactory,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            session,
            penalty: PenaltyConfig::default(),
            barrier_config: BarrierConfig::default(),
            feeds: feeds.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            factory,
            checkpoints: None,
            artifacts: None,
            resume_from: None,
            cancel: CancelToken::new(),
            status_tx,
        }
    }

    /// Wire every sub-config plus checkpoint and artifact stores from the
    /// application config.
    pub fn from_app_config(
        config: &AppConfig,
        feeds: BTreeMap<String, Vec<Bar>>,
        factory: EvaluatorFactory,
    ) -> Result<Self> {
        let store = CheckpointStore::new(config.checkpoint.clone())?;
        Ok(Self::new(config.session.clone(), feeds, factory)
            .with_penalty(config.penalty.clone())
            .with_barrier(config.barrier.clone())
            .with_checkpoints(store)
            .with_artifacts(ArtifactWriter::new(config.artifact_dir.clone())))
    }

    pub fn with_penalty(mut self, penalty: PenaltyConfig) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn with_barrier(mut self, barrier: BarrierConfig) -> Self {
        self.barrier_config = barrier;
        self
    }

    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_artifacts(mut self, writer: ArtifactWriter) -> Self {
        self.artifacts = Some(writer);
        self
    }

    /// Continue a checkpointed session instead of starting fresh. Sealed
    /// cycles are kept as-is and are never replayed.
    pub fn resume_from(mut self, state: SessionState) -> Self {
        self.resume_from = Some(state);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cancel: self.cancel.clone(),
            status_rx: self.status_tx.subscribe(),
        }
    }

    fn set_status(&self, status: SessionStatus) {
        debug!(%status, "session status");
        let _ = self.status_tx.send(status);
    }

    fn initial_state(&mut self) -> SessionState {
        match self.resume_from.take() {
            Some(state) => {
                info!(
                    session = %state.session_id,
                    next_cycle = state.next_cycle,
                    "resuming session"
                );
                state
            }
            None => SessionState {
                session_id: format!("sess_{}", Uuid::new_v4().simple()),
                started_at: Utc::now(),
                config: self.session.clone(),
                agents: BTreeMap::new(),
                cycles: Vec::new(),
                penalties: PenaltyManager::new(self.penalty.clone()),
                excluded: BTreeMap::new(),
                next_cycle: 0,
            },
        }
    }

    /// Run the session to a terminal status. Cancellation, worker stalls
    /// under `StallPolicy::FailSession` and checkpoint failures all end the
    /// session; each is reported through `SessionResult`, not as an `Err`.
    pub async fn run(mut self) -> Result<SessionResult> {
        let mut state = self.initial_state();
        let session_id = state.session_id.clone();

        let symbols: Vec<String> = self
            .session
            .symbols
            .iter()
            .filter(|s| !state.excluded.contains_key(*s))
            .cloned()
            .collect();
        for symbol in &symbols {
            if !self.feeds.contains_key(symbol) {
                self.set_status(SessionStatus::Failed);
                return Err(LockstepError::Feed {
                    symbol: symbol.clone(),
                    reason: "no feed configured".to_string(),
                });
            }
        }

        let barrier = CycleBarrier::new(
            symbols
                .iter()
                .cloned()
                .chain(std::iter::once(ORCHESTRATOR.to_string())),
            self.barrier_config.stall_timeout(),
            self.cancel.clone(),
        );

        let (report_tx, mut report_rx) = mpsc::channel::<WorkerReport>(symbols.len().max(1));
        let mut directive_txs: BTreeMap<String, mpsc::Sender<CycleDirective>> = BTreeMap::new();
        let mut joins: Vec<JoinHandle<()>> = Vec::new();

        for symbol in &symbols {
            let evaluator = (self.factory)(symbol);
            let agent = match state.agents.get(symbol) {
                Some(saved) => SymbolAgent::from_state(
                    saved.clone(),
                    evaluator,
                    self.session.history_window,
                    self.session.bar_interval(),
                ),
                None => SymbolAgent::new(
                    symbol.clone(),
                    self.session.initial_balance,
                    evaluator,
                    self.session.history_window,
                    self.session.bar_interval(),
                ),
            };

            let (directive_tx, directive_rx) = mpsc::channel(1);
            directive_txs.insert(symbol.clone(), directive_tx);
            joins.push(Worker::spawn(
                agent,
                Arc::clone(&self.feeds[symbol]),
                self.session.cycle_bars,
                state.next_cycle,
                barrier.clone(),
                self.cancel.clone(),
                report_tx.clone(),
                directive_rx,
            ));
        }
        drop(report_tx);

        info!(
            session = %session_id,
            symbols = symbols.len(),
            start_cycle = state.next_cycle,
            "session started"
        );

        let mut active: BTreeSet<String> = symbols.into_iter().collect();
        let mut failure: Option<String> = None;
        let final_status = loop {
            if active.is_empty() {
                break SessionStatus::Completed;
            }
            self.set_status(SessionStatus::Running);

            // Phase 1: collect every active worker's report.
            let mut reports: BTreeMap<String, WorkerReport> = BTreeMap::new();
            let deadline = self
                .barrier_config
                .stall_timeout()
                .map(|t| tokio::time::Instant::now() + t);

            let collected = loop {
                if reports.len() == active.len() {
                    break true;
                }
                let report = tokio::select! {
                    r = report_rx.recv() => r,
                    _ = self.cancel.cancelled() => break false,
                    _ = async {
                        match deadline {
                            Some(d) => tokio::time::sleep_until(d).await,
                            None => std::future::pending().await,
                        }
                    } => {
                        let missing: Vec<String> = active
                            .iter()
                            .filter(|s| !reports.contains_key(*s))
                            .cloned()
                            .collect();
                        match self.barrier_config.on_stall {
                            StallPolicy::FailSession => {
                                error!(cycle = state.next_cycle, ?missing, "worker stall, failing session");
                                failure = Some(
                                    LockstepError::WorkerStalled {
                                        generation: barrier.generation(),
                                        missing,
                                    }
                                    .to_string(),
                                );
                                self.cancel.cancel();
                                break false;
                            }
                            StallPolicy::ExcludeSymbol => {
                                for symbol in missing {
                                    warn!(%symbol, cycle = state.next_cycle, "worker stalled, excluding");
                                    barrier.deregister(&symbol);
                                    directive_txs.remove(&symbol);
                                    active.remove(&symbol);
                                    state
                                        .excluded
                                        .insert(symbol, "stalled: no cycle report".to_string());
                                }
                                continue;
                            }
                        }
                    }
                };
                match report {
                    Some(r) if active.contains(&r.symbol) => {
                        if r.cycle != state.next_cycle {
                            warn!(symbol = %r.symbol, got = r.cycle, expected = state.next_cycle, "stale report dropped");
                            continue;
                        }
                        reports.insert(r.symbol.clone(), r);
                    }
                    Some(r) => {
                        debug!(symbol = %r.symbol, "report from excluded worker dropped");
                    }
                    None => break false,
                }
            };

            if self.cancel.is_cancelled() || !collected {
                break if failure.is_some() {
                    SessionStatus::Failed
                } else {
                    SessionStatus::Cancelled
                };
            }

            // Phase 2: seal the cycle.
            self.set_status(SessionStatus::Aggregating);
            let cycle_number = state.next_cycle;
            let mut per_symbol: BTreeMap<String, KpiSnapshot> = BTreeMap::new();
            let mut directives: BTreeMap<String, CycleDirective> = BTreeMap::new();

            for (symbol, report) in &reports {
                per_symbol.insert(symbol.clone(), report.kpi.clone());
                state.agents.insert(symbol.clone(), report.state.clone());

                if let Some(fault) = &report.feed_fault {
                    state.excluded.insert(symbol.clone(), fault.clone());
                    directives.insert(
                        symbol.clone(),
                        CycleDirective::Exclude {
                            reason: fault.clone(),
                        },
                    );
                    continue;
                }

                let verdict = state.penalties.evaluate(symbol, cycle_number, &report.kpi);
                let directive = match verdict {
                    PenaltyVerdict::Ok | PenaltyVerdict::Warned => CycleDirective::Continue,
                    PenaltyVerdict::Penalized => CycleDirective::Penalize,
                    PenaltyVerdict::Reset => CycleDirective::Reset,
                };
                if report.exhausted {
                    debug!(%symbol, cycle = cycle_number, "feed exhausted");
                    directives.insert(symbol.clone(), CycleDirective::Stop);
                } else {
                    directives.insert(symbol.clone(), directive);
                }
            }

            let cycle_aggregate = aggregate(&per_symbol);
            state.cycles.push(Cycle {
                number: cycle_number,
                start_bar: cycle_number as usize * self.session.cycle_bars,
                end_bar: (cycle_number as usize + 1) * self.session.cycle_bars,
                per_symbol,
                aggregate: cycle_aggregate.clone(),
                sealed_at: Utc::now(),
            });
            state.next_cycle = cycle_number + 1;
            debug_assert!(state.cycle_numbers_unique());

            info!(
                cycle = cycle_number,
                pnl = cycle_aggregate.kpi.pnl,
                trades = cycle_aggregate.kpi.trades,
                active = cycle_aggregate.active_symbols,
                "cycle sealed"
            );

            let stop_all = self.session.max_cycles > 0 && state.next_cycle >= self.session.max_cycles;

            // Phase 3: persist the sealed cycle before anyone moves on.
            if let Some(store) = &self.checkpoints {
                self.set_status(SessionStatus::PersistingCheckpoint);
                if let Err(e) = store.save(&state).await {
                    error!(cycle = cycle_number, error = %e, "checkpoint failed, aborting session");
                    failure = Some(e.to_string());
                    self.cancel.cancel();
                    break SessionStatus::Failed;
                }
            }

            // Phase 4: hand out directives, then release the barrier.
            for (symbol, directive) in directives {
                let stopping = matches!(
                    directive,
                    CycleDirective::Stop | CycleDirective::Exclude { .. }
                );
                let directive = if stop_all { CycleDirective::Stop } else { directive };
                if let Some(tx) = directive_txs.get(&symbol) {
                    if tx.send(directive).await.is_err() {
                        warn!(%symbol, "worker gone before directive");
                        active.remove(&symbol);
                        directive_txs.remove(&symbol);
                        continue;
                    }
                }
                if stopping || stop_all {
                    active.remove(&symbol);
                    directive_txs.remove(&symbol);
                }
            }

            if stop_all || active.is_empty() {
                break SessionStatus::Completed;
            }

            self.set_status(SessionStatus::AwaitingBarrier);
            let mut released = false;
            let mut waited = None;
            while !released {
                let outcome = match waited {
                    None => barrier.arrive_and_wait(ORCHESTRATOR).await,
                    Some(generation) => barrier.wait_for_release(generation).await,
                };
                match outcome {
                    Ok(_) => released = true,
                    Err(BarrierError::Cancelled) => break,
                    Err(BarrierError::Stalled {
                        generation,
                        missing,
                    }) => match self.barrier_config.on_stall {
                        StallPolicy::FailSession => {
                            failure = Some(
                                LockstepError::WorkerStalled {
                                    generation,
                                    missing,
                                }
                                .to_string(),
                            );
                            self.cancel.cancel();
                            break;
                        }
                        StallPolicy::ExcludeSymbol => {
                            for symbol in missing {
                                if symbol == ORCHESTRATOR {
                                    continue;
                                }
                                warn!(%symbol, "stalled at barrier, excluding");
                                barrier.deregister(&symbol);
                                directive_txs.remove(&symbol);
                                active.remove(&symbol);
                                state
                                    .excluded
                                    .insert(symbol, "stalled: never arrived at barrier".to_string());
                            }
                            if barrier.generation() > generation {
                                released = true;
                            } else {
                                // Already arrived for this generation; re-wait
                                // without registering a second arrival.
                                waited = Some(generation);
                            }
                        }
                    },
                    Err(BarrierError::UnknownParticipant(p)) => {
                        return Err(LockstepError::UnknownParticipant(p));
                    }
                }
            }
            if !released {
                break if failure.is_some() {
                    SessionStatus::Failed
                } else {
                    SessionStatus::Cancelled
                };
            }
        };

        // Shut down workers and drain their tasks.
        self.cancel.cancel();
        drop(directive_txs);
        for join in joins {
            let _ = join.await;
        }

        let result = self.finalize(state, final_status, failure).await?;
        self.set_status(final_status);
        info!(
            session = %result.session_id,
            status = %result.status,
            cycles = result.cycles_completed,
            pnl = result.aggregate.kpi.pnl,
            "session finished"
        );
        Ok(result)
    }

    async fn finalize(
        &self,
        state: SessionState,
        status: SessionStatus,
        failure: Option<String>,
    ) -> Result<SessionResult> {
        let per_symbol: BTreeMap<String, KpiSnapshot> = state
            .agents
            .iter()
            .map(|(symbol, agent)| (symbol.clone(), agent.simulator.session_snapshot()))
            .collect();

        let result = SessionResult {
            session_id: state.session_id.clone(),
            status,
            started_at: state.started_at,
            finished_at: Utc::now(),
            cycles_completed: state.cycles.len() as u64,
            aggregate: aggregate(&per_symbol),
            per_symbol,
            excluded: state.excluded.clone(),
            failure,
        };

        // Persist the final state even when the session never sealed a
        // cycle, so cancellations and exclusions survive a restart.
        if let Some(store) = &self.checkpoints {
            if let Err(e) = store.save(&state).await {
                warn!(error = %e, "failed to write final checkpoint");
            }
        }

        if let Some(writer) = &self.artifacts {
            if let Err(e) = writer.write_all(&result).await {
                warn!(error = %e, "failed to write session artifacts");
            }
        }

        Ok(result)
    }
}
