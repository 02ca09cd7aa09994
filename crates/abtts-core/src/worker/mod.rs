//! Worker session: one isolated remote session consuming its assignment.
//!
//! Each worker owns its `SessionBudget` and walks its assigned units in
//! order: fixed inter-request pacing, bounded retries on transient failures,
//! a proactive verification pause when the budget trips, and a forced pause
//! if the remote signals the hard limit despite the guard. One unit's
//! permanent failure never halts the worker; anything outside the modeled
//! cases is fatal to this worker only.
//!
//! Progress is reported exclusively by message-passing: the coordinator
//! owns the progress table and nothing here mutates it directly.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::budget::SessionBudget;
use crate::checkpoint::{CheckpointGate, CheckpointStats};
use crate::control::RunControl;
use crate::distributor::{WorkerAssignment, WorkerId};
use crate::manifest::RunManifest;
use crate::output;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::tts::{SendError, TtsClient};
use crate::unit::WorkUnit;


/// Lifecycle of one worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Working,
    AwaitingCheckpoint,
    Done,
    Failed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Working => "working",
            WorkerState::AwaitingCheckpoint => "awaiting checkpoint",
            WorkerState::Done => "done",
            WorkerState::Failed => "failed",
        }
    }

    /// True for states a finished worker can be left in.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Done | WorkerState::Failed)
    }
}

/// Progress report emitted by a worker to the coordinator.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started { worker_id: WorkerId },
    UnitStarted { worker_id: WorkerId, index: usize },
    UnitCompleted { worker_id: WorkerId, index: usize },
    UnitFailed {
        worker_id: WorkerId,
        index: usize,
        error: String,
    },
    AwaitingCheckpoint { worker_id: WorkerId },
    CheckpointCleared { worker_id: WorkerId },
    Finished { worker_id: WorkerId },
    Fatal { worker_id: WorkerId, error: String },
}

/// Per-worker pacing and budget policy, from configuration.
#[derive(Debug, Clone)]
pub struct WorkerPolicy {
    /// Requests per session before a proactive verification pause.
    pub checkpoint_threshold: u32,
    /// Fixed delay between consecutive sends within one session.
    pub request_delay: Duration,
    /// Retry policy for transient send failures.
    pub retry: RetryPolicy,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            checkpoint_threshold: 55,
            request_delay: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a worker needs besides its assignment. Cloned per worker; the
/// manifest handle performs fine-grained per-index updates so sharing it is
/// safe.
pub struct WorkerContext<C, G> {
    pub client: Arc<C>,
    pub gate: Arc<G>,
    pub manifest: RunManifest,
    pub control: RunControl,
    pub output_dir: PathBuf,
    pub voice: String,
    pub policy: WorkerPolicy,
}

impl<C, G> Clone for WorkerContext<C, G> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            gate: Arc::clone(&self.gate),
            manifest: self.manifest.clone(),
            control: self.control.clone(),
            output_dir: self.output_dir.clone(),
            voice: self.voice.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// Final report of one worker's run, used by the coordinator to reconcile
/// the progress table after the task joins.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub worker_id: WorkerId,
    pub state: WorkerState,
    pub completed: Vec<usize>,
    pub failed: Vec<usize>,
    pub checkpoints_cleared: u32,
    pub aborted: bool,
}

/// One worker's execution over its assigned units.
pub struct WorkerSession<C: TtsClient, G: CheckpointGate> {
    id: WorkerId,
    assignment: Vec<WorkUnit>,
    assigned_total: usize,
    ctx: WorkerContext<C, G>,
    events: mpsc::Sender<WorkerEvent>,
    budget: SessionBudget,
    state: WorkerState,
    last_send: Option<Instant>,
    completed: Vec<usize>,
    failed: Vec<usize>,
    checkpoints_cleared: u32,
}

impl<C: TtsClient, G: CheckpointGate> WorkerSession<C, G> {
    pub fn new(
        assignment: WorkerAssignment,
        ctx: WorkerContext<C, G>,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        let budget = SessionBudget::new(ctx.policy.checkpoint_threshold);
        Self {
            id: assignment.worker_id,
            assigned_total: assignment.units.len(),
            assignment: assignment.units,
            ctx,
            events,
            budget,
            state: WorkerState::Idle,
            last_send: None,
            completed: Vec::new(),
            failed: Vec::new(),
            checkpoints_cleared: 0,
        }
    }

    /// Run the session to completion, abort, or failure.
    pub async fn run(mut self) -> WorkerOutcome {
        self.state = WorkerState::Working;
        self.emit(WorkerEvent::Started { worker_id: self.id }).await;
        tracing::info!(worker = self.id, units = self.assigned_total, "worker started");

        match self.process_all().await {
            Ok(()) => {
                if !self.ctx.control.is_aborted() {
                    self.state = WorkerState::Done;
                    self.emit(WorkerEvent::Finished { worker_id: self.id }).await;
                    tracing::info!(
                        worker = self.id,
                        completed = self.completed.len(),
                        failed = self.failed.len(),
                        "worker finished"
                    );
                } else {
                    tracing::info!(worker = self.id, "worker stopped by abort");
                }
            }
            Err(e) => {
                self.state = WorkerState::Failed;
                tracing::error!(worker = self.id, error = %format!("{:#}", e), "worker failed");
                self.emit(WorkerEvent::Fatal {
                    worker_id: self.id,
                    error: format!("{:#}", e),
                })
                .await;
            }
        }

        WorkerOutcome {
            worker_id: self.id,
            state: self.state,
            completed: self.completed,
            failed: self.failed,
            checkpoints_cleared: self.checkpoints_cleared,
            aborted: self.ctx.control.is_aborted(),
        }
    }

    async fn process_all(&mut self) -> Result<()> {
        let units = std::mem::take(&mut self.assignment);
        for unit in units {
            if self.ctx.control.is_aborted() {
                return Ok(());
            }
            if self.budget.should_checkpoint() {
                self.checkpoint_pause().await?;
                if self.ctx.control.is_aborted() {
                    return Ok(());
                }
            }
            self.process_unit(&unit).await?;
        }
        Ok(())
    }

    /// Send one unit: pace, retry transients, route hard limits to the
    /// verification pause. Only storage/manifest/gate errors propagate.
    async fn process_unit(&mut self, unit: &WorkUnit) -> Result<()> {
        self.emit(WorkerEvent::UnitStarted {
            worker_id: self.id,
            index: unit.index,
        })
        .await;

        let mut attempt: u32 = 1;
        loop {
            if self.ctx.control.is_aborted() {
                return Ok(());
            }
            self.pace().await;
            if self.ctx.control.is_aborted() {
                return Ok(());
            }

            let result = self.ctx.client.synthesize(&unit.text, &self.ctx.voice).await;
            self.last_send = Some(Instant::now());

            match result {
                Ok(audio) => {
                    output::write_unit_audio(&self.ctx.output_dir, unit, &audio)
                        .await
                        .with_context(|| format!("store audio for unit {}", unit.index))?;
                    self.ctx
                        .manifest
                        .mark_completed(unit.index)
                        .await
                        .with_context(|| format!("record completion of unit {}", unit.index))?;
                    self.budget.record_success();
                    self.completed.push(unit.index);
                    self.emit(WorkerEvent::UnitCompleted {
                        worker_id: self.id,
                        index: unit.index,
                    })
                    .await;
                    return Ok(());
                }
                Err(SendError::HardLimit) => {
                    // The guard should pause first; a race or clock skew on
                    // the remote side can still get here. Same resolution
                    // either way, and the attempt is not consumed.
                    tracing::warn!(
                        worker = self.id,
                        unit = unit.index,
                        since_checkpoint = self.budget.requests_since_checkpoint(),
                        "remote signalled hard limit; pausing for verification"
                    );
                    self.checkpoint_pause().await?;
                    if self.ctx.control.is_aborted() {
                        return Ok(());
                    }
                }
                Err(SendError::Transient(msg)) => {
                    tracing::debug!(
                        worker = self.id,
                        unit = unit.index,
                        attempt,
                        error = %msg,
                        "transient send failure"
                    );
                    match self.ctx.policy.retry.decide(attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            attempt += 1;
                            self.sleep_or_abort(delay).await;
                        }
                        RetryDecision::NoRetry => {
                            self.ctx
                                .manifest
                                .mark_failed(unit.index)
                                .await
                                .with_context(|| format!("record failure of unit {}", unit.index))?;
                            self.failed.push(unit.index);
                            tracing::warn!(
                                worker = self.id,
                                unit = unit.index,
                                error = %msg,
                                "unit permanently failed after {} attempts",
                                attempt
                            );
                            self.emit(WorkerEvent::UnitFailed {
                                worker_id: self.id,
                                index: unit.index,
                                error: msg,
                            })
                            .await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Suspend on the verification gate until the operator clears this
    /// session or the run is aborted.
    async fn checkpoint_pause(&mut self) -> Result<()> {
        self.state = WorkerState::AwaitingCheckpoint;
        self.emit(WorkerEvent::AwaitingCheckpoint { worker_id: self.id })
            .await;
        let stats = CheckpointStats {
            requests_since_checkpoint: self.budget.requests_since_checkpoint(),
            total_requests: self.budget.total_requests(),
            completed_units: self.completed.len(),
            assigned_units: self.assigned_total,
        };

        tokio::select! {
            cleared = self.ctx.gate.wait_for_clearance(self.id, stats) => {
                cleared.with_context(|| format!("checkpoint clearance for worker {}", self.id))?;
                self.budget.record_checkpoint_completed();
                self.checkpoints_cleared += 1;
                self.state = WorkerState::Working;
                self.emit(WorkerEvent::CheckpointCleared { worker_id: self.id }).await;
            }
            _ = self.ctx.control.aborted() => {}
        }
        Ok(())
    }

    /// Enforce the fixed inter-request delay since the previous send.
    async fn pace(&self) {
        let Some(last) = self.last_send else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < self.ctx.policy.request_delay {
            self.sleep_or_abort(self.ctx.policy.request_delay - elapsed)
                .await;
        }
    }

    async fn sleep_or_abort(&self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.ctx.control.aborted() => {}
        }
    }

    async fn emit(&self, event: WorkerEvent) {
        // The coordinator dropping its receiver just means nobody is
        // watching; the worker keeps going.
        let _ = self.events.send(event).await;
    }
}
