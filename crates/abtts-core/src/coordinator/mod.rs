//! Parallel run coordination: worker sizing, start scheduling, progress
//! aggregation, and the final verdict.
//!
//! The coordinator owns one task per worker in a `JoinSet` and a progress
//! table it updates only from `WorkerEvent` messages; workers never touch
//! it. Snapshots for the live status view are produced on a fixed interval,
//! not per event, and the final summary is reconciled against the manifest
//! so it reflects every run and probe that ever touched this directory.

pub mod dashboard;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::checkpoint::CheckpointGate;
use crate::distributor::{WorkerAssignment, WorkerId};
use crate::tts::TtsClient;
use crate::worker::{WorkerContext, WorkerEvent, WorkerOutcome, WorkerSession, WorkerState};

/// How worker sessions are brought up, which is also how simultaneous
/// verification pauses are spread out for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStrategy {
    /// All workers start together. Fastest; checkpoints may coincide.
    Simultaneous,
    /// Worker w starts after `(w-1)` times the given interval, so budgets
    /// trip at different times.
    Staggered(Duration),
    /// At most this many workers in flight; a finished worker frees a slot
    /// for the next.
    Batched(usize),
}

/// Progress of one worker as known to the coordinator.
#[derive(Debug, Clone)]
pub struct WorkerProgress {
    pub worker_id: WorkerId,
    pub assigned: usize,
    pub completed: BTreeSet<usize>,
    pub failed: BTreeSet<usize>,
    pub current: Option<usize>,
    pub state: WorkerState,
}

impl WorkerProgress {
    fn new(worker_id: WorkerId, assigned: usize) -> Self {
        Self {
            worker_id,
            assigned,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            current: None,
            state: WorkerState::Idle,
        }
    }
}

/// Point-in-time view of the whole run for rendering.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    /// Units in this run (the missing set being worked through).
    pub run_units: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed: Duration,
    /// Seconds remaining at the current aggregate rate, when computable.
    pub eta_secs: Option<f64>,
    pub workers: Vec<WorkerProgress>,
}

impl RunSnapshot {
    /// Workers currently suspended on a verification pause.
    pub fn awaiting_checkpoint(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::AwaitingCheckpoint)
            .map(|w| w.worker_id)
            .collect()
    }
}

/// Final report of a run, reconciled against the manifest.
#[derive(Debug)]
pub struct RunSummary {
    /// Total units of the whole document (manifest total).
    pub total_units: usize,
    pub completed: BTreeSet<usize>,
    pub failed: BTreeSet<usize>,
    pub missing: BTreeSet<usize>,
    pub duration: Duration,
    pub workers_succeeded: usize,
    pub workers_failed: usize,
    pub aborted: bool,
}

impl RunSummary {
    /// Overall success: every unit either completed or explicitly failed.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// `min(ceil(total / target), max_workers)`, at least 1. With the target
/// equal to the checkpoint threshold, a run that exactly fits needs one
/// verification pause per worker.
pub fn optimal_worker_count(
    total_units: usize,
    target_units_per_worker: u32,
    max_workers: usize,
) -> usize {
    let target = target_units_per_worker.max(1) as usize;
    let optimal = total_units.div_ceil(target);
    optimal.clamp(1, max_workers.max(1))
}

/// Interval between status snapshots.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(2);

/// Run all assignments to completion under the given start strategy.
///
/// Snapshots are sent to `snapshots` (best effort, never blocking the
/// coordination loop) while the run executes. Returns the manifest-level
/// summary; aborting mid-run still returns `Ok` with `aborted` set.
pub async fn run_parallel<C: TtsClient, G: CheckpointGate>(
    assignments: Vec<WorkerAssignment>,
    ctx: WorkerContext<C, G>,
    strategy: StartStrategy,
    snapshots: Option<mpsc::Sender<RunSnapshot>>,
) -> Result<RunSummary> {
    let run_units: usize = assignments.iter().map(|a| a.units.len()).sum();
    let started = Instant::now();

    let mut table: BTreeMap<WorkerId, WorkerProgress> = BTreeMap::new();
    let (events_tx, mut events_rx) = mpsc::channel::<WorkerEvent>(256);
    let mut events_tx = Some(events_tx);

    // Queue of (assignment, start delay); the in-flight cap realizes the
    // batched strategy, the delay realizes the staggered one.
    let mut pending: VecDeque<(WorkerAssignment, Duration)> = VecDeque::new();
    let inflight_cap = match strategy {
        StartStrategy::Simultaneous | StartStrategy::Staggered(_) => usize::MAX,
        StartStrategy::Batched(size) => size.max(1),
    };
    for (pos, assignment) in assignments.into_iter().enumerate() {
        if assignment.units.is_empty() {
            // More workers than units; nothing for this one to do.
            let mut row = WorkerProgress::new(assignment.worker_id, 0);
            row.state = WorkerState::Done;
            table.insert(assignment.worker_id, row);
            continue;
        }
        table.insert(
            assignment.worker_id,
            WorkerProgress::new(assignment.worker_id, assignment.units.len()),
        );
        let delay = match strategy {
            StartStrategy::Staggered(interval) => interval * pos as u32,
            _ => Duration::ZERO,
        };
        pending.push_back((assignment, delay));
    }

    tracing::info!(
        workers = table.len(),
        units = run_units,
        strategy = ?strategy,
        "parallel run starting"
    );

    let mut join_set: JoinSet<WorkerOutcome> = JoinSet::new();
    spawn_up_to(&mut join_set, &mut pending, inflight_cap, &ctx, &mut events_tx);

    let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(ev) => apply_event(&mut table, ev),
                    // All workers done and every sender dropped.
                    None => break,
                }
            }
            joined = join_set.join_next(), if !join_set.is_empty() => {
                match joined {
                    Some(Ok(outcome)) => {
                        if let Some(row) = table.get_mut(&outcome.worker_id) {
                            row.state = outcome.state;
                            row.current = None;
                        }
                    }
                    Some(Err(e)) => {
                        // A panicked worker cannot tell us who it was; the
                        // final reconciliation pass below marks the row.
                        tracing::error!(error = %e, "worker task join error");
                    }
                    None => {}
                }
                spawn_up_to(&mut join_set, &mut pending, inflight_cap, &ctx, &mut events_tx);
            }
            _ = ticker.tick() => {
                if let Some(tx) = &snapshots {
                    let _ = tx.try_send(snapshot(&table, run_units, started));
                }
            }
        }
    }

    // Drain any tasks that finished between the last event and channel close.
    while let Some(joined) = join_set.join_next().await {
        if let Ok(outcome) = joined {
            if let Some(row) = table.get_mut(&outcome.worker_id) {
                row.state = outcome.state;
                row.current = None;
            }
        }
    }

    let aborted = ctx.control.is_aborted();
    for row in table.values_mut() {
        if !row.state.is_terminal() {
            if aborted {
                // Interrupted, not failed; its remaining units are simply
                // still missing.
                continue;
            }
            row.state = WorkerState::Failed;
        }
    }

    if let Some(tx) = &snapshots {
        let _ = tx.try_send(snapshot(&table, run_units, started));
    }

    let completed = ctx
        .manifest
        .completed_indices()
        .await
        .context("read completed set for summary")?;
    let failed = ctx
        .manifest
        .failed_indices()
        .await
        .context("read failed set for summary")?;
    let missing = ctx
        .manifest
        .missing_indices()
        .await
        .context("read missing set for summary")?;
    let total_units = ctx.manifest.total_units().await?;

    let summary = RunSummary {
        total_units,
        completed,
        failed,
        missing,
        duration: started.elapsed(),
        workers_succeeded: table
            .values()
            .filter(|w| w.state == WorkerState::Done)
            .count(),
        workers_failed: table
            .values()
            .filter(|w| w.state == WorkerState::Failed)
            .count(),
        aborted,
    };
    tracing::info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        missing = summary.missing.len(),
        aborted = summary.aborted,
        "parallel run finished"
    );
    Ok(summary)
}

fn spawn_up_to<C: TtsClient, G: CheckpointGate>(
    join_set: &mut JoinSet<WorkerOutcome>,
    pending: &mut VecDeque<(WorkerAssignment, Duration)>,
    cap: usize,
    ctx: &WorkerContext<C, G>,
    events_tx: &mut Option<mpsc::Sender<WorkerEvent>>,
) {
    while join_set.len() < cap {
        let Some((assignment, delay)) = pending.pop_front() else {
            break;
        };
        let Some(tx) = events_tx.as_ref().cloned() else {
            break;
        };
        let ctx = ctx.clone();
        join_set.spawn(async move {
            if delay > Duration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.control.aborted() => {}
                }
            }
            WorkerSession::new(assignment, ctx, tx).run().await
        });
    }
    if pending.is_empty() {
        // Drop the coordinator's sender so the event channel closes once
        // the last worker finishes.
        *events_tx = None;
    }
}

fn apply_event(table: &mut BTreeMap<WorkerId, WorkerProgress>, event: WorkerEvent) {
    match event {
        WorkerEvent::Started { worker_id } => {
            if let Some(row) = table.get_mut(&worker_id) {
                row.state = WorkerState::Working;
            }
        }
        WorkerEvent::UnitStarted { worker_id, index } => {
            if let Some(row) = table.get_mut(&worker_id) {
                row.current = Some(index);
            }
        }
        WorkerEvent::UnitCompleted { worker_id, index } => {
            if let Some(row) = table.get_mut(&worker_id) {
                row.completed.insert(index);
                row.current = None;
            }
        }
        WorkerEvent::UnitFailed { worker_id, index, error } => {
            tracing::warn!(worker = worker_id, unit = index, error = %error, "unit failed");
            if let Some(row) = table.get_mut(&worker_id) {
                row.failed.insert(index);
                row.current = None;
            }
        }
        WorkerEvent::AwaitingCheckpoint { worker_id } => {
            if let Some(row) = table.get_mut(&worker_id) {
                row.state = WorkerState::AwaitingCheckpoint;
            }
        }
        WorkerEvent::CheckpointCleared { worker_id } => {
            if let Some(row) = table.get_mut(&worker_id) {
                row.state = WorkerState::Working;
            }
        }
        WorkerEvent::Finished { worker_id } => {
            if let Some(row) = table.get_mut(&worker_id) {
                row.state = WorkerState::Done;
                row.current = None;
            }
        }
        WorkerEvent::Fatal { worker_id, error } => {
            tracing::error!(worker = worker_id, error = %error, "worker fatal");
            if let Some(row) = table.get_mut(&worker_id) {
                row.state = WorkerState::Failed;
                row.current = None;
            }
        }
    }
}

fn snapshot(
    table: &BTreeMap<WorkerId, WorkerProgress>,
    run_units: usize,
    started: Instant,
) -> RunSnapshot {
    let completed: usize = table.values().map(|w| w.completed.len()).sum();
    let failed: usize = table.values().map(|w| w.failed.len()).sum();
    let elapsed = started.elapsed();

    // Simple moving aggregate rate, recomputed per snapshot.
    let remaining = run_units.saturating_sub(completed + failed);
    let eta_secs = if remaining == 0 {
        Some(0.0)
    } else if completed == 0 || elapsed.as_secs_f64() <= 0.0 {
        None
    } else {
        let rate = completed as f64 / elapsed.as_secs_f64();
        (rate > 0.0).then(|| remaining as f64 / rate)
    };

    RunSnapshot {
        run_units,
        completed,
        failed,
        elapsed,
        eta_secs,
        workers: table.values().cloned().collect(),
    }
}
