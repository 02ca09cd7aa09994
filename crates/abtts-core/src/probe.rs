//! Safety probe: small-scale pre-flight before full parallelism.
//!
//! The remote's quota is known to be per-session; whether another limit sits
//! above the session (shared across all sessions from one address) is not
//! observable without trying. The probe runs a fixed small number of workers
//! over a fixed small slice of units (policy constants, never derived from
//! the target run's size) and watches for a hard-limit signal arriving while
//! a worker's own counter is still well below its threshold. Probe sends are
//! real work: artifacts and manifest marks count, and the main run plans
//! around them.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::budget::SessionBudget;
use crate::checkpoint::{CheckpointGate, CheckpointStats};
use crate::control::RunControl;
use crate::distributor::{round_robin, WorkerId};
use crate::output;
use crate::retry::RetryDecision;
use crate::tts::{SendError, TtsClient};
use crate::unit::WorkUnit;
use crate::worker::WorkerContext;

/// Probe scale and detection margin. All policy constants.
#[derive(Debug, Clone, Copy)]
pub struct ProbePolicy {
    /// Number of probe workers.
    pub workers: usize,
    /// Number of units attempted across all probe workers.
    pub units: usize,
    /// A hard limit seen while a worker's counter is more than this many
    /// requests below its threshold is attributed to a shared limit.
    pub hard_limit_slack: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            workers: 2,
            units: 100,
            hard_limit_slack: 5,
        }
    }
}

/// Probe conclusion. Anything but `Safe` means the caller must fall back to
/// a single-worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// No evidence of a limit above the session level.
    Safe,
    /// A hard limit arrived well before any single session's counter
    /// predicted it: the remote limits at a coarser granularity.
    SharedLimit,
    /// A probe worker hit an unexpected error; parallelism is unproven.
    Failed,
}

#[derive(Debug)]
pub struct ProbeReport {
    pub verdict: ProbeVerdict,
    pub attempted: usize,
    pub completed: usize,
    pub detail: Option<String>,
}

/// Minimum units for the probe to be meaningful.
const MIN_PROBE_UNITS: usize = 10;

/// Run the pre-flight trial over the first `policy.units` of `units`.
pub async fn run_safety_probe<C: TtsClient, G: CheckpointGate>(
    units: &[WorkUnit],
    ctx: WorkerContext<C, G>,
    policy: ProbePolicy,
) -> Result<ProbeReport> {
    let slice: Vec<WorkUnit> = units.iter().take(policy.units).cloned().collect();
    if slice.len() < MIN_PROBE_UNITS {
        return Ok(ProbeReport {
            verdict: ProbeVerdict::Failed,
            attempted: 0,
            completed: 0,
            detail: Some(format!(
                "{} units is too few to probe (need {})",
                slice.len(),
                MIN_PROBE_UNITS
            )),
        });
    }

    let attempted = slice.len();
    let workers = policy.workers.max(1);
    tracing::info!(workers, units = attempted, "safety probe starting");

    let shared_limit = Arc::new(AtomicBool::new(false));
    // Local stop signal so detection in one probe worker halts the other
    // without aborting the surrounding run.
    let probe_stop = RunControl::new();

    let mut join_set = JoinSet::new();
    for assignment in round_robin(&slice, workers) {
        let ctx = ctx.clone();
        let shared_limit = Arc::clone(&shared_limit);
        let probe_stop = probe_stop.clone();
        join_set.spawn(async move {
            probe_worker(assignment.worker_id, assignment.units, ctx, policy, shared_limit, probe_stop)
                .await
        });
    }

    let mut completed = 0usize;
    let mut worker_error: Option<String> = None;
    while let Some(joined) = join_set.join_next().await {
        match joined.context("probe worker task join")? {
            Ok(done) => completed += done,
            Err(e) => {
                probe_stop.abort();
                worker_error.get_or_insert(format!("{:#}", e));
            }
        }
    }

    let report = if shared_limit.load(Ordering::SeqCst) {
        ProbeReport {
            verdict: ProbeVerdict::SharedLimit,
            attempted,
            completed,
            detail: Some("hard limit observed below any session's own threshold".into()),
        }
    } else if let Some(detail) = worker_error {
        ProbeReport {
            verdict: ProbeVerdict::Failed,
            attempted,
            completed,
            detail: Some(detail),
        }
    } else {
        ProbeReport {
            verdict: ProbeVerdict::Safe,
            attempted,
            completed,
            detail: None,
        }
    };
    tracing::info!(verdict = ?report.verdict, completed = report.completed, "safety probe finished");
    Ok(report)
}

/// One probe worker: the normal send loop in miniature, plus early
/// hard-limit detection.
async fn probe_worker<C: TtsClient, G: CheckpointGate>(
    worker_id: WorkerId,
    units: Vec<WorkUnit>,
    ctx: WorkerContext<C, G>,
    policy: ProbePolicy,
    shared_limit: Arc<AtomicBool>,
    probe_stop: RunControl,
) -> Result<usize> {
    let mut budget = SessionBudget::new(ctx.policy.checkpoint_threshold);
    let mut last_send: Option<Instant> = None;
    let mut completed = 0usize;
    let assigned = units.len();

    'units: for unit in units {
        let mut attempt: u32 = 1;
        loop {
            if ctx.control.is_aborted() || probe_stop.is_aborted() {
                break 'units;
            }
            if let Some(last) = last_send {
                let elapsed = last.elapsed();
                if elapsed < ctx.policy.request_delay {
                    tokio::select! {
                        _ = tokio::time::sleep(ctx.policy.request_delay - elapsed) => {}
                        _ = ctx.control.aborted() => {}
                        _ = probe_stop.aborted() => {}
                    }
                    continue;
                }
            }

            let result = ctx.client.synthesize(&unit.text, &ctx.voice).await;
            last_send = Some(Instant::now());

            match result {
                Ok(audio) => {
                    output::write_unit_audio(&ctx.output_dir, &unit, &audio)
                        .await
                        .with_context(|| format!("store audio for unit {}", unit.index))?;
                    ctx.manifest
                        .mark_completed(unit.index)
                        .await
                        .with_context(|| format!("record completion of unit {}", unit.index))?;
                    budget.record_success();
                    completed += 1;
                    continue 'units;
                }
                Err(SendError::HardLimit) => {
                    let threshold = budget.checkpoint_threshold();
                    let since = budget.requests_since_checkpoint();
                    if since + policy.hard_limit_slack < threshold {
                        tracing::warn!(
                            worker = worker_id,
                            since_checkpoint = since,
                            threshold,
                            "hard limit well below session threshold; limit is shared"
                        );
                        shared_limit.store(true, Ordering::SeqCst);
                        probe_stop.abort();
                        break 'units;
                    }
                    // The session legitimately ran out; clear it and retry
                    // the same unit.
                    let stats = CheckpointStats {
                        requests_since_checkpoint: since,
                        total_requests: budget.total_requests(),
                        completed_units: completed,
                        assigned_units: assigned,
                    };
                    tokio::select! {
                        cleared = ctx.gate.wait_for_clearance(worker_id, stats) => {
                            cleared.context("probe checkpoint clearance")?;
                            budget.record_checkpoint_completed();
                        }
                        _ = ctx.control.aborted() => {}
                        _ = probe_stop.aborted() => {}
                    }
                }
                Err(SendError::Transient(msg)) => {
                    match ctx.policy.retry.decide(attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            attempt += 1;
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = ctx.control.aborted() => {}
                                _ = probe_stop.aborted() => {}
                            }
                        }
                        RetryDecision::NoRetry => {
                            tracing::warn!(worker = worker_id, unit = unit.index, error = %msg, "probe unit failed");
                            ctx.manifest
                                .mark_failed(unit.index)
                                .await
                                .with_context(|| format!("record failure of unit {}", unit.index))?;
                            continue 'units;
                        }
                    }
                }
            }
        }
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::RunManifest;
    use crate::retry::RetryPolicy;
    use crate::worker::WorkerPolicy;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Succeeds until `limit_after` calls, then signals the hard limit.
    struct LimitAfter {
        calls: AtomicU32,
        limit_after: u32,
    }

    impl TtsClient for LimitAfter {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>, SendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.limit_after > 0 && n >= self.limit_after {
                Err(SendError::HardLimit)
            } else {
                Ok(b"audio".to_vec())
            }
        }
    }

    struct AutoGate;
    impl CheckpointGate for AutoGate {
        async fn wait_for_clearance(
            &self,
            _worker: WorkerId,
            _stats: CheckpointStats,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn units(n: usize) -> Vec<WorkUnit> {
        (0..n)
            .map(|i| WorkUnit {
                index: i,
                group_id: "01-test".into(),
                text: format!("unit {}", i),
            })
            .collect()
    }

    async fn ctx(
        dir: &tempfile::TempDir,
        total: usize,
        client: LimitAfter,
    ) -> WorkerContext<LimitAfter, AutoGate> {
        let manifest = RunManifest::open_or_init(dir.path(), total).await.unwrap();
        WorkerContext {
            client: Arc::new(client),
            gate: Arc::new(AutoGate),
            manifest,
            control: RunControl::new(),
            output_dir: dir.path().to_path_buf(),
            voice: "v".into(),
            policy: WorkerPolicy {
                checkpoint_threshold: 55,
                request_delay: Duration::ZERO,
                retry: RetryPolicy {
                    max_attempts: 3,
                    backoff: Duration::ZERO,
                },
            },
        }
    }

    #[tokio::test]
    async fn clean_run_is_safe_and_counts_as_progress() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(30);
        let ctx = ctx(
            &dir,
            30,
            LimitAfter {
                calls: AtomicU32::new(0),
                limit_after: 0,
            },
        )
        .await;
        let manifest = ctx.manifest.clone();

        let report = run_safety_probe(
            &all,
            ctx,
            ProbePolicy {
                workers: 2,
                units: 20,
                hard_limit_slack: 5,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.verdict, ProbeVerdict::Safe);
        assert_eq!(report.completed, 20);
        assert_eq!(manifest.completed_indices().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn early_hard_limit_means_shared_limit() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(40);
        // Limit trips on the 7th call overall: both workers are far below
        // the 55-request session threshold, so the limit must be shared.
        let ctx = ctx(
            &dir,
            40,
            LimitAfter {
                calls: AtomicU32::new(0),
                limit_after: 6,
            },
        )
        .await;

        let report = run_safety_probe(
            &all,
            ctx,
            ProbePolicy {
                workers: 2,
                units: 40,
                hard_limit_slack: 5,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.verdict, ProbeVerdict::SharedLimit);
        assert!(report.completed < 40);
    }

    #[tokio::test]
    async fn tiny_inputs_cannot_be_probed() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(4);
        let ctx = ctx(
            &dir,
            4,
            LimitAfter {
                calls: AtomicU32::new(0),
                limit_after: 0,
            },
        )
        .await;

        let report = run_safety_probe(&all, ctx, ProbePolicy::default())
            .await
            .unwrap();
        assert_eq!(report.verdict, ProbeVerdict::Failed);
        assert!(report.detail.is_some());
    }
}
