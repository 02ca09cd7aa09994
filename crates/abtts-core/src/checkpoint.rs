//! Verification checkpoint gate.
//!
//! When a worker's budget trips (or the remote signals the hard limit
//! early), the worker suspends on this gate until a human completes the
//! verification action for that specific session. The gate blocks only the
//! requesting worker; the caller races the returned future against the
//! run-abort signal.

use std::future::Future;

use crate::distributor::WorkerId;

/// Session counters surfaced alongside a checkpoint request so the operator
/// can tell concurrent sessions apart.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointStats {
    pub requests_since_checkpoint: u32,
    pub total_requests: u64,
    pub completed_units: usize,
    pub assigned_units: usize,
}

/// Human-mediated clearance for one worker's verification pause.
pub trait CheckpointGate: Send + Sync + 'static {
    /// Resolve once the operator has completed the verification action for
    /// `worker`. An error is treated as fatal for that worker only.
    fn wait_for_clearance(
        &self,
        worker: WorkerId,
        stats: CheckpointStats,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}
