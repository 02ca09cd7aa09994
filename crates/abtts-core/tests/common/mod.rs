//! Shared test doubles: a scripted TTS service and checkpoint gates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use abtts_core::checkpoint::{CheckpointGate, CheckpointStats};
use abtts_core::control::RunControl;
use abtts_core::distributor::WorkerId;
use abtts_core::tts::{SendError, TtsClient};
use abtts_core::unit::WorkUnit;

/// Scripted outcome for one send attempt.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Ok,
    Transient,
    HardLimit,
}

/// Mock TTS service: a per-text queue of outcomes, then success forever.
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    pub calls: AtomicU32,
    /// When set, the run is aborted after this many total calls.
    abort_after: Option<(u32, RunControl)>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<(&str, Vec<Step>)>) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|(text, steps)| (text.to_string(), steps.into_iter().collect()))
                    .collect(),
            ),
            calls: AtomicU32::new(0),
            abort_after: None,
        }
    }

    pub fn aborting_after(calls: u32, control: RunControl) -> Self {
        let mut c = Self::new(vec![]);
        c.abort_after = Some((calls, control));
        c
    }
}

impl TtsClient for ScriptedClient {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>, SendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, control)) = &self.abort_after {
            if n >= *after {
                control.abort();
            }
        }
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(text).and_then(|q| q.pop_front())
        };
        match step {
            None | Some(Step::Ok) => Ok(format!("audio:{}", text).into_bytes()),
            Some(Step::Transient) => Err(SendError::Transient("connection reset".into())),
            Some(Step::HardLimit) => Err(SendError::HardLimit),
        }
    }
}

/// Gate that clears instantly and counts clearances.
pub struct AutoGate {
    pub clearances: AtomicU32,
}

impl AutoGate {
    pub fn new() -> Self {
        Self {
            clearances: AtomicU32::new(0),
        }
    }
}

impl CheckpointGate for AutoGate {
    async fn wait_for_clearance(
        &self,
        _worker: WorkerId,
        _stats: CheckpointStats,
    ) -> anyhow::Result<()> {
        self.clearances.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Gate that fails clearance for one specific worker and clears instantly
/// for every other.
pub struct BrokenGateFor {
    pub worker: WorkerId,
}

impl CheckpointGate for BrokenGateFor {
    async fn wait_for_clearance(
        &self,
        worker: WorkerId,
        _stats: CheckpointStats,
    ) -> anyhow::Result<()> {
        if worker == self.worker {
            anyhow::bail!("operator unavailable for worker {}", worker)
        }
        Ok(())
    }
}

pub fn make_units(n: usize) -> Vec<WorkUnit> {
    (0..n)
        .map(|i| WorkUnit {
            index: i,
            group_id: format!("{:02}-chapter", i / 10),
            text: format!("unit {}", i),
        })
        .collect()
}
