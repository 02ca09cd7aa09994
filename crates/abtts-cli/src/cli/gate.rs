//! Interactive checkpoint gate: a stdin prompt identifying the paused
//! worker session.
//!
//! Prompts are serialized through a mutex so two workers pausing at once
//! never interleave their banners; each waiting worker gets its own Enter.

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use abtts_core::checkpoint::{CheckpointGate, CheckpointStats};
use abtts_core::distributor::WorkerId;

pub struct StdinCheckpointGate {
    prompt_lock: Mutex<()>,
}

impl StdinCheckpointGate {
    pub fn new() -> Self {
        Self {
            prompt_lock: Mutex::new(()),
        }
    }
}

impl CheckpointGate for StdinCheckpointGate {
    async fn wait_for_clearance(&self, worker: WorkerId, stats: CheckpointStats) -> Result<()> {
        let _guard = self.prompt_lock.lock().await;

        println!();
        println!("{}", "=".repeat(60));
        println!("verification required for worker #{}", worker);
        println!(
            "  session requests since last verification: {}",
            stats.requests_since_checkpoint
        );
        println!("  session requests total: {}", stats.total_requests);
        println!(
            "  progress: {}/{} assigned units",
            stats.completed_units, stats.assigned_units
        );
        println!("complete the verification in worker #{}'s session,", worker);
        println!("then press Enter to continue that worker.");
        println!("{}", "=".repeat(60));

        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| ())
        })
        .await
        .context("stdin read task")?
        .context("read operator confirmation")?;

        println!("worker #{} cleared, resuming", worker);
        Ok(())
    }
}
