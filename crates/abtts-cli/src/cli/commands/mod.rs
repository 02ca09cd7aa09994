//! CLI command implementations.

mod plan;
mod probe;
mod run;
mod status;

pub use plan::run_plan;
pub use probe::run_probe;
pub use run::{run_convert, RunArgs};
pub use status::run_status;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use abtts_core::config::AbttsConfig;
use abtts_core::control::RunControl;
use abtts_core::manifest::RunManifest;
use abtts_core::worker::WorkerContext;

use super::gate::StdinCheckpointGate;
use super::http::HttpTtsClient;

/// Per-request wall-clock limit for the HTTP client.
const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Parse the `--workers` flag: "auto" or an explicit count.
pub(crate) fn parse_workers(s: &str) -> Result<Option<usize>> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    let n: usize = s
        .parse()
        .with_context(|| format!("--workers must be a number or 'auto', got '{}'", s))?;
    anyhow::ensure!(n >= 1, "--workers must be at least 1");
    Ok(Some(n))
}

/// Build the worker context shared by the run and probe commands: resolve
/// endpoint and voice (flags win over config), open the manifest, wire the
/// HTTP client and the interactive gate.
pub(crate) async fn build_context(
    cfg: &AbttsConfig,
    output_dir: &Path,
    total_units: usize,
    voice_flag: Option<String>,
    service_url_flag: Option<String>,
) -> Result<WorkerContext<HttpTtsClient, StdinCheckpointGate>> {
    let mut cfg = cfg.clone();
    if let Some(url) = service_url_flag {
        cfg.service_url = Some(url);
    }
    let endpoint = cfg.service_endpoint()?;
    let voice = voice_flag
        .or_else(|| cfg.default_voice.clone())
        .context("no voice selected (pass --voice or set default_voice in config)")?;

    let manifest = RunManifest::open_or_init(output_dir, total_units)
        .await
        .context("open run manifest")?;

    Ok(WorkerContext {
        client: Arc::new(HttpTtsClient::new(endpoint.as_str(), SEND_TIMEOUT)),
        gate: Arc::new(StdinCheckpointGate::new()),
        manifest,
        control: RunControl::new(),
        output_dir: output_dir.to_path_buf(),
        voice,
        policy: cfg.worker_policy(),
    })
}
