//! `abtts probe` – run only the pre-flight safety probe.

use anyhow::Result;
use std::path::Path;

use abtts_core::config::AbttsConfig;
use abtts_core::probe::{run_safety_probe, ProbeVerdict};
use abtts_core::resume;
use abtts_core::unit;

use super::build_context;

pub async fn run_probe(
    cfg: AbttsConfig,
    units_path: &Path,
    output_dir: &Path,
    voice: Option<String>,
    service_url: Option<String>,
) -> Result<()> {
    let units = unit::load_work_units(units_path)?;
    let plan = resume::plan_run(&units, output_dir).await?;
    if plan.is_complete() {
        println!("nothing to probe: the run is already complete");
        return Ok(());
    }

    let ctx = build_context(&cfg, output_dir, units.len(), voice, service_url).await?;
    let report = run_safety_probe(&plan.missing, ctx, cfg.probe_policy()).await?;

    println!(
        "probe attempted {} unit(s), completed {}",
        report.attempted, report.completed
    );
    match report.verdict {
        ProbeVerdict::Safe => {
            println!("verdict: safe: no evidence of a limit above the session level");
        }
        ProbeVerdict::SharedLimit => {
            println!("verdict: shared limit: the remote limits above the session level;");
            println!("run with --workers 1");
        }
        ProbeVerdict::Failed => {
            println!(
                "verdict: failed: {}",
                report.detail.as_deref().unwrap_or("worker error")
            );
            println!("parallelism unproven; run with --workers 1");
        }
    }
    Ok(())
}
