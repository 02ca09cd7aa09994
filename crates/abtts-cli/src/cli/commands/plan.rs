//! `abtts plan` – show resume analysis and the worker partition without
//! sending anything.

use anyhow::Result;
use std::path::Path;

use abtts_core::config::AbttsConfig;
use abtts_core::coordinator::optimal_worker_count;
use abtts_core::distributor::round_robin;
use abtts_core::resume::{self, PlanSource};
use abtts_core::unit;

use super::parse_workers;

pub async fn run_plan(
    cfg: &AbttsConfig,
    units_path: &Path,
    output_dir: &Path,
    workers: &str,
) -> Result<()> {
    let units = unit::load_work_units(units_path)?;
    let plan = resume::plan_run(&units, output_dir).await?;

    let source = match plan.source {
        PlanSource::Manifest => "manifest",
        PlanSource::ArtifactScan => "artifact scan",
        PlanSource::Fresh => "fresh",
    };
    println!("plan for {} ({} units, progress from {}):", output_dir.display(), plan.total_units, source);
    println!("  completed: {}", plan.completed.len());
    if !plan.previously_failed.is_empty() {
        let ids: Vec<String> = plan
            .previously_failed
            .iter()
            .map(|i| i.to_string())
            .collect();
        println!(
            "  previously failed (will retry): {} [{}]",
            plan.previously_failed.len(),
            ids.join(", ")
        );
    }
    println!("  to send: {}", plan.missing.len());

    if plan.is_complete() {
        println!("nothing to do: the run is complete");
        return Ok(());
    }

    let worker_count = match parse_workers(workers)? {
        Some(n) => n.min(cfg.max_workers.max(1)),
        None => optimal_worker_count(
            plan.missing.len(),
            cfg.target_units_per_worker(),
            cfg.max_workers,
        ),
    };
    println!(
        "  workers: {} (target {} units/worker, max {})",
        worker_count,
        cfg.target_units_per_worker(),
        cfg.max_workers
    );
    for a in round_robin(&plan.missing, worker_count) {
        let preview: Vec<String> = a.units.iter().take(3).map(|u| u.index.to_string()).collect();
        let suffix = if a.units.len() > 3 { ", ..." } else { "" };
        println!(
            "  worker {:>2}: {} units ({}{})",
            a.worker_id,
            a.units.len(),
            preview.join(", "),
            suffix
        );
    }
    Ok(())
}
