//! `abtts run` – convert a work-unit file, resuming previous progress.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;

use abtts_core::config::{AbttsConfig, StrategyKind};
use abtts_core::coordinator::{self, dashboard, optimal_worker_count, RunSnapshot};
use abtts_core::distributor::round_robin;
use abtts_core::probe::{run_safety_probe, ProbeVerdict};
use abtts_core::resume;
use abtts_core::unit;

use super::{build_context, parse_workers};

#[derive(Debug)]
pub struct RunArgs {
    pub units: PathBuf,
    pub output_dir: PathBuf,
    pub voice: Option<String>,
    pub service_url: Option<String>,
    pub workers: String,
    pub checkpoint_threshold: Option<u32>,
    pub strategy: Option<String>,
    pub skip_probe: bool,
    pub force_restart: bool,
}

pub async fn run_convert(mut cfg: AbttsConfig, args: RunArgs) -> Result<()> {
    if let Some(threshold) = args.checkpoint_threshold {
        cfg.checkpoint_threshold = threshold;
    }
    let workers_flag = parse_workers(&args.workers)?;
    let strategy_kind: Option<StrategyKind> = args
        .strategy
        .as_deref()
        .map(str::parse)
        .transpose()?;

    let units = unit::load_work_units(&args.units)?;
    anyhow::ensure!(!units.is_empty(), "work-unit file is empty");

    let plan = if args.force_restart {
        let manifest_file = abtts_core::manifest::manifest_path(&args.output_dir);
        match tokio::fs::remove_file(&manifest_file).await {
            Ok(()) => tracing::info!("force-restart: discarded manifest {}", manifest_file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("remove manifest for force restart"),
        }
        resume::plan_fresh(&units)
    } else {
        resume::plan_run(&units, &args.output_dir).await?
    };
    if plan.is_complete() {
        println!(
            "all {} units already completed in {}",
            plan.total_units,
            args.output_dir.display()
        );
        return Ok(());
    }
    if !plan.completed.is_empty() {
        println!(
            "resuming: {} completed, {} to go ({} previously failed will be retried)",
            plan.completed.len(),
            plan.missing.len(),
            plan.previously_failed.len()
        );
    }

    let ctx = build_context(
        &cfg,
        &args.output_dir,
        units.len(),
        args.voice,
        args.service_url,
    )
    .await?;

    // Ctrl-C aborts the run; durable state stays valid for a later resume.
    {
        let control = ctx.control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupt received, stopping workers (progress is saved)...");
                control.abort();
            }
        });
    }

    let mut worker_count = match workers_flag {
        Some(n) => n.min(cfg.max_workers.max(1)),
        None => optimal_worker_count(
            plan.missing.len(),
            cfg.target_units_per_worker(),
            cfg.max_workers,
        ),
    };

    let mut missing = plan.missing;
    if worker_count > 1 && cfg.probe_enabled() && !args.skip_probe {
        println!("running safety probe before parallel execution...");
        let report = run_safety_probe(&missing, ctx.clone(), cfg.probe_policy()).await?;
        match report.verdict {
            ProbeVerdict::Safe => {
                println!(
                    "probe passed ({} units completed); proceeding with {} workers",
                    report.completed, worker_count
                );
            }
            ProbeVerdict::SharedLimit | ProbeVerdict::Failed => {
                println!(
                    "probe did not pass ({}); falling back to a single worker",
                    report.detail.as_deref().unwrap_or("no detail")
                );
                worker_count = 1;
            }
        }
        if ctx.control.is_aborted() {
            anyhow::bail!("run aborted during the safety probe; rerun to continue");
        }
        // Probe sends were real work; replan so they are not re-sent.
        let replanned = resume::plan_run(&units, &args.output_dir).await?;
        if replanned.is_complete() {
            println!("all {} units completed during the probe", units.len());
            return Ok(());
        }
        missing = replanned.missing;
        worker_count = worker_count.min(missing.len().max(1));
    }

    let assignments = round_robin(&missing, worker_count);
    println!(
        "distributing {} units across {} worker(s) (round-robin):",
        missing.len(),
        worker_count
    );
    for a in &assignments {
        let preview: Vec<String> = a.units.iter().take(3).map(|u| u.index.to_string()).collect();
        let suffix = if a.units.len() > 3 { ", ..." } else { "" };
        println!(
            "  worker {:>2}: {} units (starting with {}{})",
            a.worker_id,
            a.units.len(),
            preview.join(", "),
            suffix
        );
    }

    let (snap_tx, mut snap_rx) = tokio::sync::mpsc::channel::<RunSnapshot>(4);
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = snap_rx.recv().await {
            // Full redraw; the dashboard owns the terminal while running.
            print!("\x1b[2J\x1b[H{}", dashboard::render(&snapshot));
            let _ = std::io::stdout().flush();
        }
    });

    let summary = coordinator::run_parallel(
        assignments,
        ctx,
        cfg.start_strategy(strategy_kind),
        Some(snap_tx),
    )
    .await
    .context("parallel run")?;

    let _ = printer.await;
    println!();
    print!("{}", dashboard::render_summary(&summary));

    if summary.aborted {
        anyhow::bail!("run aborted; rerun the same command to continue");
    }
    if !summary.is_complete() {
        anyhow::bail!(
            "run incomplete: {} unit(s) still missing; rerun the same command to continue",
            summary.missing.len()
        );
    }
    Ok(())
}
