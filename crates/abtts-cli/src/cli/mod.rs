//! CLI for the abtts parallel text-to-speech converter.

mod commands;
mod gate;
mod http;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use abtts_core::config;

use commands::{run_convert, run_plan, run_probe, run_status, RunArgs};

/// Top-level CLI for the abtts converter.
#[derive(Debug, Parser)]
#[command(name = "abtts")]
#[command(about = "abtts: resumable parallel text-to-speech batch converter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Convert a work-unit file to audio, resuming any previous progress in
    /// the output directory.
    Run {
        /// Work-unit file produced by the chunking stage (JSON array of
        /// {index, group, text}).
        units: PathBuf,

        /// Run directory for artifacts and the manifest.
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Voice identifier (falls back to default_voice from config).
        #[arg(long)]
        voice: Option<String>,

        /// TTS service endpoint (falls back to service_url from config).
        #[arg(long)]
        service_url: Option<String>,

        /// Worker session count, or "auto" to size from the checkpoint
        /// threshold.
        #[arg(long, default_value = "auto")]
        workers: String,

        /// Requests per session before a proactive verification pause.
        #[arg(long)]
        checkpoint_threshold: Option<u32>,

        /// Worker start strategy: simultaneous, staggered, or batched.
        #[arg(long)]
        strategy: Option<String>,

        /// Skip the pre-flight safety probe before a multi-worker run.
        #[arg(long)]
        skip_probe: bool,

        /// Discard all recorded progress (including a corrupt manifest) and
        /// convert every unit again.
        #[arg(long)]
        force_restart: bool,
    },

    /// Show what a run would do: resume analysis and worker partition,
    /// without sending anything.
    Plan {
        /// Work-unit file produced by the chunking stage.
        units: PathBuf,

        /// Run directory for artifacts and the manifest.
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Worker session count, or "auto".
        #[arg(long, default_value = "auto")]
        workers: String,
    },

    /// Run only the safety probe against the remote service.
    Probe {
        /// Work-unit file produced by the chunking stage.
        units: PathBuf,

        /// Run directory for artifacts and the manifest.
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Voice identifier (falls back to default_voice from config).
        #[arg(long)]
        voice: Option<String>,

        /// TTS service endpoint (falls back to service_url from config).
        #[arg(long)]
        service_url: Option<String>,
    },

    /// Show progress recorded in a run directory.
    Status {
        /// Run directory.
        output_dir: PathBuf,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run {
                units,
                output_dir,
                voice,
                service_url,
                workers,
                checkpoint_threshold,
                strategy,
                skip_probe,
                force_restart,
            } => {
                run_convert(
                    cfg,
                    RunArgs {
                        units,
                        output_dir,
                        voice,
                        service_url,
                        workers,
                        checkpoint_threshold,
                        strategy,
                        skip_probe,
                        force_restart,
                    },
                )
                .await?
            }
            CliCommand::Plan {
                units,
                output_dir,
                workers,
            } => run_plan(&cfg, &units, &output_dir, &workers).await?,
            CliCommand::Probe {
                units,
                output_dir,
                voice,
                service_url,
            } => run_probe(cfg, &units, &output_dir, voice, service_url).await?,
            CliCommand::Status { output_dir } => run_status(&output_dir).await?,
        }

        Ok(())
    }
}
