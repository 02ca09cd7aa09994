//! `abtts status` – show progress recorded in a run directory.

use anyhow::Result;
use std::path::Path;

use abtts_core::manifest::RunManifest;
use abtts_core::output;

pub async fn run_status(output_dir: &Path) -> Result<()> {
    match RunManifest::open_existing(output_dir).await? {
        Some(manifest) => {
            let total = manifest.total_units().await?;
            let completed = manifest.completed_indices().await?;
            let failed = manifest.failed_indices().await?;
            let missing = manifest.missing_indices().await?;

            println!("{}:", output_dir.display());
            println!("  total:     {}", total);
            println!("  completed: {}", completed.len());
            println!("  failed:    {}", failed.len());
            println!("  missing:   {}", missing.len());
            if !failed.is_empty() {
                let ids: Vec<String> = failed.iter().map(|i| i.to_string()).collect();
                println!("  failed indices: {}", ids.join(", "));
            }
            if missing.is_empty() && failed.is_empty() {
                println!("  run is complete");
            }
        }
        None => {
            let artifacts = output::scan_artifacts(output_dir).await?;
            println!("{}: no manifest", output_dir.display());
            println!("  completed artifacts on disk: {}", artifacts.len());
        }
    }
    Ok(())
}
