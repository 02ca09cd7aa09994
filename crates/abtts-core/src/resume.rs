//! Resume planning: reconcile durable state with the full work-unit list.
//!
//! The manifest is authoritative when present; without one (first run, or
//! output produced before the manifest existed) the plan falls back to
//! scanning the output directory for completed artifacts. Previously failed
//! units have no artifact and are retried: the continuation set is
//! `{0..N-1} \ completed`, with original indices preserved so output keys and
//! final assembly order never change across resume cycles.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

use crate::manifest::{ManifestError, RunManifest};
use crate::output;
use crate::unit::WorkUnit;

/// Where the completed-set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// A manifest database was found and read.
    Manifest,
    /// No manifest; completed units were recovered from artifacts on disk.
    ArtifactScan,
    /// Forced restart: prior state deliberately discarded.
    Fresh,
}

/// The exact work remaining for a fresh or continued run.
#[derive(Debug)]
pub struct ResumePlan {
    pub total_units: usize,
    pub completed: BTreeSet<usize>,
    /// Units recorded as permanently failed by an earlier run. They are
    /// included in `missing` (retried); listed here for operator reporting.
    pub previously_failed: BTreeSet<usize>,
    /// Units still to run, in original document order.
    pub missing: Vec<WorkUnit>,
    pub source: PlanSource,
}

impl ResumePlan {
    /// True when there is nothing left to send.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing_indices(&self) -> BTreeSet<usize> {
        self.missing.iter().map(|u| u.index).collect()
    }
}

/// Plan that ignores all prior state: every unit is missing. Used for a
/// forced restart, which is also the escape hatch from a corrupt manifest.
pub fn plan_fresh(units: &[WorkUnit]) -> ResumePlan {
    ResumePlan {
        total_units: units.len(),
        completed: BTreeSet::new(),
        previously_failed: BTreeSet::new(),
        missing: units.to_vec(),
        source: PlanSource::Fresh,
    }
}

/// Compute the plan for running `units` against `run_dir`.
///
/// Manifest corruption is fatal here (the operator must decide whether to
/// discard the directory and start fresh); it surfaces as a
/// [`ManifestError::Corrupt`] in the error chain.
pub async fn plan_run(units: &[WorkUnit], run_dir: &Path) -> Result<ResumePlan> {
    let (completed, previously_failed, source) =
        match RunManifest::open_existing(run_dir).await? {
            Some(manifest) => {
                let total = manifest.total_units().await?;
                if total != units.len() {
                    return Err(ManifestError::Corrupt(format!(
                        "manifest in {} records {} units but the input has {}",
                        run_dir.display(),
                        total,
                        units.len()
                    ))
                    .into());
                }
                (
                    manifest.completed_indices().await?,
                    manifest.failed_indices().await?,
                    PlanSource::Manifest,
                )
            }
            None => {
                let mut scanned = output::scan_artifacts(run_dir)
                    .await
                    .context("scan output directory for artifacts")?;
                let stray: Vec<usize> = scanned.iter().copied().filter(|&i| i >= units.len()).collect();
                if !stray.is_empty() {
                    tracing::warn!(
                        count = stray.len(),
                        "ignoring artifacts with indices outside the unit list"
                    );
                    for i in stray {
                        scanned.remove(&i);
                    }
                }
                (scanned, BTreeSet::new(), PlanSource::ArtifactScan)
            }
        };

    let missing: Vec<WorkUnit> = units
        .iter()
        .filter(|u| !completed.contains(&u.index))
        .cloned()
        .collect();

    Ok(ResumePlan {
        total_units: units.len(),
        completed,
        previously_failed,
        missing,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: usize) -> Vec<WorkUnit> {
        (0..n)
            .map(|i| WorkUnit {
                index: i,
                group_id: format!("{:02}-part", i / 10),
                text: format!("unit {}", i),
            })
            .collect()
    }

    #[tokio::test]
    async fn fresh_directory_plans_everything() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(8);
        let plan = plan_run(&all, dir.path()).await.unwrap();
        assert_eq!(plan.source, PlanSource::ArtifactScan);
        assert_eq!(plan.missing.len(), 8);
        assert!(!plan.is_complete());
    }

    #[tokio::test]
    async fn manifest_drives_the_missing_set() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(636);
        let manifest = RunManifest::open_or_init(dir.path(), 636).await.unwrap();
        for i in 0..120 {
            manifest.mark_completed(i).await.unwrap();
        }

        let plan = plan_run(&all, dir.path()).await.unwrap();
        assert_eq!(plan.source, PlanSource::Manifest);
        assert_eq!(plan.missing.len(), 516);
        assert_eq!(plan.missing[0].index, 120);
        assert_eq!(plan.missing.last().unwrap().index, 635);
    }

    #[tokio::test]
    async fn previously_failed_units_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(5);
        let manifest = RunManifest::open_or_init(dir.path(), 5).await.unwrap();
        manifest.mark_completed(0).await.unwrap();
        manifest.mark_failed(2).await.unwrap();

        let plan = plan_run(&all, dir.path()).await.unwrap();
        assert_eq!(
            plan.missing_indices().into_iter().collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(plan.previously_failed.contains(&2));
    }

    #[tokio::test]
    async fn planning_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(10);
        let manifest = RunManifest::open_or_init(dir.path(), 10).await.unwrap();
        for i in [0usize, 1, 4] {
            manifest.mark_completed(i).await.unwrap();
        }

        let first = plan_run(&all, dir.path()).await.unwrap();
        let second = plan_run(&all, dir.path()).await.unwrap();
        assert_eq!(first.missing_indices(), second.missing_indices());

        for u in &first.missing {
            manifest.mark_completed(u.index).await.unwrap();
        }
        let third = plan_run(&all, dir.path()).await.unwrap();
        assert!(third.is_complete());
    }

    #[tokio::test]
    async fn artifact_scan_fallback_counts_nonempty_files() {
        let dir = tempfile::tempdir().unwrap();
        let all = units(4);
        crate::output::write_unit_audio(dir.path(), &all[1], b"audio")
            .await
            .unwrap();

        let plan = plan_run(&all, dir.path()).await.unwrap();
        assert_eq!(plan.source, PlanSource::ArtifactScan);
        assert_eq!(
            plan.missing_indices().into_iter().collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
    }

    #[tokio::test]
    async fn mismatched_manifest_total_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        RunManifest::open_or_init(dir.path(), 10).await.unwrap();
        let err = plan_run(&units(12), dir.path()).await.unwrap_err();
        assert!(err
            .downcast_ref::<ManifestError>()
            .map(|e| matches!(e, ManifestError::Corrupt(_)))
            .unwrap_or(false));
    }
}
