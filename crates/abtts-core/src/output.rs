//! Artifact storage: atomic writes and completed-artifact scanning.
//!
//! Audio is written to a `.part` temp name and renamed into place, so a crash
//! mid-write never leaves a plausible-looking truncated artifact for the
//! resume scan to count as complete.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::unit::{parse_artifact_index, WorkUnit};

/// Temp-file name used while an artifact is being written.
fn part_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".part");
    final_path.with_file_name(name)
}

/// Write one unit's audio under `output_dir`, creating the group directory
/// as needed. Returns the final artifact path.
pub async fn write_unit_audio(
    output_dir: &Path,
    unit: &WorkUnit,
    audio: &[u8],
) -> Result<PathBuf> {
    let final_path = output_dir.join(unit.output_rel_path());
    let parent = final_path
        .parent()
        .context("artifact path has no parent directory")?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create group dir: {}", parent.display()))?;

    let tmp = part_path(&final_path);
    tokio::fs::write(&tmp, audio)
        .await
        .with_context(|| format!("write artifact temp: {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &final_path)
        .await
        .with_context(|| format!("finalize artifact: {}", final_path.display()))?;
    Ok(final_path)
}

/// Scan a run directory for completed artifacts and return their unit
/// indices. Empty files and `.part` leftovers are ignored. Used as the
/// resume fallback when no manifest exists.
pub async fn scan_artifacts(output_dir: &Path) -> Result<BTreeSet<usize>> {
    let mut completed = BTreeSet::new();
    let mut top = match tokio::fs::read_dir(output_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(completed),
        Err(e) => {
            return Err(e).with_context(|| format!("read output dir: {}", output_dir.display()))
        }
    };

    while let Some(entry) = top.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let mut group = tokio::fs::read_dir(entry.path()).await?;
        while let Some(file) = group.next_entry().await? {
            let name = file.file_name();
            let Some(index) = parse_artifact_index(&name.to_string_lossy()) else {
                continue;
            };
            let meta = file.metadata().await?;
            if meta.is_file() && meta.len() > 0 {
                completed.insert(index);
            }
        }
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(index: usize, group: &str) -> WorkUnit {
        WorkUnit {
            index,
            group_id: group.into(),
            text: "t".into(),
        }
    }

    #[tokio::test]
    async fn write_then_scan_recovers_indices() {
        let dir = tempfile::tempdir().unwrap();
        write_unit_audio(dir.path(), &unit(0, "01-intro"), b"audio0")
            .await
            .unwrap();
        write_unit_audio(dir.path(), &unit(5, "02-body"), b"audio5")
            .await
            .unwrap();

        let found = scan_artifacts(dir.path()).await.unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![0, 5]);
    }

    #[tokio::test]
    async fn empty_and_partial_files_are_not_complete() {
        let dir = tempfile::tempdir().unwrap();
        let group = dir.path().join("01-intro");
        tokio::fs::create_dir_all(&group).await.unwrap();
        tokio::fs::write(group.join("chunk-00001.mp3"), b"")
            .await
            .unwrap();
        tokio::fs::write(group.join("chunk-00002.mp3.part"), b"half")
            .await
            .unwrap();

        let found = scan_artifacts(dir.path()).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn missing_output_dir_is_empty_scan() {
        let dir = tempfile::tempdir().unwrap();
        let nonexistent = dir.path().join("nope");
        let found = scan_artifacts(&nonexistent).await.unwrap();
        assert!(found.is_empty());
    }
}
