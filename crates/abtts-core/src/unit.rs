//! Work units: one atomic piece of input text and its target output slot.
//!
//! Units come from an external chunking stage as a JSON array. Indices are
//! global, dense over `0..N-1`, and define the final assembly order no matter
//! which worker produces which artifact.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One chunk of text to synthesize. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Global ordinal, unique and dense over the whole document.
    pub index: usize,
    /// Identifier of the containing logical group (e.g. "03-chapter-three").
    pub group_id: String,
    /// Text payload to send to the TTS service.
    pub text: String,
}

impl WorkUnit {
    /// Artifact path relative to the run's output directory.
    ///
    /// Deterministic in `(group_id, index)` so resume cycles and the later
    /// packaging stage always agree on names.
    pub fn output_rel_path(&self) -> PathBuf {
        Path::new(&self.group_id).join(artifact_file_name(self.index))
    }
}

/// File name for the artifact of unit `index` within its group directory.
pub fn artifact_file_name(index: usize) -> String {
    format!("chunk-{:05}.mp3", index)
}

/// Recover a unit index from an artifact file name, or None if the name does
/// not match the expected pattern. Used by the directory-scan resume path.
pub fn parse_artifact_index(file_name: &str) -> Option<usize> {
    let stem = file_name.strip_prefix("chunk-")?.strip_suffix(".mp3")?;
    stem.parse().ok()
}

/// On-disk shape of one unit in the chunker's output file.
#[derive(Debug, Deserialize)]
struct RawUnit {
    index: usize,
    group: String,
    text: String,
}

/// Load and validate the chunker's work-unit file.
///
/// The input contract requires indices to be dense over `0..N-1` and to appear
/// in order; anything else is an input error, not something to repair here.
pub fn load_work_units(path: &Path) -> Result<Vec<WorkUnit>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("read work units: {}", path.display()))?;
    let raw: Vec<RawUnit> = serde_json::from_str(&data)
        .with_context(|| format!("parse work units: {}", path.display()))?;
    validate_units(&raw)?;
    Ok(raw
        .into_iter()
        .map(|r| WorkUnit {
            index: r.index,
            group_id: r.group,
            text: r.text,
        })
        .collect())
}

fn validate_units(units: &[RawUnit]) -> Result<()> {
    for (pos, u) in units.iter().enumerate() {
        if u.index != pos {
            anyhow::bail!(
                "work unit at position {} has index {} (indices must be dense and ordered over 0..{})",
                pos,
                u.index,
                units.len()
            );
        }
        if u.text.is_empty() {
            anyhow::bail!("work unit {} has empty text", u.index);
        }
    }
    Ok(())
}
