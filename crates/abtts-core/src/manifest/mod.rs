//! Durable run manifest (SQLite via sqlx).
//!
//! One database per run directory records which unit indices have completed
//! or permanently failed; indices with no row are missing. That gives the
//! manifest invariant (completed, failed, and missing partition
//! `{0..total-1}`) by construction, and per-index upserts make concurrent
//! writes from multiple workers safe without any whole-file rewrite.

mod db;
mod ops;
#[cfg(test)]
mod tests;

pub use db::{manifest_path, RunManifest};

/// Terminal state of one unit as recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Completed,
    Failed,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Completed => "completed",
            UnitState::Failed => "failed",
        }
    }
}

/// Manifest access errors. `Corrupt` is fatal for resume purposes only: a
/// fresh run can always proceed by treating every unit as missing.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest database: {0}")]
    Db(#[from] sqlx::Error),

    #[error("manifest corrupt: {0}")]
    Corrupt(String),

    #[error("manifest io: {0}")]
    Io(#[from] std::io::Error),
}
