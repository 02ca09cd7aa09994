//! Manifest database handle: connection, migration, timestamps.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::ManifestError;

/// File name of the manifest inside a run directory.
const MANIFEST_FILE: &str = "manifest.db";

/// Path of the manifest database for a run directory.
pub fn manifest_path(run_dir: &Path) -> PathBuf {
    run_dir.join(MANIFEST_FILE)
}

/// Percent-encode a path for a sqlite:// URI so spaces and special chars
/// don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to one run's manifest database. Cheap to clone; every worker holds
/// a clone and performs fine-grained per-index updates through the shared
/// pool.
#[derive(Clone)]
pub struct RunManifest {
    pub(crate) pool: Pool<Sqlite>,
}

impl RunManifest {
    /// Open the manifest for `run_dir`, creating the database and schema on
    /// first use and registering `total_units` for the run. Reopening with a
    /// different total is corruption: the persisted state belongs to a
    /// different unit list.
    pub async fn open_or_init(run_dir: &Path, total_units: usize) -> Result<Self, ManifestError> {
        tokio::fs::create_dir_all(run_dir).await?;
        let manifest = Self::connect(&manifest_path(run_dir)).await?;
        manifest.migrate().await?;
        manifest.init_run(total_units).await?;
        Ok(manifest)
    }

    /// Open an existing manifest, or `None` when the run directory has no
    /// manifest database (first run, or artifacts produced by an older tool
    /// version); the caller falls back to an artifact scan.
    pub async fn open_existing(run_dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = manifest_path(run_dir);
        if !path.exists() {
            return Ok(None);
        }
        let manifest = Self::connect(&path).await?;
        manifest.migrate().await?;
        Ok(Some(manifest))
    }

    async fn connect(path: &Path) -> Result<Self, ManifestError> {
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        Ok(RunManifest { pool })
    }

    async fn migrate(&self) -> Result<(), ManifestError> {
        // Two-table schema: a singleton run row plus one row per unit that
        // has reached a terminal state. Missing units have no row.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_units INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS units (
                idx INTEGER PRIMARY KEY,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    /// In-memory manifest for tests (single connection: each sqlite
    /// `:memory:` connection is its own database).
    pub(crate) async fn open_memory(total_units: usize) -> Result<Self, ManifestError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let manifest = RunManifest { pool };
        manifest.migrate().await?;
        manifest.init_run(total_units).await?;
        Ok(manifest)
    }
}

/// Current time as Unix seconds, for row timestamps.
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
