//! Manifest read/write operations.

use sqlx::Row;
use std::collections::BTreeSet;

use super::db::{unix_timestamp, RunManifest};
use super::{ManifestError, UnitState};

impl RunManifest {
    /// Register the run's total unit count, or verify it on reopen.
    pub(crate) async fn init_run(&self, total_units: usize) -> Result<(), ManifestError> {
        let now = unix_timestamp();
        match self.read_total().await? {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO run (id, total_units, created_at, updated_at)
                    VALUES (1, ?1, ?2, ?2)
                    "#,
                )
                .bind(total_units as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            Some(existing) if existing == total_units => Ok(()),
            Some(existing) => Err(ManifestError::Corrupt(format!(
                "manifest records {} total units but the run has {}",
                existing, total_units
            ))),
        }
    }

    async fn read_total(&self) -> Result<Option<usize>, ManifestError> {
        let row = sqlx::query("SELECT total_units FROM run WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("total_units") as usize))
    }

    /// Total unit count recorded for this run. A manifest without a run row
    /// is corrupt (the file exists but was never initialized).
    pub async fn total_units(&self) -> Result<usize, ManifestError> {
        self.read_total()
            .await?
            .ok_or_else(|| ManifestError::Corrupt("manifest has no run record".into()))
    }

    /// Record a unit as completed. Overwrites an earlier `failed` mark (a
    /// resume run may have succeeded where an earlier run gave up).
    pub async fn mark_completed(&self, index: usize) -> Result<(), ManifestError> {
        self.upsert(index, UnitState::Completed).await
    }

    /// Record a unit as permanently failed. Never downgrades a `completed`
    /// row: completion is terminal.
    pub async fn mark_failed(&self, index: usize) -> Result<(), ManifestError> {
        self.upsert(index, UnitState::Failed).await
    }

    async fn upsert(&self, index: usize, state: UnitState) -> Result<(), ManifestError> {
        let now = unix_timestamp();
        match state {
            UnitState::Completed => {
                sqlx::query(
                    r#"
                    INSERT INTO units (idx, state, attempts, updated_at)
                    VALUES (?1, 'completed', 1, ?2)
                    ON CONFLICT(idx) DO UPDATE SET
                        state = 'completed',
                        attempts = units.attempts + 1,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(index as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            UnitState::Failed => {
                sqlx::query(
                    r#"
                    INSERT INTO units (idx, state, attempts, updated_at)
                    VALUES (?1, 'failed', 1, ?2)
                    ON CONFLICT(idx) DO UPDATE SET
                        state = 'failed',
                        attempts = units.attempts + 1,
                        updated_at = excluded.updated_at
                    WHERE units.state != 'completed'
                    "#,
                )
                .bind(index as i64)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Indices recorded as completed.
    pub async fn completed_indices(&self) -> Result<BTreeSet<usize>, ManifestError> {
        self.indices_in_state(UnitState::Completed).await
    }

    /// Indices recorded as permanently failed.
    pub async fn failed_indices(&self) -> Result<BTreeSet<usize>, ManifestError> {
        self.indices_in_state(UnitState::Failed).await
    }

    async fn indices_in_state(&self, state: UnitState) -> Result<BTreeSet<usize>, ManifestError> {
        let total = self.total_units().await?;
        let rows = sqlx::query("SELECT idx FROM units WHERE state = ?1 ORDER BY idx ASC")
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;
        let mut out = BTreeSet::new();
        for row in rows {
            let idx = row.get::<i64, _>("idx");
            if idx < 0 || idx as usize >= total {
                return Err(ManifestError::Corrupt(format!(
                    "unit index {} outside 0..{}",
                    idx, total
                )));
            }
            out.insert(idx as usize);
        }
        Ok(out)
    }

    /// Indices with no terminal record: `{0..total-1}` minus completed and
    /// failed.
    pub async fn missing_indices(&self) -> Result<BTreeSet<usize>, ManifestError> {
        let total = self.total_units().await?;
        let completed = self.completed_indices().await?;
        let failed = self.failed_indices().await?;
        Ok((0..total)
            .filter(|i| !completed.contains(i) && !failed.contains(i))
            .collect())
    }
}
