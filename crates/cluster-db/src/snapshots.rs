//! Versioned canvas snapshot repository.
//!
//! Version numbers are allocated as `max + 1` within the `(org, study)` scope
//! (a `NULL` study is its own scope). Writers to one scope are serialized by a
//! transaction-scoped advisory lock taken before the `max` read. The unique
//! index `canvas_snapshots_scope_version_key` stays as a backstop; a collision
//! is retried with a fresh read.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cluster_core::{
    defaults, new_v7, CanvasSnapshot, CanvasSnapshotSummary, CreateSnapshotRequest, Error,
    OrgContext, Result, SnapshotRepository,
};

use crate::studies::ensure_study_in_org;

const VERSION_CONSTRAINT: &str = "canvas_snapshots_scope_version_key";

const SUMMARY_COLUMNS: &str =
    "id, study_id, name, description, version_number, created_by, created_at";

fn snapshot_from_row(r: &PgRow) -> CanvasSnapshot {
    CanvasSnapshot {
        id: r.get("id"),
        org_id: r.get("org_id"),
        study_id: r.get("study_id"),
        name: r.get("name"),
        description: r.get("description"),
        version_number: r.get("version_number"),
        canvas_state: r.get("canvas_state"),
        created_by: r.get("created_by"),
        created_at: r.get("created_at"),
    }
}

fn summary_from_row(r: &PgRow) -> CanvasSnapshotSummary {
    CanvasSnapshotSummary {
        id: r.get("id"),
        study_id: r.get("study_id"),
        name: r.get("name"),
        description: r.get("description"),
        version_number: r.get("version_number"),
        created_by: r.get("created_by"),
        created_at: r.get("created_at"),
    }
}

/// True when `err` is the scope/version uniqueness violation.
fn is_version_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.constraint() == Some(VERSION_CONSTRAINT)
        }
        _ => false,
    }
}

/// PostgreSQL implementation of SnapshotRepository.
pub struct PgSnapshotRepository {
    pool: Pool<Postgres>,
}

impl PgSnapshotRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn try_insert(
        &self,
        ctx: &OrgContext,
        req: &CreateSnapshotRequest,
    ) -> std::result::Result<CanvasSnapshot, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "SELECT pg_advisory_xact_lock(hashtextextended($1 || ':' || COALESCE($2, ''), 0))",
        )
        .bind(ctx.org_id.to_string())
        .bind(req.study_id.map(|s| s.to_string()))
        .execute(&mut *tx)
        .await?;

        let next: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM canvas_snapshots
             WHERE org_id = $1 AND study_id IS NOT DISTINCT FROM $2",
        )
        .bind(ctx.org_id)
        .bind(req.study_id)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO canvas_snapshots
                (id, org_id, study_id, name, description, version_number,
                 canvas_state, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, org_id, study_id, name, description, version_number,
                      canvas_state, created_by, created_at
            "#,
        )
        .bind(new_v7())
        .bind(ctx.org_id)
        .bind(req.study_id)
        .bind(req.name.trim())
        .bind(req.description.as_deref())
        .bind(next)
        .bind(&req.canvas_state)
        .bind(ctx.user_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(snapshot_from_row(&row))
    }
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    async fn create(&self, ctx: &OrgContext, req: CreateSnapshotRequest) -> Result<CanvasSnapshot> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("snapshot name is required".to_string()));
        }
        ensure_study_in_org(&self.pool, ctx.org_id, req.study_id).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_insert(ctx, &req).await {
                Ok(snapshot) => {
                    info!(
                        subsystem = "canvas",
                        component = "snapshots",
                        op = "create",
                        org_id = %ctx.org_id,
                        snapshot_id = %snapshot.id,
                        version = snapshot.version_number,
                        attempt,
                        "Created canvas snapshot"
                    );
                    return Ok(snapshot);
                }
                Err(e) if is_version_collision(&e) && attempt < defaults::SNAPSHOT_VERSION_RETRIES => {
                    debug!(
                        subsystem = "canvas",
                        component = "snapshots",
                        op = "create",
                        org_id = %ctx.org_id,
                        attempt,
                        "Snapshot version taken by a concurrent writer, retrying"
                    );
                }
                Err(e) if is_version_collision(&e) => {
                    warn!(
                        subsystem = "canvas",
                        component = "snapshots",
                        op = "create",
                        org_id = %ctx.org_id,
                        attempt,
                        "Gave up allocating a snapshot version"
                    );
                    return Err(Error::Conflict(
                        "could not allocate a snapshot version under contention".to_string(),
                    ));
                }
                Err(e) => return Err(Error::Database(e)),
            }
        }
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> Result<CanvasSnapshot> {
        let row = sqlx::query(
            "SELECT id, org_id, study_id, name, description, version_number,
                    canvas_state, created_by, created_at
             FROM canvas_snapshots WHERE id = $1 AND org_id = $2",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::SnapshotNotFound(id))?;

        Ok(snapshot_from_row(&row))
    }

    async fn list(
        &self,
        org_id: Uuid,
        study_id: Option<Uuid>,
    ) -> Result<Vec<CanvasSnapshotSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM canvas_snapshots
             WHERE org_id = $1 AND study_id IS NOT DISTINCT FROM $2
             ORDER BY version_number DESC",
            SUMMARY_COLUMNS
        ))
        .bind(org_id)
        .bind(study_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "canvas",
            component = "snapshots",
            op = "list",
            org_id = %org_id,
            result_count = rows.len(),
            "Listed canvas snapshots"
        );
        Ok(rows.iter().map(summary_from_row).collect())
    }

    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM canvas_snapshots WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::SnapshotNotFound(id));
        }
        info!(
            subsystem = "canvas",
            component = "snapshots",
            op = "delete",
            snapshot_id = %id,
            "Deleted canvas snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_collisions() {
        assert!(!is_version_collision(&sqlx::Error::RowNotFound));
        assert!(!is_version_collision(&sqlx::Error::PoolTimedOut));
    }
}
