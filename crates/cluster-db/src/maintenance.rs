//! Data repair passes run by `cluster-admin`.
//!
//! These operate across all organizations and are not part of the request
//! path.

use std::time::Instant;

use chrono::Utc;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use cluster_core::{defaults, CleanupReport, Error, Result};

pub struct PgMaintenanceRepository {
    pool: Pool<Postgres>,
}

impl PgMaintenanceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Remove placeholder file references and everything left dangling by them.
    ///
    /// Runs in one transaction. Annotations that lose their last target are
    /// soft-deleted with the same placement cleanup as a regular delete.
    pub async fn cleanup_malformed(&self) -> Result<CleanupReport> {
        let start = Instant::now();
        let mut report = CleanupReport::default();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        report.malformed_targets = sqlx::query(
            "DELETE FROM annotation_targets
             WHERE file_ref_id IN (SELECT id FROM file_refs WHERE drive_id = $1)",
        )
        .bind(defaults::PLACEHOLDER_DRIVE_ID)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let targetless: Vec<Uuid> = sqlx::query_scalar(
            "SELECT a.id FROM annotations a
             WHERE a.deleted_at IS NULL
               AND NOT EXISTS (SELECT 1 FROM annotation_targets t WHERE t.annotation_id = a.id)
             FOR UPDATE",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if !targetless.is_empty() {
            sqlx::query("DELETE FROM affinity_group_items WHERE annotation_id = ANY($1)")
                .bind(&targetless)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            report.orphan_canvas_nodes +=
                sqlx::query("DELETE FROM canvas_nodes WHERE annotation_id = ANY($1)")
                    .bind(&targetless)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::Database)?
                    .rows_affected();
            report.targetless_annotations =
                sqlx::query("UPDATE annotations SET deleted_at = $1 WHERE id = ANY($2)")
                    .bind(Utc::now())
                    .bind(&targetless)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::Database)?
                    .rows_affected();
        }

        report.orphan_tag_links = sqlx::query(
            "DELETE FROM annotation_tags t USING annotations a
             WHERE a.id = t.annotation_id AND a.deleted_at IS NOT NULL",
        )
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        report.orphan_file_views = sqlx::query(
            "DELETE FROM file_views
             WHERE file_ref_id IN (SELECT id FROM file_refs WHERE drive_id = $1)",
        )
        .bind(defaults::PLACEHOLDER_DRIVE_ID)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        report.malformed_file_refs = sqlx::query("DELETE FROM file_refs WHERE drive_id = $1")
            .bind(defaults::PLACEHOLDER_DRIVE_ID)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "maintenance",
            op = "cleanup_malformed",
            malformed_file_refs = report.malformed_file_refs,
            malformed_targets = report.malformed_targets,
            targetless_annotations = report.targetless_annotations,
            orphan_tag_links = report.orphan_tag_links,
            orphan_file_views = report.orphan_file_views,
            orphan_canvas_nodes = report.orphan_canvas_nodes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Malformed data cleanup complete"
        );
        Ok(report)
    }

    /// Delete canvas nodes whose annotation has been soft-deleted.
    pub async fn purge_orphaned_canvas_nodes(&self) -> Result<CleanupReport> {
        let removed = sqlx::query(
            "DELETE FROM canvas_nodes n USING annotations a
             WHERE a.id = n.annotation_id AND a.deleted_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        info!(
            subsystem = "maintenance",
            op = "purge_canvas_orphans",
            orphan_canvas_nodes = removed,
            "Purged orphaned canvas nodes"
        );
        Ok(CleanupReport {
            orphan_canvas_nodes: removed,
            ..Default::default()
        })
    }
}
