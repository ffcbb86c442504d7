//! File view tracking and recent activity.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};

use cluster_core::{
    defaults, new_v7, ActivityRepository, Error, FileMetadata, FileRefResolver, FileView,
    OrgContext, RecentActivity, Result, StorageProviderKind,
};

use crate::file_refs::{file_summary_from_row, PgFileRefResolver};

/// PostgreSQL implementation of ActivityRepository.
pub struct PgActivityRepository {
    pool: Pool<Postgres>,
    resolver: PgFileRefResolver,
}

impl PgActivityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            resolver: PgFileRefResolver::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl ActivityRepository for PgActivityRepository {
    async fn record_file_view(
        &self,
        ctx: &OrgContext,
        provider: StorageProviderKind,
        drive_id: &str,
        item_id: &str,
        metadata: Option<&FileMetadata>,
    ) -> Result<FileView> {
        let file_ref_id = self
            .resolver
            .find_or_create(ctx.org_id, provider, drive_id, item_id, metadata)
            .await?;

        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO file_views (id, user_id, file_ref_id, viewed_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT ON CONSTRAINT file_views_user_file_key
            DO UPDATE SET viewed_at = EXCLUDED.viewed_at, updated_at = EXCLUDED.updated_at
            RETURNING id, user_id, file_ref_id, viewed_at, updated_at
            "#,
        )
        .bind(new_v7())
        .bind(ctx.user_id)
        .bind(file_ref_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "activity",
            component = "file_views",
            op = "record_view",
            org_id = %ctx.org_id,
            user_id = %ctx.user_id,
            file_ref_id = %file_ref_id,
            "Recorded file view"
        );

        Ok(FileView {
            id: row.get("id"),
            user_id: row.get("user_id"),
            file_ref_id: row.get("file_ref_id"),
            viewed_at: row.get("viewed_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn recent_activity(
        &self,
        ctx: &OrgContext,
        limit: Option<i64>,
    ) -> Result<Vec<RecentActivity>> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(defaults::RECENT_ACTIVITY_LIMIT);

        let rows = sqlx::query(
            r#"
            SELECT v.viewed_at,
                   f.id AS file_id, f.drive_id AS file_drive_id, f.item_id AS file_item_id,
                   f.name AS file_name, f.mime_type AS file_mime_type,
                   f.web_url AS file_web_url
            FROM file_views v
            JOIN file_refs f ON f.id = v.file_ref_id
            WHERE v.user_id = $1 AND f.org_id = $2
            ORDER BY v.viewed_at DESC
            LIMIT $3
            "#,
        )
        .bind(ctx.user_id)
        .bind(ctx.org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let activity: Vec<RecentActivity> = rows
            .iter()
            .filter_map(|r| {
                file_summary_from_row(r).map(|file| RecentActivity {
                    file,
                    viewed_at: r.get("viewed_at"),
                })
            })
            .collect();

        debug!(
            subsystem = "activity",
            component = "file_views",
            op = "recent",
            user_id = %ctx.user_id,
            result_count = activity.len(),
            "Loaded recent activity"
        );
        Ok(activity)
    }
}
