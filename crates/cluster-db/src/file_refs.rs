//! File reference resolution.
//!
//! Maps `(org, drive, item)` to one stable `file_refs` row. Creation is an
//! `INSERT ... ON CONFLICT DO NOTHING` followed by a fallback read, so racing
//! callers for the same triple converge on one row without a check-then-write
//! window.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cluster_core::{
    compute_content_hash, defaults, new_v7, Error, FileMetadata, FileRef, FileRefResolver,
    FileRefSummary, Result, StorageProvider, StorageProviderKind,
};

pub(crate) const FILE_REF_COLUMNS: &str = "id, org_id, study_id, provider, drive_id, item_id, \
     site_id, name, mime_type, size_bytes, web_url, content_hash, last_synced_at, \
     transcript_file_id, created_at, updated_at";

pub(crate) fn file_ref_from_row(r: &PgRow) -> Result<FileRef> {
    let provider: String = r.get("provider");
    Ok(FileRef {
        id: r.get("id"),
        org_id: r.get("org_id"),
        study_id: r.get("study_id"),
        provider: provider.parse().map_err(Error::Internal)?,
        drive_id: r.get("drive_id"),
        item_id: r.get("item_id"),
        site_id: r.get("site_id"),
        name: r.get("name"),
        mime_type: r.get("mime_type"),
        size_bytes: r.get("size_bytes"),
        web_url: r.get("web_url"),
        content_hash: r.get("content_hash"),
        last_synced_at: r.get("last_synced_at"),
        transcript_file_id: r.get("transcript_file_id"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

/// Summary columns are expected under the `file_` prefix (see joins in
/// `annotations` and `activity`).
pub(crate) fn file_summary_from_row(r: &PgRow) -> Option<FileRefSummary> {
    let id: Option<Uuid> = r.get("file_id");
    id.map(|id| FileRefSummary {
        id,
        drive_id: r.get("file_drive_id"),
        item_id: r.get("file_item_id"),
        name: r.get("file_name"),
        mime_type: r.get("file_mime_type"),
        web_url: r.get("file_web_url"),
    })
}

fn check_identity(provider: StorageProviderKind, drive_id: &str, item_id: &str) -> Result<()> {
    if !provider.is_resolvable() {
        return Err(Error::UnsupportedProvider(provider.to_string()));
    }
    if drive_id.trim().is_empty() || item_id.trim().is_empty() {
        return Err(Error::InvalidInput(
            "drive_id and item_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// PostgreSQL implementation of FileRefResolver.
#[derive(Clone)]
pub struct PgFileRefResolver {
    pool: Pool<Postgres>,
}

impl PgFileRefResolver {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn lookup_id(&self, org_id: Uuid, drive_id: &str, item_id: &str) -> Result<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM file_refs WHERE org_id = $1 AND drive_id = $2 AND item_id = $3",
        )
        .bind(org_id)
        .bind(drive_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)
    }
}

#[async_trait]
impl FileRefResolver for PgFileRefResolver {
    async fn find_or_create(
        &self,
        org_id: Uuid,
        provider: StorageProviderKind,
        drive_id: &str,
        item_id: &str,
        metadata: Option<&FileMetadata>,
    ) -> Result<Uuid> {
        check_identity(provider, drive_id, item_id)?;

        let meta = metadata.cloned().unwrap_or_default();
        let name = meta
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| defaults::UNKNOWN_FILE_NAME.to_string());
        let now = Utc::now();

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO file_refs
                (id, org_id, provider, drive_id, item_id, site_id, name, mime_type,
                 size_bytes, web_url, last_synced_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, $11)
            ON CONFLICT ON CONSTRAINT file_refs_org_drive_item_key DO NOTHING
            RETURNING id
            "#,
        )
        .bind(new_v7())
        .bind(org_id)
        .bind(provider.as_str())
        .bind(drive_id)
        .bind(item_id)
        .bind(meta.site_id)
        .bind(&name)
        .bind(meta.mime_type)
        .bind(meta.size_bytes)
        .bind(meta.web_url)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(id) = inserted {
            info!(
                subsystem = "resolver",
                component = "file_refs",
                op = "find_or_create",
                org_id = %org_id,
                file_ref_id = %id,
                provider = %provider,
                created = true,
                "Created file reference"
            );
            return Ok(id);
        }

        match self.lookup_id(org_id, drive_id, item_id).await? {
            Some(id) => {
                debug!(
                    subsystem = "resolver",
                    component = "file_refs",
                    op = "find_or_create",
                    org_id = %org_id,
                    file_ref_id = %id,
                    created = false,
                    "Resolved existing file reference"
                );
                Ok(id)
            }
            None => {
                warn!(
                    subsystem = "resolver",
                    component = "file_refs",
                    op = "find_or_create",
                    org_id = %org_id,
                    drive_id,
                    item_id,
                    "Insert conflicted but no existing file reference was found"
                );
                Err(Error::Internal(format!(
                    "file reference for {}/{} vanished during resolution",
                    drive_id, item_id
                )))
            }
        }
    }

    async fn find(
        &self,
        org_id: Uuid,
        provider: StorageProviderKind,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Option<Uuid>> {
        check_identity(provider, drive_id, item_id)?;
        self.lookup_id(org_id, drive_id, item_id).await
    }

    async fn get(&self, org_id: Uuid, file_ref_id: Uuid) -> Result<FileRef> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM file_refs WHERE id = $1 AND org_id = $2",
            FILE_REF_COLUMNS
        ))
        .bind(file_ref_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("file reference {}", file_ref_id)))?;

        file_ref_from_row(&row)
    }

    async fn refresh_metadata(
        &self,
        org_id: Uuid,
        file_ref_id: Uuid,
        metadata: &FileMetadata,
        content_hash: Option<&str>,
    ) -> Result<FileRef> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE file_refs SET
                name = COALESCE($3, name),
                mime_type = COALESCE($4, mime_type),
                size_bytes = COALESCE($5, size_bytes),
                web_url = COALESCE($6, web_url),
                site_id = COALESCE($7, site_id),
                content_hash = COALESCE($8, content_hash),
                last_synced_at = $9,
                updated_at = $9
            WHERE id = $1 AND org_id = $2
            RETURNING {}
            "#,
            FILE_REF_COLUMNS
        ))
        .bind(file_ref_id)
        .bind(org_id)
        .bind(metadata.name.as_deref().filter(|n| !n.trim().is_empty()))
        .bind(metadata.mime_type.as_deref())
        .bind(metadata.size_bytes)
        .bind(metadata.web_url.as_deref())
        .bind(metadata.site_id.as_deref())
        .bind(content_hash)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("file reference {}", file_ref_id)))?;

        info!(
            subsystem = "resolver",
            component = "file_refs",
            op = "refresh_metadata",
            org_id = %org_id,
            file_ref_id = %file_ref_id,
            "Refreshed file reference metadata"
        );
        file_ref_from_row(&row)
    }

    async fn link_transcript(
        &self,
        org_id: Uuid,
        file_ref_id: Uuid,
        transcript_file_ref_id: Uuid,
    ) -> Result<FileRef> {
        if file_ref_id == transcript_file_ref_id {
            return Err(Error::InvalidInput(
                "a file cannot be its own transcript".to_string(),
            ));
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE file_refs SET transcript_file_id = $3, updated_at = $4
            WHERE id = $1 AND org_id = $2
              AND EXISTS (SELECT 1 FROM file_refs t WHERE t.id = $3 AND t.org_id = $2)
            RETURNING {}
            "#,
            FILE_REF_COLUMNS
        ))
        .bind(file_ref_id)
        .bind(org_id)
        .bind(transcript_file_ref_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "file reference {} or transcript {}",
                file_ref_id, transcript_file_ref_id
            ))
        })?;

        info!(
            subsystem = "resolver",
            component = "file_refs",
            op = "link_transcript",
            file_ref_id = %file_ref_id,
            transcript_file_id = %transcript_file_ref_id,
            "Linked transcript"
        );
        file_ref_from_row(&row)
    }

    async fn sync_from_provider(
        &self,
        provider: &dyn StorageProvider,
        org_id: Uuid,
        drive_id: &str,
        item_id: &str,
    ) -> Result<FileRef> {
        let kind = provider.kind();
        check_identity(kind, drive_id, item_id)?;

        let item = provider.get_item(drive_id, item_id).await?;
        if !item.is_file() {
            return Err(Error::InvalidInput(format!(
                "storage item {} is a folder",
                item_id
            )));
        }
        let metadata = item.file_metadata(None);
        let id = self
            .find_or_create(org_id, kind, drive_id, item_id, Some(&metadata))
            .await?;

        let content = provider.get_file_content(drive_id, item_id).await?;
        let hash = compute_content_hash(&content);
        debug!(
            subsystem = "resolver",
            component = "file_refs",
            op = "sync",
            file_ref_id = %id,
            size_bytes = content.len(),
            "Fetched content for hashing"
        );

        self.refresh_metadata(org_id, id, &metadata, Some(&hash))
            .await
    }
}
