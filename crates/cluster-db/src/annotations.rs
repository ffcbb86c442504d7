//! Annotation repository implementation.
//!
//! Creation validates every selector before touching the database, resolves
//! target files concurrently through the [`PgFileRefResolver`], and then
//! writes the annotation, its targets (in input order) and its tag links in a
//! single transaction. Updates patch the stored JSON-LD document under a row
//! lock so the document and relational columns change together.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, info, trace};
use uuid::Uuid;

use cluster_core::selector::{self, round_millis};
use cluster_core::{
    build_document, defaults, new_v7, patch_document, Annotation, AnnotationRepository,
    AnnotationTarget, CreateAnnotationRequest, CreateTargetRequest, DocumentInput, Error,
    FileRefResolver, ListAnnotationsRequest, Motivation, OrgContext, Result, Selector,
    SelectorType, UpdateAnnotationRequest,
};

use crate::file_refs::{file_summary_from_row, PgFileRefResolver};
use crate::studies::ensure_study_in_org;

const ANNOTATION_COLUMNS: &str = "id, org_id, study_id, motivation, creator_id, participant_id, \
     session_id, jsonld, body_text, created_at, modified_at, deleted_at";

/// A target whose selector and times have passed validation.
#[derive(Debug)]
struct PreparedTarget {
    req: CreateTargetRequest,
    selector: Selector,
    exact_text: Option<String>,
    start_time: Option<f64>,
    end_time: Option<f64>,
}

fn prepare_target(req: CreateTargetRequest) -> Result<PreparedTarget> {
    if !req.provider.is_resolvable() {
        return Err(Error::UnsupportedProvider(req.provider.to_string()));
    }
    let selector = selector::validate(&req.selector)?;

    let (start_time, end_time) = match (req.start_time, req.end_time) {
        (None, None) => match selector.time_range() {
            Some((s, e)) => (Some(s), Some(e)),
            None => (None, None),
        },
        (start, end) => (start, end),
    };
    for t in [start_time, end_time].into_iter().flatten() {
        if !t.is_finite() || t < 0.0 {
            return Err(Error::InvalidInput(format!(
                "target time must be a non-negative number: {}",
                t
            )));
        }
    }
    if let (Some(s), Some(e)) = (start_time, end_time) {
        if s > e {
            return Err(Error::InvalidInput(format!(
                "target start time {} is after end time {}",
                s, e
            )));
        }
    }

    let exact_text = req
        .exact_text
        .clone()
        .or_else(|| selector.exact_text().map(str::to_string));

    Ok(PreparedTarget {
        selector,
        exact_text,
        start_time: start_time.map(round_millis),
        end_time: end_time.map(round_millis),
        req,
    })
}

fn check_motivation(motivation: &[Motivation]) -> Result<()> {
    if motivation.is_empty() {
        return Err(Error::InvalidInput(
            "annotation requires at least one motivation".to_string(),
        ));
    }
    Ok(())
}

fn motivation_to_db(motivation: &[Motivation]) -> Vec<String> {
    motivation.iter().map(|m| m.to_string()).collect()
}

fn annotation_from_row(r: &PgRow) -> Result<Annotation> {
    let motivation: Vec<String> = r.get("motivation");
    let motivation = motivation
        .iter()
        .map(|m| m.parse::<Motivation>().map_err(Error::Internal))
        .collect::<Result<Vec<_>>>()?;

    Ok(Annotation {
        id: r.get("id"),
        org_id: r.get("org_id"),
        study_id: r.get("study_id"),
        motivation,
        creator_id: r.get("creator_id"),
        body_text: r.get("body_text"),
        participant_id: r.get("participant_id"),
        session_id: r.get("session_id"),
        jsonld: r.get("jsonld"),
        created_at: r.get("created_at"),
        modified_at: r.get("modified_at"),
        deleted_at: r.get("deleted_at"),
        targets: Vec::new(),
        tag_ids: Vec::new(),
    })
}

fn target_from_row(r: &PgRow) -> Result<AnnotationTarget> {
    let selector_type: String = r.get("selector_type");
    let selector_value: JsonValue = r.get("selector_value");
    Ok(AnnotationTarget {
        id: r.get("id"),
        annotation_id: r.get("annotation_id"),
        file_ref_id: r.get("file_ref_id"),
        ordinal: r.get("ordinal"),
        selector_type: selector_type
            .parse::<SelectorType>()
            .map_err(Error::Internal)?,
        selector: serde_json::from_value(selector_value)?,
        exact_text: r.get("exact_text"),
        start_time: r.get("start_time"),
        end_time: r.get("end_time"),
        file: file_summary_from_row(r),
    })
}

/// PostgreSQL implementation of AnnotationRepository.
pub struct PgAnnotationRepository {
    pool: Pool<Postgres>,
    resolver: PgFileRefResolver,
}

impl PgAnnotationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            resolver: PgFileRefResolver::new(pool.clone()),
            pool,
        }
    }

    /// Link `tag_ids` to an annotation. Tags must belong to the organization.
    pub async fn insert_tags_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        annotation_id: Uuid,
        tag_ids: &[Uuid],
    ) -> Result<()> {
        let unique: Vec<Uuid> = tag_ids
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(());
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO annotation_tags (annotation_id, tag_id, created_at)
            SELECT $1, t.id, NOW()
            FROM tags t
            JOIN taxonomies x ON x.id = t.taxonomy_id
            WHERE t.id = ANY($2) AND x.org_id = $3
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(annotation_id)
        .bind(&unique)
        .bind(org_id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if inserted != unique.len() as u64 {
            return Err(Error::InvalidInput(format!(
                "{} of {} tags do not exist in this organization",
                unique.len() as u64 - inserted,
                unique.len()
            )));
        }
        Ok(())
    }

    /// Attach targets and tags to already-loaded annotation rows.
    async fn load_relations_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        annotations: &mut [Annotation],
    ) -> Result<()> {
        if annotations.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = annotations.iter().map(|a| a.id).collect();

        let target_rows = sqlx::query(
            r#"
            SELECT t.id, t.annotation_id, t.file_ref_id, t.ordinal, t.selector_type,
                   t.selector_value, t.exact_text, t.start_time, t.end_time,
                   f.id AS file_id, f.drive_id AS file_drive_id, f.item_id AS file_item_id,
                   f.name AS file_name, f.mime_type AS file_mime_type,
                   f.web_url AS file_web_url
            FROM annotation_targets t
            LEFT JOIN file_refs f ON f.id = t.file_ref_id
            WHERE t.annotation_id = ANY($1)
            ORDER BY t.annotation_id, t.ordinal
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let mut targets: HashMap<Uuid, Vec<AnnotationTarget>> = HashMap::new();
        for row in &target_rows {
            let target = target_from_row(row)?;
            targets.entry(target.annotation_id).or_default().push(target);
        }

        let tag_rows = sqlx::query(
            "SELECT annotation_id, tag_id FROM annotation_tags
             WHERE annotation_id = ANY($1)
             ORDER BY created_at, tag_id",
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let mut tags: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in &tag_rows {
            tags.entry(row.get("annotation_id"))
                .or_default()
                .push(row.get("tag_id"));
        }

        for annotation in annotations.iter_mut() {
            annotation.targets = targets.remove(&annotation.id).unwrap_or_default();
            annotation.tag_ids = tags.remove(&annotation.id).unwrap_or_default();
        }
        Ok(())
    }

    /// Fetch a live annotation with relations inside an existing transaction.
    pub async fn fetch_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Annotation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM annotations
             WHERE id = $1 AND org_id = $2 AND deleted_at IS NULL",
            ANNOTATION_COLUMNS
        ))
        .bind(id)
        .bind(org_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut annotations = vec![annotation_from_row(&row)?];
        self.load_relations_tx(tx, &mut annotations).await?;
        Ok(annotations.pop())
    }

    /// Fetch live annotations by id, preserving the order of `ids`.
    pub async fn fetch_many_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Annotation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM annotations
             WHERE id = ANY($1) AND org_id = $2 AND deleted_at IS NULL",
            ANNOTATION_COLUMNS
        ))
        .bind(ids)
        .bind(org_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let mut by_id: HashMap<Uuid, Annotation> = HashMap::new();
        for row in &rows {
            let a = annotation_from_row(row)?;
            by_id.insert(a.id, a);
        }
        let mut ordered: Vec<Annotation> = ids.iter().filter_map(|id| by_id.remove(id)).collect();
        self.load_relations_tx(tx, &mut ordered).await?;
        Ok(ordered)
    }

    /// Remove cluster memberships and canvas nodes, then set `deleted_at`.
    ///
    /// Returns `AnnotationNotFound` when the annotation is absent or already deleted.
    pub async fn soft_delete_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<()> {
        // Canvas nodes before the annotation: promotion locks in the same order.
        sqlx::query("SELECT id FROM canvas_nodes WHERE annotation_id = $1 AND org_id = $2 FOR UPDATE")
            .bind(id)
            .bind(org_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let locked: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM annotations
             WHERE id = $1 AND org_id = $2 AND deleted_at IS NULL
             FOR UPDATE",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        if locked.is_none() {
            return Err(Error::AnnotationNotFound(id));
        }

        let memberships = sqlx::query("DELETE FROM affinity_group_items WHERE annotation_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        let nodes = sqlx::query("DELETE FROM canvas_nodes WHERE annotation_id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        sqlx::query("UPDATE annotations SET deleted_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "annotations",
            op = "soft_delete",
            annotation_id = %id,
            memberships_removed = memberships,
            canvas_nodes_removed = nodes,
            "Cleared placements before soft delete"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &OrgContext,
        req: &CreateAnnotationRequest,
        targets: &[PreparedTarget],
        file_ref_ids: &[Uuid],
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let jsonld = build_document(&DocumentInput {
            id,
            creator_id: ctx.user_id,
            created: now,
            motivation: &req.motivation,
            body_text: req.body_text.as_deref(),
            targets: file_ref_ids
                .iter()
                .copied()
                .zip(targets.iter().map(|t| &t.selector))
                .collect(),
            study_id: req.study_id,
            participant_id: req.participant_id.as_deref(),
            session_id: req.session_id.as_deref(),
        })?;

        ensure_study_in_org(&mut **tx, ctx.org_id, req.study_id).await?;

        sqlx::query(
            r#"
            INSERT INTO annotations
                (id, org_id, study_id, motivation, creator_id, participant_id, session_id,
                 jsonld, body_text, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            "#,
        )
        .bind(id)
        .bind(ctx.org_id)
        .bind(req.study_id)
        .bind(motivation_to_db(&req.motivation))
        .bind(ctx.user_id)
        .bind(req.participant_id.as_deref())
        .bind(req.session_id.as_deref())
        .bind(&jsonld)
        .bind(req.body_text.as_deref())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        for (ordinal, (target, file_ref_id)) in targets.iter().zip(file_ref_ids).enumerate() {
            trace!(
                subsystem = "annotations",
                op = "insert_target",
                annotation_id = %id,
                file_ref_id = %file_ref_id,
                ordinal,
                "Inserting annotation target"
            );
            sqlx::query(
                r#"
                INSERT INTO annotation_targets
                    (id, annotation_id, file_ref_id, ordinal, selector_type, selector_value,
                     exact_text, start_time, end_time, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(new_v7())
            .bind(id)
            .bind(file_ref_id)
            .bind(ordinal as i32)
            .bind(target.selector.selector_type().as_str())
            .bind(target.selector.to_json()?)
            .bind(target.exact_text.as_deref())
            .bind(target.start_time)
            .bind(target.end_time)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        }

        self.insert_tags_tx(tx, ctx.org_id, id, &req.tag_ids).await
    }
}

#[async_trait]
impl AnnotationRepository for PgAnnotationRepository {
    async fn create(&self, ctx: &OrgContext, req: CreateAnnotationRequest) -> Result<Annotation> {
        check_motivation(&req.motivation)?;
        if req.targets.is_empty() {
            return Err(Error::InvalidInput(
                "annotation requires at least one target".to_string(),
            ));
        }

        let mut req = req;
        let targets = std::mem::take(&mut req.targets)
            .into_iter()
            .map(prepare_target)
            .collect::<Result<Vec<_>>>()?;

        // Resolution may run concurrently; try_join_all keeps input order.
        let file_ref_ids = try_join_all(targets.iter().map(|t| {
            self.resolver.find_or_create(
                ctx.org_id,
                t.req.provider,
                &t.req.drive_id,
                &t.req.item_id,
                t.req.file_metadata.as_ref(),
            )
        }))
        .await?;

        let id = new_v7();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.insert_tx(&mut tx, ctx, &req, &targets, &file_ref_ids, id, now)
            .await?;
        let annotation = self
            .fetch_tx(&mut tx, ctx.org_id, id)
            .await?
            .ok_or_else(|| Error::Internal(format!("annotation {} missing after insert", id)))?;
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "annotations",
            op = "create",
            org_id = %ctx.org_id,
            annotation_id = %id,
            target_count = annotation.targets.len(),
            tag_count = annotation.tag_ids.len(),
            "Created annotation"
        );
        Ok(annotation)
    }

    async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> Result<Option<Annotation>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result = self.fetch_tx(&mut tx, org_id, id).await?;
        tx.commit().await.map_err(Error::Database)?;
        debug!(
            subsystem = "annotations",
            op = "find_by_id",
            annotation_id = %id,
            found = result.is_some(),
            "Annotation lookup"
        );
        Ok(result)
    }

    async fn list(&self, org_id: Uuid, req: ListAnnotationsRequest) -> Result<Vec<Annotation>> {
        let limit = req.limit.unwrap_or(defaults::PAGE_LIMIT).max(1);
        let offset = req.offset.unwrap_or(defaults::PAGE_OFFSET).max(0);

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM annotations
             WHERE org_id = $1 AND deleted_at IS NULL
               AND ($2::uuid IS NULL OR study_id = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3 OFFSET $4",
            ANNOTATION_COLUMNS
        ))
        .bind(org_id)
        .bind(req.study_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let mut annotations = rows
            .iter()
            .map(annotation_from_row)
            .collect::<Result<Vec<_>>>()?;

        // Tag filter runs on the already-paged rows.
        if let Some(tag_ids) = req.tag_ids.as_ref().filter(|t| !t.is_empty()) {
            let page_ids: Vec<Uuid> = annotations.iter().map(|a| a.id).collect();
            let tagged: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
                "SELECT DISTINCT annotation_id FROM annotation_tags
                 WHERE tag_id = ANY($1) AND annotation_id = ANY($2)",
            )
            .bind(tag_ids)
            .bind(&page_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::Database)?
            .into_iter()
            .collect();
            annotations.retain(|a| tagged.contains(&a.id));
        }

        self.load_relations_tx(&mut tx, &mut annotations).await?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "annotations",
            op = "list",
            org_id = %org_id,
            result_count = annotations.len(),
            "Listed annotations"
        );
        Ok(annotations)
    }

    async fn update(
        &self,
        org_id: Uuid,
        id: Uuid,
        req: UpdateAnnotationRequest,
    ) -> Result<Annotation> {
        if let Some(motivation) = &req.motivation {
            check_motivation(motivation)?;
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM annotations
             WHERE id = $1 AND org_id = $2 AND deleted_at IS NULL
             FOR UPDATE",
            ANNOTATION_COLUMNS
        ))
        .bind(id)
        .bind(org_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::AnnotationNotFound(id))?;
        let current = annotation_from_row(&row)?;

        let now = Utc::now();
        let jsonld = patch_document(&current.jsonld, &req, now)?;
        let motivation = req.motivation.clone().unwrap_or(current.motivation);
        let body_text = req.body_text.clone().unwrap_or(current.body_text);
        if let Some(new_study) = req.study_id {
            ensure_study_in_org(&mut *tx, org_id, new_study).await?;
        }
        let study_id = req.study_id.unwrap_or(current.study_id);
        let participant_id = req.participant_id.clone().unwrap_or(current.participant_id);
        let session_id = req.session_id.clone().unwrap_or(current.session_id);

        sqlx::query(
            r#"
            UPDATE annotations SET
                motivation = $2, body_text = $3, study_id = $4, participant_id = $5,
                session_id = $6, jsonld = $7, modified_at = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(motivation_to_db(&motivation))
        .bind(body_text)
        .bind(study_id)
        .bind(participant_id)
        .bind(session_id)
        .bind(&jsonld)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if let Some(tag_ids) = &req.tag_ids {
            sqlx::query("DELETE FROM annotation_tags WHERE annotation_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            self.insert_tags_tx(&mut tx, org_id, id, tag_ids).await?;
        }

        let annotation = self
            .fetch_tx(&mut tx, org_id, id)
            .await?
            .ok_or(Error::AnnotationNotFound(id))?;
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "annotations",
            op = "update",
            org_id = %org_id,
            annotation_id = %id,
            tags_replaced = req.tag_ids.is_some(),
            "Updated annotation"
        );
        Ok(annotation)
    }

    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.soft_delete_tx(&mut tx, org_id, id).await?;
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "annotations",
            op = "soft_delete",
            org_id = %org_id,
            annotation_id = %id,
            "Soft-deleted annotation"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_core::StorageProviderKind;
    use serde_json::json;

    fn target(selector: JsonValue) -> CreateTargetRequest {
        CreateTargetRequest {
            provider: StorageProviderKind::SharePoint,
            drive_id: "d1".into(),
            item_id: "i1".into(),
            selector,
            exact_text: None,
            start_time: None,
            end_time: None,
            file_metadata: None,
        }
    }

    #[test]
    fn test_prepare_target_derives_fragment_times() {
        let prepared = prepare_target(target(json!({
            "type": "FragmentSelector",
            "conformsTo": defaults::MEDIA_FRAGMENTS_URI,
            "value": "t=12.3456,20"
        })))
        .unwrap();
        assert_eq!(prepared.start_time, Some(12.346));
        assert_eq!(prepared.end_time, Some(20.0));
    }

    #[test]
    fn test_prepare_target_copies_exact_text() {
        let prepared =
            prepare_target(target(json!({"type": "TextQuoteSelector", "exact": "hello"})))
                .unwrap();
        assert_eq!(prepared.exact_text.as_deref(), Some("hello"));
        assert_eq!(prepared.start_time, None);
    }

    #[test]
    fn test_prepare_target_rejects_reversed_times() {
        let mut t = target(json!({"type": "CssSelector", "value": "#intro"}));
        t.start_time = Some(9.0);
        t.end_time = Some(3.0);
        assert!(prepare_target(t).unwrap_err().is_validation());
    }

    #[test]
    fn test_prepare_target_rejects_unsupported_provider() {
        let mut t = target(json!({"type": "TextQuoteSelector", "exact": "x"}));
        t.provider = StorageProviderKind::GoogleDrive;
        assert!(matches!(
            prepare_target(t),
            Err(Error::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_check_motivation() {
        assert!(check_motivation(&[]).is_err());
        assert!(check_motivation(&[Motivation::Tagging]).is_ok());
    }
}
