//! Affinity cluster repository.
//!
//! Membership writes lock the parent cluster row (`FOR UPDATE`) so that
//! `sort_order` allocation and duplicate detection see a stable view.
//! Promotion of a canvas node into a cluster runs as one transaction:
//! either the membership exists and the node is gone, or nothing changed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cluster_core::{
    defaults, new_v7, Cluster, ClusterItem, ClusterRepository, CreateClusterRequest, Error,
    OrgContext, Position, Result, Size, UpdateClusterRequest,
};

use crate::annotations::PgAnnotationRepository;
use crate::studies::ensure_study_in_org;

const CLUSTER_COLUMNS: &str = "id, org_id, study_id, name, color, position_x, position_y, \
     width, height, created_by, created_at, updated_at";

fn cluster_from_row(r: &PgRow) -> Cluster {
    Cluster {
        id: r.get("id"),
        org_id: r.get("org_id"),
        study_id: r.get("study_id"),
        name: r.get("name"),
        color: r.get("color"),
        position: Position::new(r.get("position_x"), r.get("position_y")),
        size: Size::new(r.get("width"), r.get("height")),
        created_by: r.get("created_by"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        items: Vec::new(),
    }
}

fn item_from_row(r: &PgRow) -> ClusterItem {
    ClusterItem {
        cluster_id: r.get("affinity_group_id"),
        annotation_id: r.get("annotation_id"),
        position: Position::new(r.get("position_x"), r.get("position_y")),
        sort_order: r.get("sort_order"),
        created_at: r.get("created_at"),
        annotation: None,
    }
}

/// `#RRGGBB`.
fn validate_color(color: &str) -> Result<()> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "color must be a #RRGGBB hex value: {}",
            color
        )))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("cluster name is required".to_string()));
    }
    Ok(())
}

fn validate_size(size: &Size) -> Result<()> {
    if !(size.width.is_finite() && size.height.is_finite()) || size.width <= 0.0 || size.height <= 0.0
    {
        return Err(Error::InvalidInput(format!(
            "cluster size must be positive: {}x{}",
            size.width, size.height
        )));
    }
    Ok(())
}

fn validate_position(position: &Position) -> Result<()> {
    if !(position.x.is_finite() && position.y.is_finite()) {
        return Err(Error::InvalidInput("position must be finite".to_string()));
    }
    Ok(())
}

/// PostgreSQL implementation of ClusterRepository.
pub struct PgClusterRepository {
    pool: Pool<Postgres>,
    annotations: PgAnnotationRepository,
}

impl PgClusterRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            annotations: PgAnnotationRepository::new(pool.clone()),
            pool,
        }
    }

    /// Lock the cluster row for the rest of the transaction.
    async fn lock_cluster_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        cluster_id: Uuid,
    ) -> Result<()> {
        let found: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM affinity_groups WHERE id = $1 AND org_id = $2 FOR UPDATE",
        )
        .bind(cluster_id)
        .bind(org_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        found.map(|_| ()).ok_or(Error::ClusterNotFound(cluster_id))
    }

    async fn ensure_annotation_live_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        annotation_id: Uuid,
    ) -> Result<()> {
        let found: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM annotations
             WHERE id = $1 AND org_id = $2 AND deleted_at IS NULL",
        )
        .bind(annotation_id)
        .bind(org_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        found
            .map(|_| ())
            .ok_or(Error::AnnotationNotFound(annotation_id))
    }

    /// Insert a membership at the end of the cluster's order.
    ///
    /// Returns `None` when the annotation is already a member.
    pub async fn insert_item_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        cluster_id: Uuid,
        annotation_id: Uuid,
        position: Position,
    ) -> Result<Option<ClusterItem>> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO affinity_group_items
                (affinity_group_id, annotation_id, position_x, position_y, sort_order, created_at)
            VALUES ($1, $2, $3, $4,
                (SELECT COALESCE(MAX(sort_order) + 1, 0)
                 FROM affinity_group_items WHERE affinity_group_id = $1),
                $5)
            ON CONFLICT (affinity_group_id, annotation_id) DO NOTHING
            RETURNING affinity_group_id, annotation_id, position_x, position_y, sort_order, created_at
            "#,
        )
        .bind(cluster_id)
        .bind(annotation_id)
        .bind(position.x)
        .bind(position.y)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;

        if row.is_some() {
            self.touch_tx(tx, cluster_id).await?;
        }
        Ok(row.as_ref().map(item_from_row))
    }

    async fn touch_tx(&self, tx: &mut Transaction<'_, Postgres>, cluster_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE affinity_groups SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(cluster_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Load items and their annotations for a set of clusters.
    async fn load_items_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        clusters: &mut [Cluster],
    ) -> Result<()> {
        if clusters.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = clusters.iter().map(|c| c.id).collect();
        let rows = sqlx::query(
            r#"
            SELECT i.affinity_group_id, i.annotation_id, i.position_x, i.position_y,
                   i.sort_order, i.created_at
            FROM affinity_group_items i
            JOIN annotations a ON a.id = i.annotation_id AND a.deleted_at IS NULL
            WHERE i.affinity_group_id = ANY($1)
            ORDER BY i.affinity_group_id, i.sort_order, i.created_at
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let mut items: Vec<ClusterItem> = rows.iter().map(item_from_row).collect();
        let mut annotation_ids: Vec<Uuid> = items.iter().map(|i| i.annotation_id).collect();
        annotation_ids.sort();
        annotation_ids.dedup();

        let annotations: HashMap<Uuid, _> = self
            .annotations
            .fetch_many_tx(tx, org_id, &annotation_ids)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut by_cluster: HashMap<Uuid, Vec<ClusterItem>> = HashMap::new();
        for mut item in items.drain(..) {
            // Multi-membership: the same annotation may back several items.
            item.annotation = annotations
                .get(&item.annotation_id)
                .cloned()
                .map(Box::new);
            by_cluster.entry(item.cluster_id).or_default().push(item);
        }

        for cluster in clusters.iter_mut() {
            cluster.items = by_cluster.remove(&cluster.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn fetch_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<Cluster> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM affinity_groups WHERE id = $1 AND org_id = $2",
            CLUSTER_COLUMNS
        ))
        .bind(id)
        .bind(org_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::ClusterNotFound(id))?;

        let mut clusters = vec![cluster_from_row(&row)];
        self.load_items_tx(tx, org_id, &mut clusters).await?;
        clusters.pop().ok_or(Error::ClusterNotFound(id))
    }
}

#[async_trait]
impl ClusterRepository for PgClusterRepository {
    async fn create(&self, ctx: &OrgContext, req: CreateClusterRequest) -> Result<Cluster> {
        validate_name(&req.name)?;
        let color = req
            .color
            .unwrap_or_else(|| defaults::CLUSTER_COLOR.to_string());
        validate_color(&color)?;
        let position = req.position.unwrap_or_default();
        validate_position(&position)?;
        let size = req.size.unwrap_or_default();
        validate_size(&size)?;

        ensure_study_in_org(&self.pool, ctx.org_id, req.study_id).await?;

        let id = new_v7();
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO affinity_groups
                (id, org_id, study_id, name, color, position_x, position_y, width, height,
                 created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {}
            "#,
            CLUSTER_COLUMNS
        ))
        .bind(id)
        .bind(ctx.org_id)
        .bind(req.study_id)
        .bind(req.name.trim())
        .bind(&color)
        .bind(position.x)
        .bind(position.y)
        .bind(size.width)
        .bind(size.height)
        .bind(ctx.user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "canvas",
            component = "clusters",
            op = "create",
            org_id = %ctx.org_id,
            cluster_id = %id,
            "Created cluster"
        );
        Ok(cluster_from_row(&row))
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> Result<Cluster> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let cluster = self.fetch_tx(&mut tx, org_id, id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(cluster)
    }

    async fn list(&self, org_id: Uuid, study_id: Option<Uuid>) -> Result<Vec<Cluster>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM affinity_groups
             WHERE org_id = $1 AND ($2::uuid IS NULL OR study_id = $2)
             ORDER BY created_at, id",
            CLUSTER_COLUMNS
        ))
        .bind(org_id)
        .bind(study_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let mut clusters: Vec<Cluster> = rows.iter().map(cluster_from_row).collect();
        self.load_items_tx(&mut tx, org_id, &mut clusters).await?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "canvas",
            component = "clusters",
            op = "list",
            org_id = %org_id,
            result_count = clusters.len(),
            "Listed clusters"
        );
        Ok(clusters)
    }

    async fn update(&self, org_id: Uuid, id: Uuid, req: UpdateClusterRequest) -> Result<Cluster> {
        if let Some(name) = &req.name {
            validate_name(name)?;
        }
        if let Some(color) = &req.color {
            validate_color(color)?;
        }
        if let Some(position) = &req.position {
            validate_position(position)?;
        }
        if let Some(size) = &req.size {
            validate_size(size)?;
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE affinity_groups SET
                name = COALESCE($3, name),
                color = COALESCE($4, color),
                position_x = COALESCE($5, position_x),
                position_y = COALESCE($6, position_y),
                width = COALESCE($7, width),
                height = COALESCE($8, height),
                updated_at = $9
            WHERE id = $1 AND org_id = $2
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(org_id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.color.as_deref())
        .bind(req.position.map(|p| p.x))
        .bind(req.position.map(|p| p.y))
        .bind(req.size.map(|s| s.width))
        .bind(req.size.map(|s| s.height))
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if updated.is_none() {
            tx.rollback().await.map_err(Error::Database)?;
            return Err(Error::ClusterNotFound(id));
        }

        let cluster = self.fetch_tx(&mut tx, org_id, id).await?;
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "canvas",
            component = "clusters",
            op = "update",
            cluster_id = %id,
            "Updated cluster"
        );
        Ok(cluster)
    }

    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM affinity_groups WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::ClusterNotFound(id));
        }
        info!(
            subsystem = "canvas",
            component = "clusters",
            op = "delete",
            cluster_id = %id,
            "Deleted cluster and its memberships"
        );
        Ok(())
    }

    async fn add_item(
        &self,
        org_id: Uuid,
        cluster_id: Uuid,
        annotation_id: Uuid,
        position: Position,
    ) -> Result<ClusterItem> {
        validate_position(&position)?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.lock_cluster_tx(&mut tx, org_id, cluster_id).await?;
        self.ensure_annotation_live_tx(&mut tx, org_id, annotation_id)
            .await?;

        let Some(item) = self
            .insert_item_tx(&mut tx, cluster_id, annotation_id, position)
            .await?
        else {
            tx.rollback().await.map_err(Error::Database)?;
            return Err(Error::Conflict(format!(
                "annotation {} is already in cluster {}",
                annotation_id, cluster_id
            )));
        };
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "canvas",
            component = "clusters",
            op = "add_item",
            cluster_id = %cluster_id,
            annotation_id = %annotation_id,
            sort_order = item.sort_order,
            "Added annotation to cluster"
        );
        Ok(item)
    }

    async fn remove_item(
        &self,
        org_id: Uuid,
        cluster_id: Uuid,
        annotation_id: Uuid,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.lock_cluster_tx(&mut tx, org_id, cluster_id).await?;

        let removed = sqlx::query(
            "DELETE FROM affinity_group_items
             WHERE affinity_group_id = $1 AND annotation_id = $2",
        )
        .bind(cluster_id)
        .bind(annotation_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected()
            > 0;

        if removed {
            self.touch_tx(&mut tx, cluster_id).await?;
        }
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "canvas",
            component = "clusters",
            op = "remove_item",
            cluster_id = %cluster_id,
            annotation_id = %annotation_id,
            removed,
            "Removed annotation from cluster"
        );
        Ok(removed)
    }

    async fn update_item_position(
        &self,
        org_id: Uuid,
        cluster_id: Uuid,
        annotation_id: Uuid,
        position: Position,
    ) -> Result<ClusterItem> {
        validate_position(&position)?;

        let row = sqlx::query(
            r#"
            UPDATE affinity_group_items i SET position_x = $4, position_y = $5
            FROM affinity_groups g
            WHERE i.affinity_group_id = $1 AND i.annotation_id = $2
              AND g.id = i.affinity_group_id AND g.org_id = $3
            RETURNING i.affinity_group_id, i.annotation_id, i.position_x, i.position_y,
                      i.sort_order, i.created_at
            "#,
        )
        .bind(cluster_id)
        .bind(annotation_id)
        .bind(org_id)
        .bind(position.x)
        .bind(position.y)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "annotation {} in cluster {}",
                annotation_id, cluster_id
            ))
        })?;

        Ok(item_from_row(&row))
    }

    async fn promote_canvas_node(
        &self,
        org_id: Uuid,
        canvas_node_id: Uuid,
        cluster_id: Uuid,
        position: Position,
    ) -> Result<ClusterItem> {
        validate_position(&position)?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let annotation_id = match sqlx::query_scalar::<_, Uuid>(
            "SELECT annotation_id FROM canvas_nodes WHERE id = $1 AND org_id = $2 FOR UPDATE",
        )
        .bind(canvas_node_id)
        .bind(org_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        {
            Some(id) => id,
            None => {
                tx.rollback().await.map_err(Error::Database)?;
                return Err(Error::CanvasNodeNotFound(canvas_node_id));
            }
        };

        self.lock_cluster_tx(&mut tx, org_id, cluster_id).await?;
        self.ensure_annotation_live_tx(&mut tx, org_id, annotation_id)
            .await?;

        let Some(item) = self
            .insert_item_tx(&mut tx, cluster_id, annotation_id, position)
            .await?
        else {
            tx.rollback().await.map_err(Error::Database)?;
            warn!(
                subsystem = "canvas",
                component = "clusters",
                op = "promote",
                canvas_node_id = %canvas_node_id,
                cluster_id = %cluster_id,
                annotation_id = %annotation_id,
                "Promotion rejected, annotation already in cluster"
            );
            return Err(Error::Conflict(format!(
                "annotation {} is already in cluster {}",
                annotation_id, cluster_id
            )));
        };

        sqlx::query("DELETE FROM canvas_nodes WHERE id = $1")
            .bind(canvas_node_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "canvas",
            component = "clusters",
            op = "promote",
            canvas_node_id = %canvas_node_id,
            cluster_id = %cluster_id,
            annotation_id = %annotation_id,
            "Promoted canvas node into cluster"
        );
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_color() {
        assert!(validate_color("#FDE68A").is_ok());
        assert!(validate_color("#fde68a").is_ok());
        assert!(validate_color("FDE68A").is_err());
        assert!(validate_color("#FDE68").is_err());
        assert!(validate_color("#GGGGGG").is_err());
    }

    #[test]
    fn test_validate_name_and_size() {
        assert!(validate_name("  ").is_err());
        assert!(validate_name("Pain points").is_ok());
        assert!(validate_size(&Size::new(0.0, 10.0)).is_err());
        assert!(validate_size(&Size::new(f64::NAN, 10.0)).is_err());
        assert!(validate_size(&Size::default()).is_ok());
    }

    #[test]
    fn test_validate_position() {
        assert!(validate_position(&Position::new(-10.0, 5.5)).is_ok());
        assert!(validate_position(&Position::new(f64::INFINITY, 0.0)).is_err());
    }
}
