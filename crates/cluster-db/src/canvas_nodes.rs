//! Freestanding canvas node repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use cluster_core::{
    new_v7, CanvasNode, CanvasNodeRepository, Error, OrgContext, Position, Result,
};

use crate::studies::ensure_study_in_org;

const CANVAS_NODE_COLUMNS: &str =
    "id, org_id, study_id, annotation_id, position_x, position_y, created_by, created_at, updated_at";

fn canvas_node_from_row(r: &PgRow) -> CanvasNode {
    CanvasNode {
        id: r.get("id"),
        org_id: r.get("org_id"),
        study_id: r.get("study_id"),
        annotation_id: r.get("annotation_id"),
        position: Position::new(r.get("position_x"), r.get("position_y")),
        created_by: r.get("created_by"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn check_position(position: &Position) -> Result<()> {
    if position.x.is_finite() && position.y.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidInput("position must be finite".to_string()))
    }
}

/// PostgreSQL implementation of CanvasNodeRepository.
pub struct PgCanvasNodeRepository {
    pool: Pool<Postgres>,
}

impl PgCanvasNodeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CanvasNodeRepository for PgCanvasNodeRepository {
    async fn save(
        &self,
        ctx: &OrgContext,
        annotation_id: Uuid,
        position: Position,
        study_id: Option<Uuid>,
    ) -> Result<CanvasNode> {
        check_position(&position)?;
        ensure_study_in_org(&self.pool, ctx.org_id, study_id).await?;

        let id = new_v7();
        let now = Utc::now();
        // Insert only when the annotation is live in the same organization.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO canvas_nodes
                (id, org_id, study_id, annotation_id, position_x, position_y,
                 created_by, created_at, updated_at)
            SELECT $1, $2, $3, a.id, $5, $6, $7, $8, $8
            FROM annotations a
            WHERE a.id = $4 AND a.org_id = $2 AND a.deleted_at IS NULL
            RETURNING {}
            "#,
            CANVAS_NODE_COLUMNS
        ))
        .bind(id)
        .bind(ctx.org_id)
        .bind(study_id)
        .bind(annotation_id)
        .bind(position.x)
        .bind(position.y)
        .bind(ctx.user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::AnnotationNotFound(annotation_id))?;

        info!(
            subsystem = "canvas",
            component = "canvas_nodes",
            op = "save",
            org_id = %ctx.org_id,
            canvas_node_id = %id,
            annotation_id = %annotation_id,
            "Placed annotation on canvas"
        );
        Ok(canvas_node_from_row(&row))
    }

    async fn get(&self, org_id: Uuid, id: Uuid) -> Result<CanvasNode> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM canvas_nodes WHERE id = $1 AND org_id = $2",
            CANVAS_NODE_COLUMNS
        ))
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::CanvasNodeNotFound(id))?;

        Ok(canvas_node_from_row(&row))
    }

    async fn list(&self, org_id: Uuid, study_id: Option<Uuid>) -> Result<Vec<CanvasNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM canvas_nodes
             WHERE org_id = $1 AND ($2::uuid IS NULL OR study_id = $2)
             ORDER BY created_at, id",
            CANVAS_NODE_COLUMNS
        ))
        .bind(org_id)
        .bind(study_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "canvas",
            component = "canvas_nodes",
            op = "list",
            org_id = %org_id,
            result_count = rows.len(),
            "Listed canvas nodes"
        );
        Ok(rows.iter().map(canvas_node_from_row).collect())
    }

    async fn update_position(
        &self,
        org_id: Uuid,
        id: Uuid,
        position: Position,
    ) -> Result<CanvasNode> {
        check_position(&position)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE canvas_nodes SET position_x = $3, position_y = $4, updated_at = $5
            WHERE id = $1 AND org_id = $2
            RETURNING {}
            "#,
            CANVAS_NODE_COLUMNS
        ))
        .bind(id)
        .bind(org_id)
        .bind(position.x)
        .bind(position.y)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::CanvasNodeNotFound(id))?;

        Ok(canvas_node_from_row(&row))
    }

    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM canvas_nodes WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::CanvasNodeNotFound(id));
        }
        debug!(
            subsystem = "canvas",
            component = "canvas_nodes",
            op = "delete",
            canvas_node_id = %id,
            "Removed canvas node"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_position() {
        assert!(check_position(&Position::new(0.0, -250.5)).is_ok());
        assert!(check_position(&Position::new(f64::NAN, 1.0)).is_err());
    }
}
