//! Study ownership check for repositories that accept a caller-supplied study.

use sqlx::{Executor, Postgres};
use tracing::debug;
use uuid::Uuid;

use cluster_core::{Error, Result};

/// Fail with `StudyNotFound` unless `study_id` is absent or belongs to `org_id`.
pub(crate) async fn ensure_study_in_org<'e, E>(
    executor: E,
    org_id: Uuid,
    study_id: Option<Uuid>,
) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let Some(study_id) = study_id else {
        return Ok(());
    };

    let owned: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM studies WHERE id = $1 AND org_id = $2)",
    )
    .bind(study_id)
    .bind(org_id)
    .fetch_one(executor)
    .await
    .map_err(Error::Database)?;

    if owned {
        Ok(())
    } else {
        debug!(
            subsystem = "database",
            op = "ensure_study_in_org",
            org_id = %org_id,
            study_id = %study_id,
            "Study not visible to organization"
        );
        Err(Error::StudyNotFound(study_id))
    }
}
