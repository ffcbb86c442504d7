//! # cluster-db
//!
//! PostgreSQL persistence layer for cluster annotations.
//!
//! This crate provides:
//! - Connection pool management
//! - File reference resolution with conflict-tolerant creation
//! - Annotation storage with transactional target and tag writes
//! - Affinity clusters, freestanding canvas nodes and versioned snapshots
//! - File view tracking and maintenance passes
//!
//! ## Example
//!
//! ```rust,ignore
//! use cluster_db::{
//!     AnnotationRepository, CreateAnnotationRequest, CreateTargetRequest, Database, Motivation,
//!     OrgContext,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/cluster").await?;
//!     let ctx = OrgContext::new(org_id, user_id);
//!
//!     let annotation = db.annotations.create(&ctx, CreateAnnotationRequest {
//!         motivation: vec![Motivation::Commenting],
//!         body_text: Some("Participant hesitates here".to_string()),
//!         targets: vec![CreateTargetRequest::text_quote("drive-1", "item-1", "I wasn't sure")],
//!         ..Default::default()
//!     }).await?;
//!
//!     println!("Created annotation: {}", annotation.id);
//!     Ok(())
//! }
//! ```
pub mod activity;
pub mod annotations;
pub mod canvas_nodes;
pub mod clusters;
pub mod file_refs;
pub mod maintenance;
pub mod pool;
pub mod snapshots;
mod studies;

// Always compiled so integration tests (in tests/) can share the fixtures.
pub mod test_fixtures;

pub use cluster_core::*;

pub use activity::PgActivityRepository;
pub use annotations::PgAnnotationRepository;
pub use canvas_nodes::PgCanvasNodeRepository;
pub use clusters::PgClusterRepository;
pub use file_refs::PgFileRefResolver;
pub use maintenance::PgMaintenanceRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use snapshots::PgSnapshotRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Stable identities for externally hosted files.
    pub file_refs: PgFileRefResolver,
    pub annotations: PgAnnotationRepository,
    /// Affinity clusters and their memberships.
    pub clusters: PgClusterRepository,
    pub canvas_nodes: PgCanvasNodeRepository,
    pub snapshots: PgSnapshotRepository,
    /// File views and recent activity.
    pub activity: PgActivityRepository,
    /// Cross-organization repair passes.
    pub maintenance: PgMaintenanceRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            file_refs: PgFileRefResolver::new(pool.clone()),
            annotations: PgAnnotationRepository::new(pool.clone()),
            clusters: PgClusterRepository::new(pool.clone()),
            canvas_nodes: PgCanvasNodeRepository::new(pool.clone()),
            snapshots: PgSnapshotRepository::new(pool.clone()),
            activity: PgActivityRepository::new(pool.clone()),
            maintenance: PgMaintenanceRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Connect using environment-loaded application configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        config.database.validate()?;
        Self::connect_with_config(&config.database.url, PoolConfig::from_app_config(config)).await
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
