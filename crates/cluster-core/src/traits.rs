//! Repository traits implemented by the PostgreSQL layer.
//!
//! Every method is scoped by organization. Mutations return the authoritative
//! post-mutation entity so callers can reconcile their own view state.

use async_trait::async_trait;
use uuid::Uuid;

use crate::annotation::{
    Annotation, CreateAnnotationRequest, ListAnnotationsRequest, UpdateAnnotationRequest,
};
use crate::error::Result;
use crate::models::*;
use crate::storage::StorageProvider;

// =============================================================================
// FILE REFERENCES
// =============================================================================

/// Idempotent identity resolution for externally addressed files.
#[async_trait]
pub trait FileRefResolver: Send + Sync {
    /// Return the FileRef id for `(org, drive, item)`, inserting it on first
    /// sight. Concurrent calls for the same triple converge on one row.
    async fn find_or_create(
        &self,
        org_id: Uuid,
        provider: StorageProviderKind,
        drive_id: &str,
        item_id: &str,
        metadata: Option<&FileMetadata>,
    ) -> Result<Uuid>;

    /// Pure lookup; never creates.
    async fn find(
        &self,
        org_id: Uuid,
        provider: StorageProviderKind,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Option<Uuid>>;

    async fn get(&self, org_id: Uuid, file_ref_id: Uuid) -> Result<FileRef>;

    /// Overwrite display metadata and bump `last_synced_at`.
    async fn refresh_metadata(
        &self,
        org_id: Uuid,
        file_ref_id: Uuid,
        metadata: &FileMetadata,
        content_hash: Option<&str>,
    ) -> Result<FileRef>;

    /// Point a media FileRef at its transcript FileRef.
    async fn link_transcript(
        &self,
        org_id: Uuid,
        file_ref_id: Uuid,
        transcript_file_ref_id: Uuid,
    ) -> Result<FileRef>;

    /// Resolve the item, then pull fresh metadata and a content hash from the provider.
    async fn sync_from_provider(
        &self,
        provider: &dyn StorageProvider,
        org_id: Uuid,
        drive_id: &str,
        item_id: &str,
    ) -> Result<FileRef>;
}

// =============================================================================
// ANNOTATIONS
// =============================================================================

#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    /// Validate, resolve targets, and persist annotation, targets and tags atomically.
    async fn create(&self, ctx: &OrgContext, req: CreateAnnotationRequest) -> Result<Annotation>;

    /// Excludes soft-deleted annotations.
    async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> Result<Option<Annotation>>;

    /// Newest first. See [`ListAnnotationsRequest`] for tag filter paging.
    async fn list(&self, org_id: Uuid, req: ListAnnotationsRequest) -> Result<Vec<Annotation>>;

    async fn update(
        &self,
        org_id: Uuid,
        id: Uuid,
        req: UpdateAnnotationRequest,
    ) -> Result<Annotation>;

    /// Remove cluster memberships and canvas nodes, then soft-delete.
    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()>;
}

// =============================================================================
// CLUSTERS
// =============================================================================

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn create(&self, ctx: &OrgContext, req: CreateClusterRequest) -> Result<Cluster>;

    /// Cluster with its items and their annotations.
    async fn get(&self, org_id: Uuid, id: Uuid) -> Result<Cluster>;

    async fn list(&self, org_id: Uuid, study_id: Option<Uuid>) -> Result<Vec<Cluster>>;

    async fn update(&self, org_id: Uuid, id: Uuid, req: UpdateClusterRequest) -> Result<Cluster>;

    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()>;

    /// Fails with `Conflict` when the annotation is already a member.
    async fn add_item(
        &self,
        org_id: Uuid,
        cluster_id: Uuid,
        annotation_id: Uuid,
        position: Position,
    ) -> Result<ClusterItem>;

    /// Returns whether a membership row was removed.
    async fn remove_item(&self, org_id: Uuid, cluster_id: Uuid, annotation_id: Uuid)
        -> Result<bool>;

    async fn update_item_position(
        &self,
        org_id: Uuid,
        cluster_id: Uuid,
        annotation_id: Uuid,
        position: Position,
    ) -> Result<ClusterItem>;

    /// Create the membership and delete the originating canvas node in one transaction.
    async fn promote_canvas_node(
        &self,
        org_id: Uuid,
        canvas_node_id: Uuid,
        cluster_id: Uuid,
        position: Position,
    ) -> Result<ClusterItem>;
}

// =============================================================================
// CANVAS NODES
// =============================================================================

#[async_trait]
pub trait CanvasNodeRepository: Send + Sync {
    /// Always inserts; one annotation may have many nodes.
    async fn save(
        &self,
        ctx: &OrgContext,
        annotation_id: Uuid,
        position: Position,
        study_id: Option<Uuid>,
    ) -> Result<CanvasNode>;

    async fn get(&self, org_id: Uuid, id: Uuid) -> Result<CanvasNode>;

    async fn list(&self, org_id: Uuid, study_id: Option<Uuid>) -> Result<Vec<CanvasNode>>;

    async fn update_position(&self, org_id: Uuid, id: Uuid, position: Position)
        -> Result<CanvasNode>;

    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()>;
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Assign `max(version) + 1` within the (org, study) scope.
    async fn create(&self, ctx: &OrgContext, req: CreateSnapshotRequest) -> Result<CanvasSnapshot>;

    async fn get(&self, org_id: Uuid, id: Uuid) -> Result<CanvasSnapshot>;

    /// Newest first.
    async fn list(&self, org_id: Uuid, study_id: Option<Uuid>)
        -> Result<Vec<CanvasSnapshotSummary>>;

    async fn delete(&self, org_id: Uuid, id: Uuid) -> Result<()>;
}

// =============================================================================
// ACTIVITY
// =============================================================================

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Upsert the single last-viewed row for (user, file).
    async fn record_file_view(
        &self,
        ctx: &OrgContext,
        provider: StorageProviderKind,
        drive_id: &str,
        item_id: &str,
        metadata: Option<&FileMetadata>,
    ) -> Result<FileView>;

    /// Most recently viewed files in the organization, newest first.
    async fn recent_activity(&self, ctx: &OrgContext, limit: Option<i64>)
        -> Result<Vec<RecentActivity>>;
}
