//! Core data models for file references, canvas placement, and activity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::annotation::Annotation;

// =============================================================================
// REQUEST CONTEXT
// =============================================================================

/// Organization and acting user for a request.
///
/// Every repository call is scoped by `org_id`; `user_id` is recorded as
/// creator or viewer where relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgContext {
    pub org_id: Uuid,
    pub user_id: Uuid,
}

impl OrgContext {
    pub fn new(org_id: Uuid, user_id: Uuid) -> Self {
        Self { org_id, user_id }
    }
}

// =============================================================================
// FILE REFERENCES
// =============================================================================

/// External storage provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProviderKind {
    #[default]
    SharePoint,
    GoogleDrive,
}

impl StorageProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProviderKind::SharePoint => "sharepoint",
            StorageProviderKind::GoogleDrive => "googledrive",
        }
    }

    /// Whether file identities from this provider can be resolved.
    ///
    /// Only SharePoint drive/item pairs are resolvable today.
    pub fn is_resolvable(&self) -> bool {
        matches!(self, StorageProviderKind::SharePoint)
    }
}

impl fmt::Display for StorageProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sharepoint" => Ok(StorageProviderKind::SharePoint),
            "googledrive" | "google_drive" => Ok(StorageProviderKind::GoogleDrive),
            _ => Err(format!("Invalid storage provider: {}", s)),
        }
    }
}

/// Optional display metadata supplied when a FileRef is first created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub web_url: Option<String>,
    pub site_id: Option<String>,
}

/// Stable internal identity for an externally hosted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub id: Uuid,
    pub org_id: Uuid,
    pub study_id: Option<Uuid>,
    pub provider: StorageProviderKind,
    pub drive_id: String,
    pub item_id: String,
    pub site_id: Option<String>,
    pub name: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub web_url: Option<String>,
    pub content_hash: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub transcript_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// File display fields joined onto targets and activity rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRefSummary {
    pub id: Uuid,
    pub drive_id: String,
    pub item_id: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub web_url: Option<String>,
}

// =============================================================================
// CANVAS GEOMETRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: crate::defaults::CLUSTER_WIDTH,
            height: crate::defaults::CLUSTER_HEIGHT,
        }
    }
}

// =============================================================================
// CLUSTERS
// =============================================================================

/// Affinity cluster: a named, colored rectangle holding annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub org_id: Uuid,
    pub study_id: Option<Uuid>,
    pub name: String,
    pub color: String,
    pub position: Position,
    pub size: Size,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Memberships ordered by `sort_order`.
    pub items: Vec<ClusterItem>,
}

/// Membership of one annotation in one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterItem {
    pub cluster_id: Uuid,
    pub annotation_id: Uuid,
    pub position: Position,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    /// Populated by read-model queries; `None` on mutation results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Box<Annotation>>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateClusterRequest {
    pub name: String,
    pub color: Option<String>,
    pub study_id: Option<Uuid>,
    pub position: Option<Position>,
    pub size: Option<Size>,
}

/// Partial cluster patch; only supplied fields change.
#[derive(Debug, Clone, Default)]
pub struct UpdateClusterRequest {
    pub name: Option<String>,
    pub color: Option<String>,
    pub position: Option<Position>,
    pub size: Option<Size>,
}

impl UpdateClusterRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.position.is_none() && self.size.is_none()
    }
}

// =============================================================================
// CANVAS NODES AND SNAPSHOTS
// =============================================================================

/// Freestanding placement of one annotation instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: Uuid,
    pub org_id: Uuid,
    pub study_id: Option<Uuid>,
    pub annotation_id: Uuid,
    pub position: Position,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable, versioned capture of the whole canvas graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    pub id: Uuid,
    pub org_id: Uuid,
    pub study_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub version_number: i32,
    /// Opaque node/edge/viewport state, stored as given.
    pub canvas_state: JsonValue,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot listing entry without the state blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSnapshotSummary {
    pub id: Uuid,
    pub study_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub version_number: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub description: Option<String>,
    pub study_id: Option<Uuid>,
    pub canvas_state: JsonValue,
}

// =============================================================================
// ACTIVITY
// =============================================================================

/// Last-viewed marker for one user and one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub file_ref_id: Uuid,
    pub viewed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Recently viewed file with its display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentActivity {
    pub file: FileRefSummary,
    pub viewed_at: DateTime<Utc>,
}

// =============================================================================
// MAINTENANCE
// =============================================================================

/// Row counts removed or updated by a maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub malformed_file_refs: u64,
    pub malformed_targets: u64,
    pub targetless_annotations: u64,
    pub orphan_tag_links: u64,
    pub orphan_file_views: u64,
    pub orphan_canvas_nodes: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.malformed_file_refs
            + self.malformed_targets
            + self.targetless_annotations
            + self.orphan_tag_links
            + self.orphan_file_views
            + self.orphan_canvas_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_and_display() {
        assert_eq!(
            "SharePoint".parse::<StorageProviderKind>().unwrap(),
            StorageProviderKind::SharePoint
        );
        assert_eq!(
            "googledrive".parse::<StorageProviderKind>().unwrap(),
            StorageProviderKind::GoogleDrive
        );
        assert!("dropbox".parse::<StorageProviderKind>().is_err());
        assert_eq!(StorageProviderKind::GoogleDrive.to_string(), "googledrive");
    }

    #[test]
    fn test_only_sharepoint_resolvable() {
        assert!(StorageProviderKind::SharePoint.is_resolvable());
        assert!(!StorageProviderKind::GoogleDrive.is_resolvable());
        assert_eq!(StorageProviderKind::default(), StorageProviderKind::SharePoint);
    }

    #[test]
    fn test_size_default_is_canonical() {
        assert_eq!(Size::default(), Size::new(400.0, 300.0));
    }

    #[test]
    fn test_update_cluster_request_empty() {
        assert!(UpdateClusterRequest::default().is_empty());
        let req = UpdateClusterRequest {
            color: Some("#000000".into()),
            ..Default::default()
        };
        assert!(!req.is_empty());
    }

    #[test]
    fn test_cleanup_report_total() {
        let report = CleanupReport {
            malformed_file_refs: 2,
            orphan_canvas_nodes: 3,
            ..Default::default()
        };
        assert_eq!(report.total(), 5);
    }
}
