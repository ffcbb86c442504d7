//! Storage provider abstraction.
//!
//! The persistence layer only depends on the common item shape below
//! (identifier, name, MIME type, size, parent, file-or-folder). Provider
//! clients (Microsoft Graph, Google Drive) implement [`StorageProvider`]
//! outside this workspace.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{FileMetadata, StorageProviderKind};

/// Top-level container (SharePoint site, shared drive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageContainer {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub web_url: Option<String>,
}

/// Drive or document library within a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDrive {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub drive_type: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentReference {
    pub drive_id: String,
    /// Parent folder id, `root` at the top of a drive.
    pub id: String,
    pub path: Option<String>,
}

/// File-vs-folder discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageItemKind {
    File { mime_type: String },
    Folder { child_count: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub id: String,
    pub name: String,
    pub size: Option<i64>,
    pub web_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: DateTime<Utc>,
    pub kind: StorageItemKind,
    pub parent: ParentReference,
}

impl StorageItem {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, StorageItemKind::File { .. })
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, StorageItemKind::Folder { .. })
    }

    pub fn mime_type(&self) -> Option<&str> {
        match &self.kind {
            StorageItemKind::File { mime_type } => Some(mime_type.as_str()),
            StorageItemKind::Folder { .. } => None,
        }
    }

    /// Video, audio, or image content.
    pub fn is_media_file(&self) -> bool {
        self.mime_type().is_some_and(|m| {
            m.starts_with("video/") || m.starts_with("audio/") || m.starts_with("image/")
        })
    }

    pub fn is_video_file(&self) -> bool {
        self.mime_type().is_some_and(|m| m.starts_with("video/"))
    }

    pub fn is_audio_file(&self) -> bool {
        self.mime_type().is_some_and(|m| m.starts_with("audio/"))
    }

    /// Display metadata to store on the FileRef for this item.
    pub fn file_metadata(&self, site_id: Option<String>) -> FileMetadata {
        FileMetadata {
            name: Some(self.name.clone()),
            mime_type: self.mime_type().map(str::to_string),
            size_bytes: self.size,
            web_url: self.web_url.clone(),
            site_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThumbnailSize::Small => "small",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Large => "large",
        };
        f.write_str(s)
    }
}

/// Cloud storage capability consumed by the resolver.
///
/// Implementations map transport failures to [`crate::Error::Storage`].
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn kind(&self) -> StorageProviderKind;

    async fn list_containers(&self) -> Result<Vec<StorageContainer>>;

    async fn get_container(&self, container_id: &str) -> Result<StorageContainer>;

    async fn list_drives(&self, container_id: &str) -> Result<Vec<StorageDrive>>;

    /// List items in a folder; `None` lists the drive root.
    async fn list_items(&self, drive_id: &str, folder_id: Option<&str>) -> Result<Vec<StorageItem>>;

    async fn get_item(&self, drive_id: &str, item_id: &str) -> Result<StorageItem>;

    async fn get_download_url(&self, drive_id: &str, item_id: &str) -> Result<String>;

    async fn get_file_content(&self, drive_id: &str, item_id: &str) -> Result<Vec<u8>>;

    async fn get_thumbnail(
        &self,
        drive_id: &str,
        item_id: &str,
        size: ThumbnailSize,
    ) -> Result<Option<String>>;
}

/// SHA-256 hex digest of file content, as stored in `file_refs.content_hash`.
pub fn compute_content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
