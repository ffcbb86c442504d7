//! # cluster-core
//!
//! Core types, traits, and validation for cluster research synthesis.
//!
//! This crate holds everything that does not touch the database: the W3C
//! selector model, annotation documents, canvas geometry, the storage
//! provider capability, transcript parsing, and the repository traits that
//! `cluster-db` implements.

pub mod annotation;
pub mod config;
pub mod defaults;
pub mod document;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod models;
pub mod selector;
pub mod storage;
pub mod traits;
pub mod transcript;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use annotation::*;
pub use config::{AppConfig, ConfigError, DatabaseConfig, LogFormat, LoggingConfig};
pub use document::{build_document, check_consistency, patch_document, DocumentInput};
pub use error::{Error, Result};
pub use geometry::{contains, find_containing_cluster};
pub use models::*;
pub use selector::{Selector, SelectorType};
pub use storage::{
    compute_content_hash, ParentReference, StorageContainer, StorageDrive, StorageItem,
    StorageItemKind, StorageProvider, ThumbnailSize,
};
pub use traits::*;
pub use transcript::{parse_vtt, ParsedTranscript, TranscriptCue};
pub use uuid_utils::{from_urn, new_v7, to_urn};
