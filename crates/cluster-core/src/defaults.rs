//! Centralized default constants for cluster.
//!
//! Repositories, the admin binary, and tests reference these values instead
//! of repeating magic numbers.

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for annotation listing.
pub const PAGE_LIMIT: i64 = 50;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

/// Default number of entries returned by recent activity.
pub const RECENT_ACTIVITY_LIMIT: i64 = 10;

// =============================================================================
// SELECTORS
// =============================================================================

/// Maximum nesting depth of `RangeSelector` composition.
pub const SELECTOR_MAX_DEPTH: usize = 8;

/// `conformsTo` value for W3C media fragment selectors.
pub const MEDIA_FRAGMENTS_URI: &str = "http://www.w3.org/TR/media-frags/";

// =============================================================================
// ANNOTATION DOCUMENT
// =============================================================================

/// W3C Web Annotation JSON-LD context.
pub const ANNO_CONTEXT: &str = "http://www.w3.org/ns/anno.jsonld";

/// Research provenance extension context.
pub const RESEARCH_CONTEXT: &str = "https://research-annotations.io/ns/research.jsonld";

/// Purpose attached to textual bodies.
pub const BODY_PURPOSE: &str = "describing";

// =============================================================================
// CANVAS
// =============================================================================

/// Canonical cluster width when none is supplied.
pub const CLUSTER_WIDTH: f64 = 400.0;

/// Canonical cluster height when none is supplied.
pub const CLUSTER_HEIGHT: f64 = 300.0;

/// Default cluster fill color.
pub const CLUSTER_COLOR: &str = "#FDE68A";

/// Attempts at allocating a snapshot version before giving up.
pub const SNAPSHOT_VERSION_RETRIES: u32 = 5;

// =============================================================================
// FILE REFERENCES
// =============================================================================

/// Display name stored when metadata is absent at creation.
pub const UNKNOWN_FILE_NAME: &str = "Unknown File";

/// Placeholder drive id written by early clients; treated as malformed.
pub const PLACEHOLDER_DRIVE_ID: &str = "unknown";

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default minimum number of pooled connections.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Default pool acquire timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_default_size() {
        assert_eq!(CLUSTER_WIDTH, 400.0);
        assert_eq!(CLUSTER_HEIGHT, 300.0);
    }

    #[test]
    fn test_pool_bounds_consistent() {
        assert!(DB_MIN_CONNECTIONS <= DB_MAX_CONNECTIONS);
    }
}
