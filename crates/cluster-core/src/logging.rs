//! Structured logging schema and field name constants for cluster.
//!
//! Both crates use these names for `tracing` fields so that log aggregation
//! can filter on the same keys for every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Transaction failed after partial work, operator attention needed |
//! | WARN  | Integrity anomaly detected, request still answered |
//! | INFO  | Mutations completed (create, update, delete, promote) |
//! | DEBUG | Lookups, absorbed FileRef conflicts, decision points |
//! | TRACE | Per-target and per-row iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "database", "resolver", "annotations", "canvas", "activity", "admin"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "file_refs", "clusters", "snapshots"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "find_or_create", "promote", "soft_delete"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Organization scoping the operation.
pub const ORG_ID: &str = "org_id";

/// Acting user.
pub const USER_ID: &str = "user_id";

pub const ANNOTATION_ID: &str = "annotation_id";

pub const FILE_REF_ID: &str = "file_ref_id";

pub const CLUSTER_ID: &str = "cluster_id";

pub const CANVAS_NODE_ID: &str = "canvas_node_id";

pub const SNAPSHOT_ID: &str = "snapshot_id";

/// Storage provider name ("sharepoint", "googledrive").
pub const PROVIDER: &str = "provider";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of targets on an annotation.
pub const TARGET_COUNT: &str = "target_count";

/// Snapshot version number assigned.
pub const VERSION: &str = "version";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Whether a find-or-create call inserted a new row.
pub const CREATED: &str = "created";

/// Error message for failed operations.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_snake_case() {
        for name in [
            SUBSYSTEM,
            COMPONENT,
            ORG_ID,
            USER_ID,
            ANNOTATION_ID,
            FILE_REF_ID,
            CLUSTER_ID,
            CANVAS_NODE_ID,
            SNAPSHOT_ID,
            PROVIDER,
            DURATION_MS,
            RESULT_COUNT,
            TARGET_COUNT,
            VERSION,
            CREATED,
            ERROR_MSG,
        ] {
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
        assert_eq!(OPERATION, "op");
    }
}
