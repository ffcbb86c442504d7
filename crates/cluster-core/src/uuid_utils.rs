//! Identifier helpers.
//!
//! Rows use UUIDv7 (time-ordered) primary keys. Annotation documents refer to
//! entities with `urn:uuid:` IRIs.

use uuid::Uuid;

const URN_PREFIX: &str = "urn:uuid:";

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use cluster_core::uuid_utils::new_v7;
///
/// let a = new_v7();
/// let b = new_v7();
/// assert_ne!(a, b);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Render an id as a `urn:uuid:` IRI.
pub fn to_urn(id: Uuid) -> String {
    format!("{}{}", URN_PREFIX, id)
}

/// Parse a `urn:uuid:` IRI back into an id.
pub fn from_urn(urn: &str) -> Option<Uuid> {
    urn.strip_prefix(URN_PREFIX)
        .and_then(|s| Uuid::parse_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_version() {
        assert_eq!(new_v7().get_version_num(), 7);
    }

    #[test]
    fn test_urn_round_trip() {
        let id = new_v7();
        let urn = to_urn(id);
        assert!(urn.starts_with("urn:uuid:"));
        assert_eq!(from_urn(&urn), Some(id));
    }

    #[test]
    fn test_from_urn_rejects_other_schemes() {
        assert_eq!(from_urn("https://example.com/1"), None);
        assert_eq!(from_urn("urn:uuid:not-a-uuid"), None);
    }
}
