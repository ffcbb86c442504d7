//! Annotation domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::{FileMetadata, FileRefSummary, StorageProviderKind};
use crate::selector::{Selector, SelectorType};

/// W3C Web Annotation motivation vocabulary (subset used by research annotations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Motivation {
    Highlighting,
    Tagging,
    Classifying,
    Commenting,
    Describing,
    Linking,
    Questioning,
    Bookmarking,
}

impl Motivation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Motivation::Highlighting => "highlighting",
            Motivation::Tagging => "tagging",
            Motivation::Classifying => "classifying",
            Motivation::Commenting => "commenting",
            Motivation::Describing => "describing",
            Motivation::Linking => "linking",
            Motivation::Questioning => "questioning",
            Motivation::Bookmarking => "bookmarking",
        }
    }
}

impl fmt::Display for Motivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Motivation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "highlighting" => Ok(Motivation::Highlighting),
            "tagging" => Ok(Motivation::Tagging),
            "classifying" => Ok(Motivation::Classifying),
            "commenting" => Ok(Motivation::Commenting),
            "describing" => Ok(Motivation::Describing),
            "linking" => Ok(Motivation::Linking),
            "questioning" => Ok(Motivation::Questioning),
            "bookmarking" => Ok(Motivation::Bookmarking),
            _ => Err(format!("Invalid motivation: {}", s)),
        }
    }
}

/// A persisted annotation with its targets and tag links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub study_id: Option<Uuid>,
    pub motivation: Vec<Motivation>,
    pub creator_id: Uuid,
    pub body_text: Option<String>,
    pub participant_id: Option<String>,
    pub session_id: Option<String>,
    /// Materialized W3C JSON-LD document.
    pub jsonld: JsonValue,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub targets: Vec<AnnotationTarget>,
    pub tag_ids: Vec<Uuid>,
}

/// One selector anchored to one file. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationTarget {
    pub id: Uuid,
    pub annotation_id: Uuid,
    pub file_ref_id: Uuid,
    /// Position in the document's `target` array.
    pub ordinal: i32,
    pub selector_type: SelectorType,
    pub selector: Selector,
    pub exact_text: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    /// Display metadata of the referenced file.
    pub file: Option<FileRefSummary>,
}

/// Target input: external file identity plus a selector candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTargetRequest {
    #[serde(default)]
    pub provider: StorageProviderKind,
    pub drive_id: String,
    pub item_id: String,
    /// Raw selector JSON, validated before any write.
    pub selector: JsonValue,
    pub exact_text: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub file_metadata: Option<FileMetadata>,
}

impl CreateTargetRequest {
    /// Target with a text quote selector on a SharePoint item.
    pub fn text_quote(drive_id: &str, item_id: &str, exact: &str) -> Self {
        Self {
            provider: StorageProviderKind::SharePoint,
            drive_id: drive_id.to_string(),
            item_id: item_id.to_string(),
            selector: serde_json::json!({"type": "TextQuoteSelector", "exact": exact}),
            exact_text: Some(exact.to_string()),
            start_time: None,
            end_time: None,
            file_metadata: None,
        }
    }
}

/// Request for creating an annotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAnnotationRequest {
    pub motivation: Vec<Motivation>,
    pub body_text: Option<String>,
    pub targets: Vec<CreateTargetRequest>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
    pub study_id: Option<Uuid>,
    pub participant_id: Option<String>,
    pub session_id: Option<String>,
}

/// Partial update. `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct UpdateAnnotationRequest {
    pub motivation: Option<Vec<Motivation>>,
    pub body_text: Option<Option<String>>,
    /// Replaces the whole tag set when present.
    pub tag_ids: Option<Vec<Uuid>>,
    pub study_id: Option<Option<Uuid>>,
    pub participant_id: Option<Option<String>>,
    pub session_id: Option<Option<String>>,
}

impl UpdateAnnotationRequest {
    /// True when no field affecting the JSON-LD document is set.
    pub fn is_document_noop(&self) -> bool {
        self.motivation.is_none()
            && self.body_text.is_none()
            && self.study_id.is_none()
            && self.participant_id.is_none()
            && self.session_id.is_none()
    }
}

/// Filters for listing annotations.
///
/// `tag_ids` is applied after `limit`/`offset`, so a tag-filtered page may
/// hold fewer than `limit` annotations.
#[derive(Debug, Clone, Default)]
pub struct ListAnnotationsRequest {
    pub study_id: Option<Uuid>,
    pub tag_ids: Option<Vec<Uuid>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motivation_round_trip() {
        for m in [
            Motivation::Highlighting,
            Motivation::Tagging,
            Motivation::Classifying,
            Motivation::Commenting,
            Motivation::Describing,
            Motivation::Linking,
            Motivation::Questioning,
            Motivation::Bookmarking,
        ] {
            assert_eq!(m.to_string().parse::<Motivation>().unwrap(), m);
        }
        assert!("editing".parse::<Motivation>().is_err());
    }

    #[test]
    fn test_motivation_serde_lowercase() {
        let json = serde_json::to_string(&vec![Motivation::Questioning]).unwrap();
        assert_eq!(json, r#"["questioning"]"#);
    }

    #[test]
    fn test_update_noop_detection() {
        assert!(UpdateAnnotationRequest::default().is_document_noop());
        let req = UpdateAnnotationRequest {
            tag_ids: Some(vec![]),
            ..Default::default()
        };
        assert!(req.is_document_noop());
        let req = UpdateAnnotationRequest {
            session_id: Some(None),
            ..Default::default()
        };
        assert!(!req.is_document_noop());
    }
}
