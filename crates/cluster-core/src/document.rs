//! Materialized W3C Web Annotation JSON-LD.
//!
//! The document is built once at creation and afterwards patched key by key,
//! so extension keys written by other tools survive updates. Cleared fields
//! are removed from the document rather than written as `null`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use crate::annotation::{Annotation, Motivation, UpdateAnnotationRequest};
use crate::defaults::{ANNO_CONTEXT, BODY_PURPOSE, RESEARCH_CONTEXT};
use crate::selector::Selector;
use crate::uuid_utils::to_urn;
use crate::{Error, Result};

pub const KEY_STUDY: &str = "research:study";
pub const KEY_PARTICIPANT: &str = "research:participant";
pub const KEY_SESSION: &str = "research:session";

/// Inputs for a freshly created annotation document.
#[derive(Debug, Clone)]
pub struct DocumentInput<'a> {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub created: DateTime<Utc>,
    pub motivation: &'a [Motivation],
    pub body_text: Option<&'a str>,
    /// `(file_ref_id, selector)` in target order.
    pub targets: Vec<(Uuid, &'a Selector)>,
    pub study_id: Option<Uuid>,
    pub participant_id: Option<&'a str>,
    pub session_id: Option<&'a str>,
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn textual_body(value: &str) -> JsonValue {
    json!({
        "type": "TextualBody",
        "value": value,
        "purpose": BODY_PURPOSE,
    })
}

fn set_or_remove(doc: &mut Map<String, JsonValue>, key: &str, value: Option<JsonValue>) {
    match value {
        Some(v) => {
            doc.insert(key.to_string(), v);
        }
        None => {
            doc.remove(key);
        }
    }
}

/// Build the initial document for a new annotation.
pub fn build_document(input: &DocumentInput<'_>) -> Result<JsonValue> {
    let mut doc = Map::new();
    doc.insert("@context".into(), json!([ANNO_CONTEXT, RESEARCH_CONTEXT]));
    doc.insert("id".into(), json!(to_urn(input.id)));
    doc.insert("type".into(), json!("Annotation"));
    doc.insert("motivation".into(), serde_json::to_value(input.motivation)?);
    doc.insert(
        "creator".into(),
        json!({ "id": to_urn(input.creator_id), "type": "Person" }),
    );
    doc.insert("created".into(), json!(timestamp(input.created)));
    doc.insert("modified".into(), json!(timestamp(input.created)));

    fn non_empty(s: Option<&str>) -> Option<&str> {
        s.filter(|v| !v.is_empty())
    }
    if let Some(body) = non_empty(input.body_text) {
        doc.insert("body".into(), textual_body(body));
    }

    let mut targets = Vec::with_capacity(input.targets.len());
    for (file_ref_id, selector) in &input.targets {
        targets.push(json!({
            "source": to_urn(*file_ref_id),
            "selector": selector.to_json()?,
        }));
    }
    doc.insert("target".into(), JsonValue::Array(targets));

    if let Some(study) = input.study_id {
        doc.insert(KEY_STUDY.into(), json!(to_urn(study)));
    }
    if let Some(p) = non_empty(input.participant_id) {
        doc.insert(KEY_PARTICIPANT.into(), json!(p));
    }
    if let Some(s) = non_empty(input.session_id) {
        doc.insert(KEY_SESSION.into(), json!(s));
    }

    Ok(JsonValue::Object(doc))
}

/// Merge the semantically changed keys of `req` into an existing document.
///
/// Keys not touched by the request are left exactly as stored.
pub fn patch_document(
    doc: &JsonValue,
    req: &UpdateAnnotationRequest,
    modified: DateTime<Utc>,
) -> Result<JsonValue> {
    let mut map = doc
        .as_object()
        .cloned()
        .ok_or_else(|| Error::Internal("stored annotation document is not an object".into()))?;

    map.insert("modified".into(), json!(timestamp(modified)));

    if let Some(motivation) = &req.motivation {
        map.insert("motivation".into(), serde_json::to_value(motivation)?);
    }
    if let Some(body) = &req.body_text {
        let value = body.as_deref().filter(|b| !b.is_empty()).map(textual_body);
        set_or_remove(&mut map, "body", value);
    }
    if let Some(study) = &req.study_id {
        set_or_remove(&mut map, KEY_STUDY, study.map(|id| json!(to_urn(id))));
    }
    if let Some(participant) = &req.participant_id {
        let value = participant.as_deref().filter(|p| !p.is_empty()).map(|p| json!(p));
        set_or_remove(&mut map, KEY_PARTICIPANT, value);
    }
    if let Some(session) = &req.session_id {
        let value = session.as_deref().filter(|s| !s.is_empty()).map(|s| json!(s));
        set_or_remove(&mut map, KEY_SESSION, value);
    }

    Ok(JsonValue::Object(map))
}

/// Check that the document agrees with the relational fields.
pub fn check_consistency(annotation: &Annotation) -> Result<()> {
    let doc = &annotation.jsonld;
    let mismatch = |what: &str| {
        Err(Error::Internal(format!(
            "annotation {} document out of sync: {}",
            annotation.id, what
        )))
    };

    if doc["id"] != json!(to_urn(annotation.id)) {
        return mismatch("id");
    }
    if doc["motivation"] != serde_json::to_value(&annotation.motivation)? {
        return mismatch("motivation");
    }
    let body = annotation
        .body_text
        .as_deref()
        .filter(|b| !b.is_empty())
        .map(textual_body);
    if doc.get("body").cloned() != body {
        return mismatch("body");
    }
    let study = annotation.study_id.map(|id| json!(to_urn(id)));
    if doc.get(KEY_STUDY).cloned() != study {
        return mismatch("study");
    }
    let text = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(|s| json!(s));
    if doc.get(KEY_PARTICIPANT).cloned() != text(&annotation.participant_id) {
        return mismatch("participant");
    }
    if doc.get(KEY_SESSION).cloned() != text(&annotation.session_id) {
        return mismatch("session");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_selector() -> Selector {
        Selector::TextQuote {
            exact: "hello".into(),
            prefix: None,
            suffix: None,
        }
    }

    fn build(selector: &Selector) -> JsonValue {
        let motivation = [Motivation::Highlighting, Motivation::Commenting];
        build_document(&DocumentInput {
            id: Uuid::nil(),
            creator_id: Uuid::max(),
            created: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            motivation: &motivation,
            body_text: Some("interesting"),
            targets: vec![(Uuid::nil(), selector)],
            study_id: None,
            participant_id: Some("P-07"),
            session_id: None,
        })
        .unwrap()
    }

    #[test]
    fn test_build_document_shape() {
        let selector = sample_selector();
        let doc = build(&selector);

        assert_eq!(doc["@context"][0], ANNO_CONTEXT);
        assert_eq!(doc["id"], format!("urn:uuid:{}", Uuid::nil()));
        assert_eq!(doc["type"], "Annotation");
        assert_eq!(doc["motivation"], json!(["highlighting", "commenting"]));
        assert_eq!(doc["creator"]["type"], "Person");
        assert_eq!(doc["created"], "2026-01-02T03:04:05.000Z");
        assert_eq!(doc["body"]["purpose"], "describing");
        assert_eq!(doc["target"][0]["selector"]["exact"], "hello");
        assert_eq!(doc[KEY_PARTICIPANT], "P-07");
        assert!(doc.get(KEY_STUDY).is_none());
        assert!(doc.get(KEY_SESSION).is_none());
    }

    #[test]
    fn test_build_document_omits_empty_strings() {
        let selector = sample_selector();
        let doc = build_document(&DocumentInput {
            id: Uuid::nil(),
            creator_id: Uuid::max(),
            created: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            motivation: &[Motivation::Bookmarking],
            body_text: Some(""),
            targets: vec![(Uuid::nil(), &selector)],
            study_id: None,
            participant_id: Some(""),
            session_id: Some("S-2"),
        })
        .unwrap();

        assert!(doc.get("body").is_none());
        assert!(doc.get(KEY_PARTICIPANT).is_none());
        assert_eq!(doc[KEY_SESSION], "S-2");
    }

    #[test]
    fn test_patch_preserves_extensions() {
        let selector = sample_selector();
        let mut doc = build(&selector);
        doc["research:codebook"] = json!("v3");

        let req = UpdateAnnotationRequest {
            motivation: Some(vec![Motivation::Tagging]),
            ..Default::default()
        };
        let modified = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let patched = patch_document(&doc, &req, modified).unwrap();

        assert_eq!(patched["research:codebook"], "v3");
        assert_eq!(patched["motivation"], json!(["tagging"]));
        assert_eq!(patched["body"], doc["body"]);
        assert_eq!(patched["target"], doc["target"]);
        assert_eq!(patched["modified"], "2026-02-01T00:00:00.000Z");
        assert_eq!(patched["created"], doc["created"]);
    }

    #[test]
    fn test_patch_clears_fields() {
        let selector = sample_selector();
        let doc = build(&selector);
        let req = UpdateAnnotationRequest {
            body_text: Some(None),
            participant_id: Some(None),
            study_id: Some(Some(Uuid::nil())),
            ..Default::default()
        };
        let patched = patch_document(&doc, &req, Utc::now()).unwrap();
        assert!(patched.get("body").is_none());
        assert!(patched.get(KEY_PARTICIPANT).is_none());
        assert_eq!(patched[KEY_STUDY], format!("urn:uuid:{}", Uuid::nil()));
    }

    #[test]
    fn test_patch_rejects_non_object() {
        let req = UpdateAnnotationRequest::default();
        assert!(patch_document(&json!([1, 2]), &req, Utc::now()).is_err());
    }

    #[test]
    fn test_check_consistency_detects_drift() {
        let selector = sample_selector();
        let doc = build(&selector);
        let mut annotation = Annotation {
            id: Uuid::nil(),
            org_id: Uuid::nil(),
            study_id: None,
            motivation: vec![Motivation::Highlighting, Motivation::Commenting],
            creator_id: Uuid::max(),
            body_text: Some("interesting".into()),
            participant_id: Some("P-07".into()),
            session_id: None,
            jsonld: doc,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            deleted_at: None,
            targets: vec![],
            tag_ids: vec![],
        };
        assert!(check_consistency(&annotation).is_ok());

        annotation.session_id = Some("S-1".into());
        assert!(check_consistency(&annotation).is_err());
    }
}
