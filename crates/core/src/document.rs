//! Typed accessors over the raw catcha document.
//!
//! The raw `serde_json::Value` document is the single source of truth for
//! an annotation; everything the rest of the system needs (creator,
//! permissions, body text, tags, targets, reply linkage) is read from it
//! through the helpers here. The relational columns are a derived
//! projection recomputed from these accessors on every write and never
//! read back for serialization.

use serde_json::Value;

use crate::error::CoreError;
use crate::media::{BodyPurpose, MediaType, TargetType, MAX_TAG_LENGTH};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Envelope accessors
// ---------------------------------------------------------------------------

/// The annotation id, stringified when a client sent a bare number.
pub fn id_of(doc: &Value) -> Option<String> {
    match doc.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// The `created` timestamp string, if present.
pub fn created_of(doc: &Value) -> Option<&str> {
    doc.get("created").and_then(Value::as_str)
}

/// The `modified` timestamp string, if present.
pub fn modified_of(doc: &Value) -> Option<&str> {
    doc.get("modified").and_then(Value::as_str)
}

/// Parse an external wire timestamp (RFC 3339 / ISO 8601 with offset).
pub fn parse_timestamp(s: &str) -> Result<Timestamp, CoreError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| CoreError::Validation(format!("invalid timestamp '{s}': {e}")))
}

// ---------------------------------------------------------------------------
// Creator
// ---------------------------------------------------------------------------

/// The annotation's creator, read from `creator.{id, name}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Creator {
    pub id: String,
    pub name: String,
}

/// Read the creator. Missing fields default to the empty string; the
/// create-conflict check rejects an empty creator id before persistence.
pub fn creator_of(doc: &Value) -> Creator {
    let creator = doc.get("creator");
    let field = |key: &str| -> String {
        creator
            .and_then(|c| c.get(key))
            .map(scalar_to_string)
            .unwrap_or_default()
    };
    Creator {
        id: field("id"),
        name: field("name"),
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// The four per-annotation permission sets. An empty `can_read` means the
/// annotation is public.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    pub can_read: Vec<String>,
    pub can_update: Vec<String>,
    pub can_delete: Vec<String>,
    pub can_admin: Vec<String>,
}

/// Read the permission sets from `permissions.can_*`; missing arrays are
/// treated as empty.
pub fn permissions_of(doc: &Value) -> Permissions {
    let perms = doc.get("permissions");
    let set = |key: &str| -> Vec<String> {
        perms
            .and_then(|p| p.get(key))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(scalar_to_string).collect())
            .unwrap_or_default()
    };
    Permissions {
        can_read: set("can_read"),
        can_update: set("can_update"),
        can_delete: set("can_delete"),
        can_admin: set("can_admin"),
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The HxAT platform block embedded in every catcha document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Platform {
    pub platform_name: String,
    pub context_id: String,
    pub collection_id: String,
    pub target_source_id: String,
}

/// Read the platform block, requiring `context_id`, `collection_id` and
/// `target_source_id`. Missing any of them is a hard error naming the
/// field; the legacy dialect cannot be produced without them.
pub fn require_platform(doc: &Value) -> Result<Platform, CoreError> {
    let platform = doc
        .get("platform")
        .ok_or_else(|| CoreError::Validation("document is missing 'platform'".into()))?;
    let required = |key: &str| -> Result<String, CoreError> {
        platform
            .get(key)
            .map(scalar_to_string)
            .ok_or_else(|| CoreError::Validation(format!("platform is missing '{key}'")))
    };
    Ok(Platform {
        platform_name: platform
            .get("platform_name")
            .map(scalar_to_string)
            .unwrap_or_default(),
        context_id: required("context_id")?,
        collection_id: required("collection_id")?,
        target_source_id: required("target_source_id")?,
    })
}

/// Whether the document is pre-flagged as deleted (`platform.deleted`),
/// as set by exporters on soft-deleted rows.
pub fn platform_deleted(doc: &Value) -> bool {
    doc.get("platform")
        .and_then(|p| p.get("deleted"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Body grouping
// ---------------------------------------------------------------------------

/// The grouped body of an annotation: exactly one commenting-or-replying
/// item supplies the text, zero-or-more tagging items supply tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyGroups {
    pub text: String,
    pub format: String,
    pub purpose: BodyPurpose,
    /// Tag values, deduplicated by value with first-occurrence order kept.
    pub tags: Vec<String>,
}

/// Group the body items of a catcha document.
///
/// Errors when the body is missing, when no commenting-or-replying item is
/// present, when more than one is, or when a tag value exceeds
/// [`MAX_TAG_LENGTH`] (surfaced here so it never reaches the database as a
/// raw constraint error).
pub fn group_body_items(doc: &Value) -> Result<BodyGroups, CoreError> {
    let items = doc
        .get("body")
        .and_then(|b| b.get("items"))
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::Validation("document is missing 'body.items'".into()))?;

    let mut primary: Option<(String, String, BodyPurpose)> = None;
    let mut tags: Vec<String> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        let purpose_str = item
            .get("purpose")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::Validation(format!("body.items[{i}] is missing 'purpose'"))
            })?;
        let purpose = BodyPurpose::from_str(purpose_str)?;
        let value = item
            .get("value")
            .map(scalar_to_string)
            .unwrap_or_default();

        match purpose {
            BodyPurpose::Tagging => {
                if value.len() > MAX_TAG_LENGTH {
                    return Err(CoreError::Validation(format!(
                        "tag value exceeds maximum length of {MAX_TAG_LENGTH} characters"
                    )));
                }
                if !value.is_empty() && !tags.contains(&value) {
                    tags.push(value);
                }
            }
            BodyPurpose::Commenting | BodyPurpose::Replying => {
                if primary.is_some() {
                    return Err(CoreError::Validation(
                        "document has more than one commenting/replying body item".into(),
                    ));
                }
                let format = item
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or("text/html")
                    .to_string();
                primary = Some((value, format, purpose));
            }
        }
    }

    let (text, format, purpose) = primary.ok_or_else(|| {
        CoreError::Validation("document has no commenting or replying body item".into())
    })?;

    Ok(BodyGroups {
        text,
        format,
        purpose,
        tags,
    })
}

// ---------------------------------------------------------------------------
// Target extraction
// ---------------------------------------------------------------------------

/// One addressable object the annotation points at.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetItem {
    pub source: String,
    pub media: MediaType,
    pub format: Option<String>,
    pub selector: Option<Value>,
    pub scope: Option<Value>,
}

/// Extract the target envelope of a catcha document.
///
/// Enforces the structural invariants: at least one target item, and
/// `Choice` only for exactly one `Image` plus an optional `Thumbnail`.
pub fn extract_targets(doc: &Value) -> Result<(TargetType, Vec<TargetItem>), CoreError> {
    let envelope = doc
        .get("target")
        .ok_or_else(|| CoreError::Validation("document is missing 'target'".into()))?;
    let target_type = TargetType::from_str(
        envelope
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Validation("target is missing 'type'".into()))?,
    )?;
    let raw_items = envelope
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::Validation("target is missing 'items'".into()))?;

    if raw_items.is_empty() {
        return Err(CoreError::Validation(
            "document has an empty target list".into(),
        ));
    }

    let mut items = Vec::with_capacity(raw_items.len());
    for (i, raw) in raw_items.iter().enumerate() {
        let source = raw
            .get("source")
            .map(scalar_to_string)
            .ok_or_else(|| {
                CoreError::Validation(format!("target.items[{i}] is missing 'source'"))
            })?;
        let media = MediaType::from_str(
            raw.get("type").and_then(Value::as_str).ok_or_else(|| {
                CoreError::Validation(format!("target.items[{i}] is missing 'type'"))
            })?,
        )?;
        items.push(TargetItem {
            source,
            media,
            format: raw.get("format").and_then(Value::as_str).map(String::from),
            selector: raw.get("selector").cloned(),
            scope: raw.get("scope").cloned(),
        });
    }

    if target_type == TargetType::Choice {
        let images = items.iter().filter(|t| t.media == MediaType::Image).count();
        let thumbs = items
            .iter()
            .filter(|t| t.media == MediaType::Thumbnail)
            .count();
        if images != 1 || thumbs > 1 || images + thumbs != items.len() {
            return Err(CoreError::UnsupportedShape(
                "Choice target requires exactly one Image plus an optional Thumbnail".into(),
            ));
        }
    }

    Ok((target_type, items))
}

/// The id of the annotation this document replies to, when its target is
/// another annotation.
pub fn reply_to(doc: &Value) -> Result<Option<String>, CoreError> {
    let (_, items) = extract_targets(doc)?;
    Ok(items
        .iter()
        .find(|t| t.media == MediaType::Annotation)
        .map(|t| t.source.clone()))
}

/// Render a scalar JSON value to a string (numbers stringified, strings
/// passed through, anything else via its JSON rendering).
pub fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
