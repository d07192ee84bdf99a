//! Two-way format converter between the legacy AnnotatorJS dialect and the
//! catcha (web-annotation) dialect.
//!
//! Both directions are lossy and direction-dependent; round-trip
//! correctness under the [`are_similar_annojs`] equivalence relation is the
//! load-bearing invariant of the service. Dispatch is an exhaustive match
//! over the closed media enums; anything outside the closed set is an
//! `UnsupportedShape` error, never a silent default.

use serde_json::{json, Map, Value};

use crate::document::{self, scalar_to_string, TargetItem};
use crate::error::CoreError;
use crate::media::{
    AnnojsMedia, MediaType, TargetType, CATCHA_CONTEXT_IRI, CATCHA_SCHEMA_VERSION,
    DEFAULT_PLATFORM_NAME, NO_PARENT, PLACEHOLDER_ID, UNKNOWN_PLATFORM_FIELD,
};
use crate::selector;
use crate::types::now_timestamp;

// ---------------------------------------------------------------------------
// AnnotatorJS -> catcha
// ---------------------------------------------------------------------------

/// Convert a legacy AnnotatorJS document into a catcha document.
///
/// `media` and `uri` are required; `created`/`updated` default to now
/// (UTC, second precision); `contextId`/`collectionId` default to the
/// literal `"unknown"`. The id is carried through when present and
/// stripped entirely when it was never supplied (signals to-be-created).
pub fn convert_to_catcha(js: &Value) -> Result<Value, CoreError> {
    let obj = js.as_object().ok_or_else(|| {
        CoreError::Validation("annotatorjs document must be a JSON object".into())
    })?;

    let media_str = obj
        .get("media")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::Validation("missing required key 'media'".into()))?;
    let media = AnnojsMedia::from_str(media_str)?;
    let uri = obj
        .get("uri")
        .map(scalar_to_string)
        .ok_or_else(|| CoreError::Validation("missing required key 'uri'".into()))?;

    // -- envelope --
    let supplied_id = document::id_of(js);
    let id = supplied_id
        .clone()
        .unwrap_or_else(|| PLACEHOLDER_ID.to_string());
    let now = now_timestamp();
    let created = obj
        .get("created")
        .and_then(Value::as_str)
        .unwrap_or(&now)
        .to_string();
    let modified = obj
        .get("updated")
        .and_then(Value::as_str)
        .unwrap_or(&now)
        .to_string();

    let user = obj.get("user");
    let user_field = |key: &str| -> String {
        user.and_then(|u| u.get(key))
            .map(scalar_to_string)
            .unwrap_or_default()
    };

    let perms = obj.get("permissions");
    let perm_set = |key: &str| -> Vec<String> {
        perms
            .and_then(|p| p.get(key))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(scalar_to_string).collect())
            .unwrap_or_default()
    };

    let context_id = obj
        .get("contextId")
        .map(scalar_to_string)
        .unwrap_or_else(|| UNKNOWN_PLATFORM_FIELD.to_string());
    let collection_id = obj
        .get("collectionId")
        .map(scalar_to_string)
        .unwrap_or_else(|| UNKNOWN_PLATFORM_FIELD.to_string());
    let mut target_source_id = uri.clone();

    // -- body --
    let purpose = if media == AnnojsMedia::Comment {
        "replying"
    } else {
        "commenting"
    };
    let text = obj.get("text").map(scalar_to_string).unwrap_or_default();
    let mut body_items = vec![json!({
        "type": "TextualBody",
        "purpose": purpose,
        "format": "text/html",
        "value": text,
    })];
    if let Some(tags) = obj.get("tags").and_then(Value::as_array) {
        // No dedup here; grouping dedups before persistence.
        for tag in tags {
            body_items.push(json!({
                "type": "TextualBody",
                "purpose": "tagging",
                "value": scalar_to_string(tag),
            }));
        }
    }

    // -- target --
    let mut target_type = TargetType::List;
    let mut target_items: Vec<Value> = Vec::new();

    match media {
        AnnojsMedia::Comment => {
            let parent = obj
                .get("parent")
                .map(scalar_to_string)
                .filter(|p| !p.is_empty() && p != NO_PARENT)
                .ok_or_else(|| {
                    CoreError::Validation(
                        "comment document requires a non-zero 'parent'".into(),
                    )
                })?;
            target_items.push(json!({
                "source": parent,
                "type": MediaType::Annotation.as_str(),
                "format": "text/html",
            }));
            // A reply's platform source is the annotation it replies to,
            // overriding the uri-derived value.
            target_source_id = parent;
        }

        AnnojsMedia::Text => {
            let ranges = obj.get("ranges").and_then(Value::as_array).ok_or_else(|| {
                CoreError::Validation("text document is missing required key 'ranges'".into())
            })?;
            let mut selector_items = Vec::with_capacity(ranges.len() + 1);
            for range in ranges {
                let range_obj = range.as_object().ok_or_else(|| {
                    CoreError::Validation("text range must be a JSON object".into())
                })?;
                selector_items.push(selector::range_selector(range_obj)?);
            }
            let quote = obj.get("quote").and_then(Value::as_str).unwrap_or("");
            let has_ranges = !selector_items.is_empty();
            if !quote.is_empty() {
                selector_items.push(selector::text_quote_selector(quote));
            }
            // Range selector first, then quote; both present makes the
            // selector a choice between the two strategies.
            let selector_type = if has_ranges && !quote.is_empty() {
                TargetType::Choice
            } else {
                TargetType::List
            };
            let mut item = json!({
                "source": uri,
                "type": MediaType::Text.as_str(),
                "format": "text/html",
            });
            if !selector_items.is_empty() {
                item["selector"] = json!({
                    "type": selector_type.as_str(),
                    "items": selector_items,
                });
            }
            target_items.push(item);
        }

        AnnojsMedia::Video | AnnojsMedia::Audio => {
            let media_type = if media == AnnojsMedia::Video {
                MediaType::Video
            } else {
                MediaType::Audio
            };
            let range_time = obj.get("rangeTime").ok_or_else(|| {
                CoreError::Validation(format!(
                    "{media} document is missing required key 'rangeTime'"
                ))
            })?;
            let time_field = |key: &str| -> Result<&Value, CoreError> {
                range_time.get(key).ok_or_else(|| {
                    CoreError::Validation(format!("rangeTime is missing '{key}'"))
                })
            };
            let start = time_field("start")?;
            let end = time_field("end")?;

            let target = obj.get("target").ok_or_else(|| {
                CoreError::Validation(format!(
                    "{media} document is missing required key 'target'"
                ))
            })?;
            let target_field = |key: &str| -> Result<String, CoreError> {
                target.get(key).map(scalar_to_string).ok_or_else(|| {
                    CoreError::Validation(format!("target is missing '{key}'"))
                })
            };
            let container = target_field("container")?;
            let src = target_field("src")?;
            let ext = target_field("ext")?;

            target_items.push(json!({
                "source": src,
                "type": media_type.as_str(),
                "format": format!("{}/{}", media.as_str(), ext.to_lowercase()),
                "selector": {
                    "type": TargetType::List.as_str(),
                    "items": [selector::time_fragment_selector(start, end, &container)],
                },
            }));
        }

        AnnojsMedia::Image => {
            let range_position = obj.get("rangePosition").ok_or_else(|| {
                CoreError::Validation(
                    "image document is missing required key 'rangePosition'".into(),
                )
            })?;
            // Heterogeneous legacy inputs: a single object or a list.
            let positions: Vec<Value> = match range_position {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            if positions.is_empty() {
                return Err(CoreError::Validation(
                    "image document has an empty 'rangePosition'".into(),
                ));
            }

            let mut selector_items = Vec::with_capacity(positions.len());
            for position in &positions {
                match position {
                    // Already a tagged selector: pass through.
                    Value::Object(map) if map.contains_key("@type") => {
                        selector_items.push(position.clone());
                    }
                    // Legacy xywh object: re-encode as a fragment selector.
                    Value::Object(map) => {
                        selector_items.push(selector::fragment_selector(
                            &selector::encode_xywh(map)?,
                        ));
                    }
                    // Bare value: an SVG path selector.
                    other => selector_items.push(selector::svg_selector(other)),
                }
            }
            let selector_type = if selector_items.len() > 1 {
                TargetType::Choice
            } else {
                TargetType::List
            };

            let mut item = json!({
                "source": uri,
                "type": MediaType::Image.as_str(),
                "selector": {
                    "type": selector_type.as_str(),
                    "items": selector_items,
                },
            });
            if let Some(bounds) = obj.get("bounds") {
                // Malformed bounds are dropped, not an error.
                if let Some(scope) = selector::viewport_scope(bounds) {
                    item["scope"] = scope;
                }
            }
            target_items.push(item);

            if let Some(thumb) = obj
                .get("thumb")
                .map(scalar_to_string)
                .filter(|t| !t.is_empty())
            {
                target_items.push(json!({
                    "source": thumb,
                    "type": MediaType::Thumbnail.as_str(),
                }));
                target_type = TargetType::Choice;
            }
        }
    }

    if target_items.is_empty() {
        return Err(CoreError::Validation(
            "converted document has no targets".into(),
        ));
    }

    let mut doc = json!({
        "@context": CATCHA_CONTEXT_IRI,
        "type": "Annotation",
        "schema_version": CATCHA_SCHEMA_VERSION,
        "id": id,
        "created": created,
        "modified": modified,
        "creator": { "id": user_field("id"), "name": user_field("name") },
        "permissions": {
            "can_read": perm_set("read"),
            "can_update": perm_set("update"),
            "can_delete": perm_set("delete"),
            "can_admin": perm_set("admin"),
        },
        "platform": {
            "platform_name": DEFAULT_PLATFORM_NAME,
            "context_id": context_id,
            "collection_id": collection_id,
            "target_source_id": target_source_id,
        },
        "body": { "type": TargetType::List.as_str(), "items": body_items },
        "target": { "type": target_type.as_str(), "items": target_items },
    });

    if supplied_id.is_none() {
        // The placeholder never leaves the converter.
        doc.as_object_mut()
            .and_then(|map| map.remove("id"));
    }

    Ok(doc)
}

// ---------------------------------------------------------------------------
// catcha -> AnnotatorJS
// ---------------------------------------------------------------------------

/// Convert a stored catcha document back into the legacy AnnotatorJS shape.
///
/// `parent` must be the raw document of the annotation being replied to
/// when `raw` is a reply (the legacy dialect renders a reply with its
/// *parent's* target). `total_replies` fills the legacy `totalComments`
/// field.
///
/// Hard failures: a non-integer id, missing platform fields, multiple
/// targets, a reply to a reply, or a media kind outside the closed set.
pub fn convert_from_anno(
    raw: &Value,
    parent: Option<&Value>,
    total_replies: i64,
) -> Result<Value, CoreError> {
    // Legacy constraint: AnnotatorJS ids are integers.
    let id_str = document::id_of(raw)
        .ok_or_else(|| CoreError::Validation("document is missing 'id'".into()))?;
    let id_int: i64 = id_str.parse().map_err(|_| {
        CoreError::Validation(format!(
            "annotation id '{id_str}' is not representable as an integer"
        ))
    })?;

    let platform = document::require_platform(raw)?;
    let groups = document::group_body_items(raw)?;
    let permissions = document::permissions_of(raw);
    let creator = document::creator_of(raw);
    let (target_type, targets) = document::extract_targets(raw)?;

    let mut parent_id = NO_PARENT.to_string();
    let fragment: Map<String, Value>;

    if let Some(reply_target) = targets.iter().find(|t| t.media == MediaType::Annotation) {
        // A reply renders with its parent's target shape.
        let parent_doc = parent.ok_or_else(|| {
            CoreError::Internal("reply conversion requires the parent document".into())
        })?;
        if document::reply_to(parent_doc)?.is_some() {
            return Err(CoreError::UnsupportedShape(
                "cannot convert a reply to a reply".into(),
            ));
        }
        let (parent_type, parent_targets) = document::extract_targets(parent_doc)?;
        let mut parent_fragment = media_fragment(parent_type, &parent_targets)?;
        parent_fragment.insert("media".into(), json!(AnnojsMedia::Comment.as_str()));
        fragment = parent_fragment;
        parent_id = reply_target.source.clone();
    } else {
        if targets.len() > 1 && target_type == TargetType::List {
            return Err(CoreError::UnsupportedShape(
                "multiple targets not supported in annotatorjs".into(),
            ));
        }
        fragment = media_fragment(target_type, &targets)?;
    }

    let mut out = json!({
        "id": id_int,
        "created": document::created_of(raw).unwrap_or_default(),
        "updated": document::modified_of(raw).unwrap_or_default(),
        "text": groups.text,
        "permissions": {
            "read": permissions.can_read,
            "update": permissions.can_update,
            "delete": permissions.can_delete,
            "admin": permissions.can_admin,
        },
        "user": { "id": creator.id, "name": creator.name },
        "totalComments": total_replies,
        "tags": groups.tags,
        "parent": parent_id,
        "contextId": platform.context_id,
        "collectionId": platform.collection_id,
        "uri": platform.target_source_id,
    });
    let out_map = out.as_object_mut().ok_or_else(|| {
        CoreError::Internal("envelope assembly produced a non-object".into())
    })?;
    for (key, value) in fragment {
        out_map.insert(key, value);
    }

    Ok(out)
}

/// Build the per-media fragment of a legacy document from a catcha target
/// envelope. Used for the annotation's own target and, for replies, for
/// the parent's target.
fn media_fragment(
    target_type: TargetType,
    targets: &[TargetItem],
) -> Result<Map<String, Value>, CoreError> {
    if target_type == TargetType::Choice {
        // Image plus optional thumbnail (shape already enforced by
        // extract_targets).
        let image = targets
            .iter()
            .find(|t| t.media == MediaType::Image)
            .ok_or_else(|| {
                CoreError::UnsupportedShape("Choice target without an Image item".into())
            })?;
        let mut fragment = image_fragment(image)?;
        if let Some(thumb) = targets.iter().find(|t| t.media == MediaType::Thumbnail) {
            fragment.insert("thumb".into(), json!(thumb.source));
        }
        return Ok(fragment);
    }

    let item = &targets[0];
    match item.media {
        MediaType::Video | MediaType::Audio => time_fragment(item),
        MediaType::Text => text_fragment(item),
        MediaType::Image => image_fragment(item),
        MediaType::Annotation => Err(CoreError::UnsupportedShape(
            "cannot render an Annotation target as a media fragment".into(),
        )),
        MediaType::Thumbnail => Err(CoreError::UnsupportedShape(
            "cannot render a bare Thumbnail target".into(),
        )),
    }
}

fn time_fragment(item: &TargetItem) -> Result<Map<String, Value>, CoreError> {
    let media = if item.media == MediaType::Video {
        AnnojsMedia::Video
    } else {
        AnnojsMedia::Audio
    };
    let selector_item = first_selector_item(item).ok_or_else(|| {
        CoreError::Validation(format!("{media} target has no selector"))
    })?;
    let (range_time, container) = selector::decode_time_selector_item(&selector_item)?;
    let ext = item
        .format
        .as_deref()
        .and_then(|f| f.rsplit('/').next())
        .unwrap_or_default();

    let mut fragment = Map::new();
    fragment.insert("media".into(), json!(media.as_str()));
    fragment.insert("rangeTime".into(), range_time);
    fragment.insert(
        "target".into(),
        json!({ "container": container, "src": item.source, "ext": ext }),
    );
    Ok(fragment)
}

fn text_fragment(item: &TargetItem) -> Result<Map<String, Value>, CoreError> {
    let mut ranges: Vec<Value> = Vec::new();
    let mut quote: Option<String> = None;

    for selector_item in selector_items(item) {
        match selector_item.get("type").and_then(Value::as_str) {
            Some(selector::RANGE_SELECTOR) => {
                ranges.push(selector::decode_range_selector_item(&selector_item)?);
            }
            Some(selector::TEXT_QUOTE_SELECTOR) => {
                quote = selector_item
                    .get("exact")
                    .and_then(Value::as_str)
                    .map(String::from);
            }
            other => {
                return Err(CoreError::UnsupportedShape(format!(
                    "unexpected text selector type '{}'",
                    other.unwrap_or("<none>")
                )))
            }
        }
    }

    let mut fragment = Map::new();
    fragment.insert("media".into(), json!(AnnojsMedia::Text.as_str()));
    fragment.insert("ranges".into(), Value::Array(ranges));
    if let Some(quote) = quote {
        fragment.insert("quote".into(), json!(quote));
    }
    Ok(fragment)
}

fn image_fragment(item: &TargetItem) -> Result<Map<String, Value>, CoreError> {
    let items = selector_items(item);
    if items.is_empty() {
        return Err(CoreError::Validation("image target has no selector".into()));
    }
    let mut positions = Vec::with_capacity(items.len());
    for selector_item in &items {
        positions.push(selector::decode_image_selector_item(selector_item)?);
    }
    // A single selector decodes to one object, a dual-strategy pair to a
    // list.
    let range_position = if positions.len() == 1 {
        positions.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::Array(positions)
    };

    let mut fragment = Map::new();
    fragment.insert("media".into(), json!(AnnojsMedia::Image.as_str()));
    fragment.insert("rangePosition".into(), range_position);
    if let Some(scope) = &item.scope {
        if let Some(value) = scope.get("value").and_then(Value::as_str) {
            if let Ok(bounds) = selector::decode_xywh(value) {
                fragment.insert("bounds".into(), bounds);
            }
        }
    }
    Ok(fragment)
}

fn selector_items(item: &TargetItem) -> Vec<Value> {
    item.selector
        .as_ref()
        .and_then(|s| s.get("items"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn first_selector_item(item: &TargetItem) -> Option<Value> {
    selector_items(item).into_iter().next()
}

// ---------------------------------------------------------------------------
// Equivalence ("similar enough" for round-trip and import verification)
// ---------------------------------------------------------------------------

/// Whether two AnnotatorJS documents are equivalent under the documented
/// round-trip tolerance: timestamps, `totalComments`, and transient error
/// fields are ignored; ids are compared as strings; tag lists are compared
/// sorted; `comment` media ignores all target-shape fields (only the
/// parent reference matters); `image` media ignores `bounds`.
pub fn are_similar_annojs(a: &Value, b: &Value) -> bool {
    let media_a = a.get("media").and_then(Value::as_str).unwrap_or_default();
    let media_b = b.get("media").and_then(Value::as_str).unwrap_or_default();
    if media_a != media_b {
        return false;
    }

    if !scalar_fields_similar(a, b, &["text", "contextId", "collectionId"]) {
        return false;
    }
    if optional_id_mismatch(a, b) {
        return false;
    }
    if normalized_parent(a.get("parent")) != normalized_parent(b.get("parent")) {
        return false;
    }
    if normalized_scalar(a.pointer("/user/id")) != normalized_scalar(b.pointer("/user/id")) {
        return false;
    }
    if sorted_strings(a.get("tags")) != sorted_strings(b.get("tags")) {
        return false;
    }
    for op in ["read", "update", "delete", "admin"] {
        let path = format!("/permissions/{op}");
        if sorted_strings(a.pointer(&path)) != sorted_strings(b.pointer(&path)) {
            return false;
        }
    }

    match media_a {
        // Only the parent reference matters for a reply.
        "comment" => true,
        "text" => {
            a.get("ranges") == b.get("ranges")
                && normalized_scalar(a.get("quote")) == normalized_scalar(b.get("quote"))
                && normalized_scalar(a.get("uri")) == normalized_scalar(b.get("uri"))
        }
        "video" | "audio" => {
            normalized_range_time(a.get("rangeTime")) == normalized_range_time(b.get("rangeTime"))
                && scalar_fields_similar(
                    a.get("target").unwrap_or(&Value::Null),
                    b.get("target").unwrap_or(&Value::Null),
                    &["container", "src", "ext"],
                )
        }
        "image" => {
            normalized_positions(a.get("rangePosition")) == normalized_positions(b.get("rangePosition"))
                && normalized_scalar(a.get("thumb")) == normalized_scalar(b.get("thumb"))
                && normalized_scalar(a.get("uri")) == normalized_scalar(b.get("uri"))
        }
        _ => false,
    }
}

/// Whether two catcha documents are equivalent: ids as strings, creator
/// ids, grouped body (text plus sorted tags), platform context/collection,
/// and sorted permission sets must match; timestamps are ignored. For a
/// reply only the reply target reference is compared; for everything else
/// the target media/source pairs are compared (scope/bounds ignored).
pub fn are_similar_catcha(a: &Value, b: &Value) -> bool {
    if optional_id_mismatch(a, b) {
        return false;
    }
    if document::creator_of(a).id != document::creator_of(b).id {
        return false;
    }

    let (groups_a, groups_b) = match (document::group_body_items(a), document::group_body_items(b))
    {
        (Ok(ga), Ok(gb)) => (ga, gb),
        _ => return false,
    };
    if groups_a.text != groups_b.text || groups_a.purpose != groups_b.purpose {
        return false;
    }
    let mut tags_a = groups_a.tags;
    let mut tags_b = groups_b.tags;
    tags_a.sort();
    tags_b.sort();
    if tags_a != tags_b {
        return false;
    }

    match (document::require_platform(a), document::require_platform(b)) {
        (Ok(pa), Ok(pb)) => {
            if pa.context_id != pb.context_id || pa.collection_id != pb.collection_id {
                return false;
            }
        }
        _ => return false,
    }

    let perms_a = document::permissions_of(a);
    let perms_b = document::permissions_of(b);
    for (mut sa, mut sb) in [
        (perms_a.can_read, perms_b.can_read),
        (perms_a.can_update, perms_b.can_update),
        (perms_a.can_delete, perms_b.can_delete),
        (perms_a.can_admin, perms_b.can_admin),
    ] {
        sa.sort();
        sb.sort();
        if sa != sb {
            return false;
        }
    }

    match (document::reply_to(a), document::reply_to(b)) {
        (Ok(Some(ra)), Ok(Some(rb))) => ra == rb,
        (Ok(None), Ok(None)) => {
            let (pair_a, pair_b) =
                match (document::extract_targets(a), document::extract_targets(b)) {
                    (Ok(ta), Ok(tb)) => (ta, tb),
                    _ => return false,
                };
            let shape = |targets: &[TargetItem]| -> Vec<(String, String)> {
                targets
                    .iter()
                    .map(|t| (t.media.as_str().to_string(), t.source.clone()))
                    .collect()
            };
            shape(&pair_a.1) == shape(&pair_b.1)
        }
        _ => false,
    }
}

fn optional_id_mismatch(a: &Value, b: &Value) -> bool {
    match (document::id_of(a), document::id_of(b)) {
        (Some(ia), Some(ib)) => ia != ib,
        _ => false,
    }
}

fn scalar_fields_similar(a: &Value, b: &Value, keys: &[&str]) -> bool {
    keys.iter()
        .all(|key| normalized_scalar(a.get(*key)) == normalized_scalar(b.get(*key)))
}

/// Normalize a scalar for comparison: numbers and numeric strings compare
/// equal, absent and empty compare equal.
fn normalized_scalar(v: Option<&Value>) -> String {
    v.map(scalar_to_string).unwrap_or_default()
}

/// A missing or empty `parent` means "not a reply", which the outbound
/// conversion spells as `"0"`; all three forms compare equal.
fn normalized_parent(v: Option<&Value>) -> String {
    let parent = normalized_scalar(v);
    if parent.is_empty() {
        NO_PARENT.to_string()
    } else {
        parent
    }
}

fn sorted_strings(v: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = v
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(scalar_to_string).collect())
        .unwrap_or_default();
    out.sort();
    out
}

/// Normalize a rangeTime for comparison by running both ends through the
/// numeric-sniffing rule, so `"10"` and `10` compare equal.
fn normalized_range_time(v: Option<&Value>) -> (Value, Value) {
    let sniff = |key: &str| -> Value {
        v.and_then(|rt| rt.get(key))
            .map(|val| selector::string_to_number(&scalar_to_string(val)))
            .unwrap_or(Value::Null)
    };
    (sniff("start"), sniff("end"))
}

/// Normalize rangePosition entries: always a list, xywh objects with
/// stringified values, bare values stringified, tagged selectors as-is.
fn normalized_positions(v: Option<&Value>) -> Vec<Value> {
    let entries: Vec<Value> = match v {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(map) if map.contains_key("@type") => Value::Object(map),
            Value::Object(map) => {
                let field = |key: &str| -> Value {
                    map.get(key).map(scalar_to_string).map(Value::String).unwrap_or(Value::Null)
                };
                json!({
                    "x": field("x"),
                    "y": field("y"),
                    "width": field("width"),
                    "height": field("height"),
                })
            }
            other => Value::String(scalar_to_string(&other)),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_js(media: &str) -> Value {
        json!({
            "id": 123,
            "media": media,
            "uri": "http://lti/source-1",
            "text": "a remark",
            "contextId": "course-9",
            "collectionId": "assignment-2",
            "user": { "id": "user-1", "name": "Ada" },
            "permissions": {
                "read": [],
                "update": ["user-1"],
                "delete": ["user-1"],
                "admin": ["user-1"],
            },
            "tags": ["beta", "alpha"],
        })
    }

    fn round_trip(js: &Value) -> Value {
        let catcha = convert_to_catcha(js).unwrap();
        convert_from_anno(&catcha, None, 0).unwrap()
    }

    // -- round-trip law per media kind ---------------------------------------

    #[test]
    fn text_round_trip() {
        let mut js = base_js("text");
        js["ranges"] = json!([
            { "start": "/div[1]/p[2]", "end": "/div[1]/p[2]",
              "startOffset": 10, "endOffset": 42 },
        ]);
        js["quote"] = json!("the exact words");
        assert!(are_similar_annojs(&js, &round_trip(&js)));
    }

    #[test]
    fn text_multiple_ranges_round_trip() {
        let mut js = base_js("text");
        js["ranges"] = json!([
            { "start": "/p[1]", "end": "/p[1]", "startOffset": 0, "endOffset": 5 },
            { "start": "/p[2]", "end": "/p[3]", "startOffset": 2, "endOffset": 9 },
        ]);
        assert!(are_similar_annojs(&js, &round_trip(&js)));
    }

    #[test]
    fn image_single_round_trip() {
        let mut js = base_js("image");
        js["rangePosition"] = json!({ "x": 10, "y": 20, "width": 300, "height": 400 });
        assert!(are_similar_annojs(&js, &round_trip(&js)));
    }

    #[test]
    fn image_dual_strategy_round_trip() {
        let mut js = base_js("image");
        js["rangePosition"] = json!([
            { "x": 10, "y": 20, "width": 300, "height": 400 },
            "<svg><path d='M0 0 L10 10'/></svg>",
        ]);
        assert!(are_similar_annojs(&js, &round_trip(&js)));
    }

    #[test]
    fn image_choice_with_thumb_round_trip() {
        let mut js = base_js("image");
        js["rangePosition"] = json!({ "x": 1, "y": 2, "width": 3, "height": 4 });
        js["thumb"] = json!("http://img/1-thumb.jpg");
        js["bounds"] = json!({ "x": 0, "y": 0, "width": 800, "height": 600 });
        let back = round_trip(&js);
        assert_eq!(back["thumb"], json!("http://img/1-thumb.jpg"));
        assert!(are_similar_annojs(&js, &back));
    }

    #[test]
    fn video_round_trip() {
        let mut js = base_js("video");
        js["rangeTime"] = json!({ "start": 10, "end": 25 });
        js["target"] = json!({ "container": "vid-1", "src": "http://media/clip.mp4", "ext": "mp4" });
        assert!(are_similar_annojs(&js, &round_trip(&js)));
    }

    #[test]
    fn audio_round_trip() {
        let mut js = base_js("audio");
        js["rangeTime"] = json!({ "start": 1.5, "end": 9.25 });
        js["target"] = json!({ "container": "aud-1", "src": "http://media/talk.ogg", "ext": "ogg" });
        assert!(are_similar_annojs(&js, &round_trip(&js)));
    }

    #[test]
    fn comment_round_trip() {
        let mut parent_js = base_js("text");
        parent_js["id"] = json!(77);
        parent_js["ranges"] = json!([
            { "start": "/p[1]", "end": "/p[1]", "startOffset": 0, "endOffset": 4 },
        ]);
        let parent_catcha = convert_to_catcha(&parent_js).unwrap();

        let mut js = base_js("comment");
        js["parent"] = json!("77");
        let catcha = convert_to_catcha(&js).unwrap();
        let back = convert_from_anno(&catcha, Some(&parent_catcha), 0).unwrap();

        assert_eq!(back["media"], json!("comment"));
        assert_eq!(back["parent"], json!("77"));
        // The reply renders with the parent's target shape.
        assert_eq!(back["ranges"], parent_js["ranges"]);
        assert!(are_similar_annojs(&js, &back));
    }

    // -- to_catcha details ---------------------------------------------------

    #[test]
    fn missing_media_rejected() {
        let err = convert_to_catcha(&json!({ "uri": "u" })).unwrap_err();
        assert!(err.to_string().contains("'media'"));
    }

    #[test]
    fn missing_uri_rejected() {
        let err = convert_to_catcha(&json!({ "media": "text" })).unwrap_err();
        assert!(err.to_string().contains("'uri'"));
    }

    #[test]
    fn unknown_media_rejected() {
        let err =
            convert_to_catcha(&json!({ "media": "hologram", "uri": "u" })).unwrap_err();
        assert!(err.to_string().contains("unable to process media"));
    }

    #[test]
    fn comment_with_zero_parent_rejected() {
        let mut js = base_js("comment");
        js["parent"] = json!("0");
        assert!(convert_to_catcha(&js).is_err());
    }

    #[test]
    fn comment_without_parent_rejected() {
        let js = base_js("comment");
        assert!(convert_to_catcha(&js).is_err());
    }

    #[test]
    fn comment_overrides_target_source() {
        let mut js = base_js("comment");
        js["parent"] = json!(77);
        let catcha = convert_to_catcha(&js).unwrap();
        // The platform source points at the parent, not the uri.
        assert_eq!(catcha["platform"]["target_source_id"], json!("77"));
    }

    #[test]
    fn text_without_ranges_rejected() {
        let js = base_js("text");
        let err = convert_to_catcha(&js).unwrap_err();
        assert!(err.to_string().contains("'ranges'"));
    }

    #[test]
    fn text_with_ranges_and_quote_becomes_choice() {
        let mut js = base_js("text");
        js["ranges"] = json!([
            { "start": "/p[1]", "end": "/p[1]", "startOffset": 0, "endOffset": 4 },
        ]);
        js["quote"] = json!("words");
        let catcha = convert_to_catcha(&js).unwrap();
        let selector = &catcha["target"]["items"][0]["selector"];
        assert_eq!(selector["type"], json!("Choice"));
        // Range selector first, then the quote.
        assert_eq!(selector["items"][0]["type"], json!("RangeSelector"));
        assert_eq!(selector["items"][1]["type"], json!("TextQuoteSelector"));
    }

    #[test]
    fn video_missing_range_time_rejected() {
        let mut js = base_js("video");
        js["target"] = json!({ "container": "c", "src": "s", "ext": "mp4" });
        assert!(convert_to_catcha(&js).is_err());
    }

    #[test]
    fn video_missing_container_rejected() {
        let mut js = base_js("video");
        js["rangeTime"] = json!({ "start": 0, "end": 1 });
        js["target"] = json!({ "src": "s", "ext": "mp4" });
        let err = convert_to_catcha(&js).unwrap_err();
        assert!(err.to_string().contains("container"));
    }

    #[test]
    fn image_without_range_position_rejected() {
        let js = base_js("image");
        assert!(convert_to_catcha(&js).is_err());
    }

    #[test]
    fn image_malformed_bounds_ignored() {
        let mut js = base_js("image");
        js["rangePosition"] = json!({ "x": 1, "y": 2, "width": 3, "height": 4 });
        js["bounds"] = json!({ "x": 1 });
        let catcha = convert_to_catcha(&js).unwrap();
        assert!(catcha["target"]["items"][0].get("scope").is_none());
    }

    #[test]
    fn image_thumb_flips_envelope_to_choice() {
        let mut js = base_js("image");
        js["rangePosition"] = json!({ "x": 1, "y": 2, "width": 3, "height": 4 });
        js["thumb"] = json!("http://img/t.jpg");
        let catcha = convert_to_catcha(&js).unwrap();
        assert_eq!(catcha["target"]["type"], json!("Choice"));
        assert_eq!(catcha["target"]["items"][1]["type"], json!("Thumbnail"));
    }

    #[test]
    fn absent_id_stripped() {
        let mut js = base_js("text");
        js.as_object_mut().unwrap().remove("id");
        js["ranges"] = json!([]);
        let catcha = convert_to_catcha(&js).unwrap();
        assert!(catcha.get("id").is_none());
    }

    #[test]
    fn missing_timestamps_defaulted() {
        let mut js = base_js("text");
        js["ranges"] = json!([]);
        let catcha = convert_to_catcha(&js).unwrap();
        assert!(catcha["created"].as_str().is_some_and(|s| !s.is_empty()));
        assert!(catcha["modified"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn missing_context_defaults_to_unknown() {
        let js = json!({ "media": "text", "uri": "u", "ranges": [] });
        let catcha = convert_to_catcha(&js).unwrap();
        assert_eq!(catcha["platform"]["context_id"], json!("unknown"));
        assert_eq!(catcha["platform"]["collection_id"], json!("unknown"));
    }

    // -- from_anno details ---------------------------------------------------

    #[test]
    fn non_integer_id_rejected() {
        let mut js = base_js("text");
        js["id"] = json!("not-a-number");
        js["ranges"] = json!([]);
        let catcha = convert_to_catcha(&js).unwrap();
        let err = convert_from_anno(&catcha, None, 0).unwrap_err();
        assert!(err.to_string().contains("not representable as an integer"));
    }

    #[test]
    fn missing_platform_field_rejected() {
        let mut js = base_js("text");
        js["ranges"] = json!([]);
        let mut catcha = convert_to_catcha(&js).unwrap();
        catcha["platform"]
            .as_object_mut()
            .unwrap()
            .remove("context_id");
        assert!(convert_from_anno(&catcha, None, 0).is_err());
    }

    #[test]
    fn multiple_targets_rejected() {
        let mut js = base_js("text");
        js["ranges"] = json!([]);
        let mut catcha = convert_to_catcha(&js).unwrap();
        let extra = catcha["target"]["items"][0].clone();
        catcha["target"]["items"].as_array_mut().unwrap().push(extra);
        let err = convert_from_anno(&catcha, None, 0).unwrap_err();
        assert!(err.to_string().contains("multiple targets"));
    }

    #[test]
    fn reply_to_reply_rejected() {
        // grandparent <- parent(reply) <- reply
        let mut grandparent_js = base_js("text");
        grandparent_js["id"] = json!(1);
        grandparent_js["ranges"] = json!([]);
        let grandparent = convert_to_catcha(&grandparent_js).unwrap();
        let _ = grandparent;

        let mut parent_js = base_js("comment");
        parent_js["id"] = json!(2);
        parent_js["parent"] = json!("1");
        let parent = convert_to_catcha(&parent_js).unwrap();

        let mut reply_js = base_js("comment");
        reply_js["id"] = json!(3);
        reply_js["parent"] = json!("2");
        let reply = convert_to_catcha(&reply_js).unwrap();

        let err = convert_from_anno(&reply, Some(&parent), 0).unwrap_err();
        assert!(err.to_string().contains("reply to a reply"));
    }

    #[test]
    fn total_replies_lands_in_total_comments() {
        let mut js = base_js("text");
        js["ranges"] = json!([]);
        let catcha = convert_to_catcha(&js).unwrap();
        let back = convert_from_anno(&catcha, None, 4).unwrap();
        assert_eq!(back["totalComments"], json!(4));
    }

    // -- equivalence relation ------------------------------------------------

    #[test]
    fn similar_ignores_tag_order() {
        let mut a = base_js("text");
        a["ranges"] = json!([]);
        let mut b = round_trip(&a);
        b["tags"] = json!(["alpha", "beta"]);
        assert!(are_similar_annojs(&a, &b));
    }

    #[test]
    fn similar_treats_missing_parent_as_no_parent() {
        // Inbound documents usually omit `parent`; outbound always spells
        // the non-reply case as "0". Both forms (and "") are equivalent.
        let mut a = base_js("text");
        a["ranges"] = json!([]);
        let b = round_trip(&a);
        assert!(a.get("parent").is_none());
        assert_eq!(b["parent"], json!(NO_PARENT));
        assert!(are_similar_annojs(&a, &b));

        a["parent"] = json!("");
        assert!(are_similar_annojs(&a, &b));

        a["parent"] = json!("77");
        assert!(!are_similar_annojs(&a, &b));
    }

    #[test]
    fn similar_detects_text_change() {
        let mut a = base_js("text");
        a["ranges"] = json!([]);
        let mut b = round_trip(&a);
        b["text"] = json!("tampered");
        assert!(!are_similar_annojs(&a, &b));
    }

    #[test]
    fn similar_detects_media_change() {
        let mut a = base_js("text");
        a["ranges"] = json!([]);
        let mut b = round_trip(&a);
        b["media"] = json!("image");
        assert!(!are_similar_annojs(&a, &b));
    }

    #[test]
    fn similar_image_ignores_bounds() {
        let mut a = base_js("image");
        a["rangePosition"] = json!({ "x": 1, "y": 2, "width": 3, "height": 4 });
        let mut b = round_trip(&a);
        b["bounds"] = json!({ "x": 9, "y": 9, "width": 9, "height": 9 });
        assert!(are_similar_annojs(&a, &b));
    }

    #[test]
    fn similar_catcha_round_trip() {
        let mut js = base_js("text");
        js["ranges"] = json!([
            { "start": "/p[1]", "end": "/p[1]", "startOffset": 0, "endOffset": 4 },
        ]);
        let catcha = convert_to_catcha(&js).unwrap();
        let back = convert_to_catcha(&convert_from_anno(&catcha, None, 0).unwrap()).unwrap();
        assert!(are_similar_catcha(&catcha, &back));
    }

    #[test]
    fn similar_catcha_detects_creator_change() {
        let mut js = base_js("text");
        js["ranges"] = json!([]);
        let catcha = convert_to_catcha(&js).unwrap();
        let mut other = catcha.clone();
        other["creator"]["id"] = json!("user-2");
        assert!(!are_similar_catcha(&catcha, &other));
    }
}
