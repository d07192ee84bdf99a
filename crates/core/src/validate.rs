//! Structural and semantic gatekeeper in front of persistence.
//!
//! [`Validator`] is built once at service startup from an explicit
//! [`ValidatorConfig`] and shared by reference; there is no module-level
//! mutable state. Normalization accepts either dialect, scans body text
//! against the forbidden-content patterns, and checks the result against
//! the bundled JSON-Schema contract.

use std::collections::HashMap;

use jsonschema::{Draft, JSONSchema};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::convert;
use crate::document;
use crate::error::CoreError;
use crate::media::CATCHA_CONTEXT_IRI;

/// Reserved principal that passes every permission check.
pub const ADMIN_GROUP_ID: &str = "__admin__";

/// Bundled JSON-Schema contract for catcha documents.
pub const CATCH_SCHEMA_JSON: &str = include_str!("schema/catch_schema.json");

/// Bundled canonical JSON-LD context for catcha property names.
pub const CATCH_CONTEXT_JSONLD: &str = include_str!("schema/catch_context.jsonld");

/// Body text matching any of these is rejected before persistence.
const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[r"(?i)<\s*script", r"(?i)javascript\s*:"];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Validator inputs, resolved once during service initialization.
///
/// Tests substitute their own schema/context/patterns by constructing the
/// struct directly instead of calling [`ValidatorConfig::bundled`].
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub schema: Value,
    pub context: Value,
    pub forbidden_patterns: Vec<String>,
}

impl ValidatorConfig {
    /// Configuration backed by the schema and context artifacts compiled
    /// into the binary.
    pub fn bundled() -> Result<Self, CoreError> {
        let schema: Value = serde_json::from_str(CATCH_SCHEMA_JSON)
            .map_err(|e| CoreError::Internal(format!("bundled schema is invalid JSON: {e}")))?;
        let context: Value = serde_json::from_str(CATCH_CONTEXT_JSONLD)
            .map_err(|e| CoreError::Internal(format!("bundled context is invalid JSON: {e}")))?;
        Ok(Self {
            schema,
            context,
            forbidden_patterns: DEFAULT_FORBIDDEN_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

pub struct Validator {
    schema: JSONSchema,
    /// Expanded-IRI (and compact-IRI) property name -> canonical term.
    term_map: HashMap<String, String>,
    forbidden: Vec<Regex>,
}

impl Validator {
    pub fn new(config: &ValidatorConfig) -> Result<Self, CoreError> {
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&config.schema)
            .map_err(|e| CoreError::Internal(format!("schema failed to compile: {e}")))?;

        let term_map = build_term_map(&config.context)?;

        let mut forbidden = Vec::with_capacity(config.forbidden_patterns.len());
        for pattern in &config.forbidden_patterns {
            let re = Regex::new(pattern).map_err(|e| {
                CoreError::Internal(format!("forbidden-content pattern '{pattern}': {e}"))
            })?;
            forbidden.push(re);
        }

        Ok(Self {
            schema,
            term_map,
            forbidden,
        })
    }

    /// Normalize an inbound document of either dialect into a
    /// schema-checked catcha document.
    ///
    /// A `@context` key marks the input as catcha-shaped; property names
    /// are compacted against the canonical context. Anything else is
    /// treated as AnnotatorJS and run through the converter. The
    /// forbidden-content scan runs on every call, not just on create.
    pub fn normalize(&self, input: &Value) -> Result<Value, CoreError> {
        let doc = if input.get("@context").is_some() {
            self.compact(input)?
        } else {
            convert::convert_to_catcha(input)?
        };
        self.scan_forbidden_content(&doc)?;
        self.check_schema(&doc)?;
        Ok(doc)
    }

    /// Check every body item's text value against the forbidden-content
    /// patterns. A match is a hard rejection.
    pub fn scan_forbidden_content(&self, doc: &Value) -> Result<(), CoreError> {
        let items = doc
            .pointer("/body/items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for item in items {
            let Some(value) = item.get("value").and_then(Value::as_str) else {
                continue;
            };
            for re in &self.forbidden {
                if re.is_match(value) {
                    return Err(CoreError::ForbiddenContent(format!(
                        "body value matches forbidden pattern '{}'",
                        re.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_schema(&self, doc: &Value) -> Result<(), CoreError> {
        if let Err(errors) = self.schema.validate(doc) {
            let detail: Vec<String> = errors
                .take(4)
                .map(|e| format!("{} at {}", e, e.instance_path))
                .collect();
            return Err(CoreError::Validation(format!(
                "document does not match the annotation schema: {}",
                detail.join("; ")
            )));
        }
        Ok(())
    }

    /// Compact property names of a catcha-shaped document against the
    /// canonical context term map, stamping the canonical context IRI.
    fn compact(&self, input: &Value) -> Result<Value, CoreError> {
        let obj = input.as_object().ok_or_else(|| {
            CoreError::Validation("catcha document must be a JSON object".into())
        })?;
        let mut out = self.compact_map(obj);
        out.insert("@context".into(), json!(CATCHA_CONTEXT_IRI));
        Ok(Value::Object(out))
    }

    fn compact_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            let term = self
                .term_map
                .get(key.as_str())
                .cloned()
                .unwrap_or_else(|| key.clone());
            out.insert(term, self.compact_value(value));
        }
        out
    }

    fn compact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.compact_map(map)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.compact_value(v)).collect())
            }
            other => other.clone(),
        }
    }
}

/// Build the reverse term map (expanded and compact IRIs back to canonical
/// terms) from a JSON-LD context document.
fn build_term_map(context: &Value) -> Result<HashMap<String, String>, CoreError> {
    let terms = context
        .get("@context")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            CoreError::Internal("context document is missing the '@context' term map".into())
        })?;

    // Prefix table first (term -> namespace IRI).
    let mut prefixes: HashMap<&str, &str> = HashMap::new();
    for (term, value) in terms {
        if let Some(iri) = value.as_str() {
            if iri.contains("://") && iri.ends_with(['#', '/']) {
                prefixes.insert(term.as_str(), iri);
            }
        }
    }

    let mut map = HashMap::new();
    for (term, value) in terms {
        let Some(compact) = value.as_str() else {
            continue;
        };
        map.insert(compact.to_string(), term.clone());
        if let Some((prefix, suffix)) = compact.split_once(':') {
            if let Some(ns) = prefixes.get(prefix) {
                map.insert(format!("{ns}{suffix}"), term.clone());
            }
        }
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Create-time semantic rules
// ---------------------------------------------------------------------------

/// Semantic rules that only apply when a document is first created.
///
/// The creator must be the requesting user, must hold update and delete on
/// their own annotation (and read, when the annotation is private), and a
/// reply may not point at the document's own id.
pub fn check_for_create_conflicts(doc: &Value, requesting_user: &str) -> Result<(), CoreError> {
    let creator = document::creator_of(doc);
    if creator.id != requesting_user {
        return Err(CoreError::Conflict(format!(
            "creator '{}' does not match requesting user '{requesting_user}'",
            creator.id
        )));
    }

    let perms = document::permissions_of(doc);
    if !perms.can_update.iter().any(|p| p == &creator.id) {
        return Err(CoreError::Conflict(
            "creator is missing from can_update".into(),
        ));
    }
    if !perms.can_delete.iter().any(|p| p == &creator.id) {
        return Err(CoreError::Conflict(
            "creator is missing from can_delete".into(),
        ));
    }
    if !perms.can_read.is_empty() && !perms.can_read.iter().any(|p| p == &creator.id) {
        return Err(CoreError::Conflict(
            "private annotation does not grant read to its creator".into(),
        ));
    }

    if let (Some(id), Some(parent)) = (document::id_of(doc), document::reply_to(doc)?) {
        if id == parent {
            return Err(CoreError::Conflict(
                "annotation cannot reply to itself".into(),
            ));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Permission predicate
// ---------------------------------------------------------------------------

/// Operations gated by the per-annotation permission sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Update,
    Delete,
    Admin,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Admin => "admin",
        }
    }

    /// Token override entry that short-circuits this operation's check.
    pub fn override_token(&self) -> &'static str {
        match self {
            Self::Read => "CAN_READ",
            Self::Update => "CAN_UPDATE",
            Self::Delete => "CAN_DELETE",
            Self::Admin => "CAN_ADMIN",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `user_id` may perform `op` on the annotation document `doc`.
///
/// Grants: the reserved admin group id, a token override for the
/// operation, membership in the annotation's `can_<op>` set, or an empty
/// `can_read` set (public) for reads. A token carrying no override list at
/// all is a legacy caller and is granted unconditionally.
pub fn has_permission(
    doc: &Value,
    op: Operation,
    user_id: &str,
    overrides: Option<&[String]>,
) -> bool {
    if user_id == ADMIN_GROUP_ID {
        return true;
    }
    let Some(overrides) = overrides else {
        return true;
    };
    if overrides.iter().any(|o| o == op.override_token()) {
        return true;
    }

    let perms = document::permissions_of(doc);
    let set = match op {
        Operation::Read => {
            if perms.can_read.is_empty() {
                return true;
            }
            perms.can_read
        }
        Operation::Update => perms.can_update,
        Operation::Delete => perms.can_delete,
        Operation::Admin => perms.can_admin,
    };
    set.iter().any(|p| p == user_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
