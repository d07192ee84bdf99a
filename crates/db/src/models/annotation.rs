//! Annotation model and DTOs.

use catchpy_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// A row from the `annotations` table.
///
/// `raw` holds the catcha document exactly as last written and is the
/// authoritative source for serialization; every other column is a
/// projection recomputed from `raw` on write and used only for filtering.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AnnotationRow {
    pub id: String,
    pub schema_version: String,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub creator_id: String,
    pub creator_name: String,
    pub body_text: String,
    pub body_format: String,
    pub target_type: String,
    pub reply_to: Option<String>,
    pub deleted: bool,
    pub can_read: Vec<String>,
    pub can_update: Vec<String>,
    pub can_delete: Vec<String>,
    pub can_admin: Vec<String>,
    pub raw: Value,
}

/// Column values for inserting or fully replacing an annotation row.
/// Computed by the lifecycle manager from the raw document, never supplied
/// directly by callers.
#[derive(Debug, Clone)]
pub struct NewAnnotation {
    pub id: String,
    pub schema_version: String,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub creator_id: String,
    pub creator_name: String,
    pub body_text: String,
    pub body_format: String,
    pub target_type: String,
    pub reply_to: Option<String>,
    pub can_read: Vec<String>,
    pub can_update: Vec<String>,
    pub can_delete: Vec<String>,
    pub can_admin: Vec<String>,
    pub raw: Value,
}

/// A target row derived from one item of the document's target envelope.
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub target_source: String,
    pub target_media: String,
}

/// Filter parameters for the annotation search scan.
///
/// List filters are OR-combined within a list and AND-combined across
/// filters, except `tag_list` which is AND-combined per tag with a
/// substring-contains match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilters {
    pub context_id: Option<String>,
    pub collection_id: Option<String>,
    pub platform_name: Option<String>,
    #[serde(default)]
    pub userid_list: Vec<String>,
    #[serde(default)]
    pub username_list: Vec<String>,
    #[serde(default)]
    pub tag_list: Vec<String>,
    pub target_source: Option<String>,
    pub media: Option<String>,
    pub text: Option<String>,
    pub since: Option<Timestamp>,
    /// Export mode: include soft-deleted rows and replies.
    #[serde(default)]
    pub include_deleted_and_replies: bool,
    /// When set, restrict results to rows this principal may read: public
    /// rows, rows they created, or rows whose `can_read` lists them.
    /// Left unset for admin/override callers.
    #[serde(skip)]
    pub read_principal: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One item that failed inside a batch operation, with a human-readable
/// reason. Batches never abort on a single failure.
#[derive(Debug, Clone, Serialize)]
pub struct DiscardedItem {
    pub id: Option<String>,
    pub reason: String,
}

/// Aggregate result of a non-transactional batch operation (import, copy).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub total_success: usize,
    pub total_failed: usize,
    pub failed: Vec<DiscardedItem>,
}

impl BatchOutcome {
    pub fn record_success(&mut self) {
        self.total_success += 1;
    }

    pub fn record_failure(&mut self, id: Option<String>, reason: impl Into<String>) {
        self.total_failed += 1;
        self.failed.push(DiscardedItem {
            id,
            reason: reason.into(),
        });
    }
}

/// Parameters for copying a set of annotations into another
/// context/collection.
#[derive(Debug, Clone, Deserialize)]
pub struct CopyParams {
    pub target_context_id: String,
    pub target_collection_id: String,
    /// Old creator id -> new creator id. Remapped copies are forced fully
    /// public-readable with write access restricted to the new creator.
    pub userid_map: Option<std::collections::HashMap<String, String>>,
    #[serde(default)]
    pub fix_platform_name: bool,
    pub platform_name: Option<String>,
    /// Also copy each source's direct, non-deleted replies, re-pointed at
    /// the new parent id.
    #[serde(default)]
    pub with_replies: bool,
}
