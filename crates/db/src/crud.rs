//! Annotation lifecycle manager.
//!
//! Orchestrates create/update/delete/select/import/copy atop the
//! repositories. A single annotation plus its derived target and tag rows
//! is always written inside one transaction; the batch operations
//! (import, copy, delete cascade) are deliberately non-transactional as a
//! whole and report per-item outcomes instead.

use catchpy_core::document;
use catchpy_core::error::CoreError;
use catchpy_core::types::{format_timestamp, Timestamp};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::annotation::{
    AnnotationRow, BatchOutcome, CopyParams, NewAnnotation, NewTarget, SearchFilters,
};
use crate::repositories::annotation_repo::AnnotationRepo;
use crate::repositories::tag_repo::TagRepo;

/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CrudError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("annotation '{0}' already exists")]
    DuplicateId(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for CrudError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                // The id is re-attached by the caller that knows it.
                return CrudError::DuplicateId(
                    db_err.constraint().unwrap_or("unknown").to_string(),
                );
            }
        }
        CrudError::Database(e)
    }
}

impl CrudError {
    fn not_found(id: &str) -> Self {
        CrudError::Core(CoreError::NotFound {
            entity: "annotation",
            id: id.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Lifecycle manager
// ---------------------------------------------------------------------------

/// Stateless lifecycle operations over the annotation store.
pub struct AnnoCrud;

impl AnnoCrud {
    /// Create an annotation from a normalized catcha document.
    ///
    /// Requires a pre-assigned id. When `preserve_created` is set (import
    /// path) the document's own `created` is kept; otherwise both
    /// timestamps are set to now. The row, its targets, and its tag
    /// associations are written as one transaction.
    pub async fn create_anno(
        pool: &PgPool,
        catcha: &Value,
        preserve_created: bool,
    ) -> Result<AnnotationRow, CrudError> {
        let id = document::id_of(catcha).ok_or_else(|| {
            CoreError::Validation("create requires a pre-assigned annotation id".into())
        })?;

        let now = Utc::now();
        let created = if preserve_created {
            match document::created_of(catcha) {
                Some(s) => document::parse_timestamp(s)?,
                None => now,
            }
        } else {
            now
        };
        let input = project_document(catcha, &id, created, now)?;

        // A reply's parent must already exist, not merely be referenced.
        if let Some(ref parent_id) = input.new_annotation.reply_to {
            let parent = AnnotationRepo::find_by_id(pool, parent_id).await?;
            if parent.is_none() {
                return Err(CoreError::Validation(format!(
                    "reply parent '{parent_id}' does not exist"
                ))
                .into());
            }
        }

        let mut tx = pool.begin().await.map_err(CrudError::Database)?;
        let row = AnnotationRepo::insert(tx.as_mut(), &input.new_annotation)
            .await
            .map_err(|e| match CrudError::from(e) {
                CrudError::DuplicateId(_) => CrudError::DuplicateId(id.clone()),
                other => other,
            })?;
        AnnotationRepo::replace_targets(tx.as_mut(), &id, &input.targets).await?;
        TagRepo::set_for_annotation(tx.as_mut(), &id, &input.tags).await?;
        tx.commit().await.map_err(CrudError::Database)?;

        tracing::debug!(anno_id = %id, "annotation created");
        Ok(row)
    }

    /// Fully replace an annotation with a new normalized document.
    /// Preserves `created`, always advances `modified`, and replaces the
    /// target and tag sets wholesale. Soft-deleted rows read as not found.
    pub async fn update_anno(
        pool: &PgPool,
        existing: &AnnotationRow,
        catcha: &Value,
    ) -> Result<AnnotationRow, CrudError> {
        if existing.deleted {
            return Err(CrudError::not_found(&existing.id));
        }

        let now = Utc::now();
        let input = project_document(catcha, &existing.id, existing.created, now)?;

        let mut tx = pool.begin().await.map_err(CrudError::Database)?;
        let row = AnnotationRepo::update(tx.as_mut(), &input.new_annotation)
            .await?
            .ok_or_else(|| CrudError::not_found(&existing.id))?;
        AnnotationRepo::replace_targets(tx.as_mut(), &existing.id, &input.targets).await?;
        TagRepo::set_for_annotation(tx.as_mut(), &existing.id, &input.tags).await?;
        tx.commit().await.map_err(CrudError::Database)?;

        tracing::debug!(anno_id = %existing.id, "annotation updated");
        Ok(row)
    }

    /// Soft-delete an annotation and, first, all of its direct and
    /// transitive replies (depth-first). Already-deleted nodes count as
    /// success so concurrent deletes stay idempotent.
    pub async fn delete_anno(pool: &PgPool, id: &str) -> Result<AnnotationRow, CrudError> {
        let row = AnnotationRepo::find_by_id(pool, id)
            .await?
            .ok_or_else(|| CrudError::not_found(id))?;

        // Depth-first: children before the node itself, so a crash
        // mid-cascade never leaves a live reply under a deleted parent.
        let mut ordered: Vec<String> = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            ordered.push(current.clone());
            for reply_id in AnnotationRepo::list_reply_ids(pool, &current).await? {
                stack.push(reply_id);
            }
        }
        for node in ordered.iter().rev() {
            AnnotationRepo::mark_deleted(pool, node).await?;
        }

        tracing::debug!(anno_id = %id, cascade = ordered.len(), "annotation soft-deleted");
        Ok(AnnotationRow {
            deleted: true,
            ..row
        })
    }

    /// Fetch an annotation regardless of its deletion state (permission
    /// checks and idempotent deletes need the row either way).
    pub async fn fetch_any(pool: &PgPool, id: &str) -> Result<AnnotationRow, CrudError> {
        AnnotationRepo::find_by_id(pool, id)
            .await?
            .ok_or_else(|| CrudError::not_found(id))
    }

    /// Fetch a live annotation; soft-deleted rows read as not found.
    pub async fn read_anno(pool: &PgPool, id: &str) -> Result<AnnotationRow, CrudError> {
        let row = AnnotationRepo::find_by_id(pool, id)
            .await?
            .ok_or_else(|| CrudError::not_found(id))?;
        if row.deleted {
            return Err(CrudError::not_found(id));
        }
        Ok(row)
    }

    /// Filtered search, returning the total match count alongside the page.
    pub async fn select_annos(
        pool: &PgPool,
        filters: &SearchFilters,
    ) -> Result<(i64, Vec<AnnotationRow>), CrudError> {
        let total = AnnotationRepo::search_count(pool, filters).await?;
        let rows = AnnotationRepo::search(pool, filters).await?;
        Ok((total, rows))
    }

    /// Three-phase batch import: non-replies first (ascending `created`,
    /// a best-effort parent-before-child ordering), then replies, then
    /// soft-deletion of docs pre-flagged via `platform.deleted`. Not
    /// atomic as a whole; each item's failure lands in the outcome's
    /// discard list and never aborts the batch.
    pub async fn import_annos(pool: &PgPool, docs: &[Value]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut non_replies: Vec<&Value> = Vec::new();
        let mut replies: Vec<&Value> = Vec::new();
        let mut flagged_deleted: Vec<String> = Vec::new();

        for doc in docs {
            match document::reply_to(doc) {
                Ok(Some(_)) => replies.push(doc),
                Ok(None) => non_replies.push(doc),
                Err(e) => outcome.record_failure(document::id_of(doc), e.to_string()),
            }
        }
        sort_by_created(&mut non_replies);
        sort_by_created(&mut replies);

        for doc in non_replies.into_iter().chain(replies) {
            let id = document::id_of(doc);
            match Self::create_anno(pool, doc, true).await {
                Ok(row) => {
                    outcome.record_success();
                    if document::platform_deleted(doc) {
                        flagged_deleted.push(row.id);
                    }
                }
                Err(e) => outcome.record_failure(id, e.to_string()),
            }
        }

        // Phase 3: apply pre-flagged deletions, tolerating rows that are
        // already gone or already deleted.
        for id in flagged_deleted {
            if let Err(e) = Self::delete_anno(pool, &id).await {
                match e {
                    CrudError::Core(CoreError::NotFound { .. }) => {}
                    other => outcome.record_failure(Some(id), other.to_string()),
                }
            }
        }

        tracing::info!(
            total_success = outcome.total_success,
            total_failed = outcome.total_failed,
            "import finished"
        );
        outcome
    }

    /// Copy annotations into another context/collection, assigning fresh
    /// ids. Optionally remaps creator ids and copies direct, non-deleted
    /// replies re-pointed at the new parent. Non-transactional across the
    /// set, per-item outcomes reported.
    pub async fn copy_annos(
        pool: &PgPool,
        sources: &[AnnotationRow],
        params: &CopyParams,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for source in sources {
            let new_id = Uuid::new_v4().to_string();
            let doc = match rewrite_for_copy(&source.raw, &new_id, params, None) {
                Ok(doc) => doc,
                Err(e) => {
                    outcome.record_failure(Some(source.id.clone()), e.to_string());
                    continue;
                }
            };
            match Self::create_anno(pool, &doc, true).await {
                Ok(_) => outcome.record_success(),
                Err(e) => {
                    outcome.record_failure(Some(source.id.clone()), e.to_string());
                    continue;
                }
            }

            if !params.with_replies {
                continue;
            }
            let replies = match AnnotationRepo::list_replies(pool, &source.id, false).await {
                Ok(replies) => replies,
                Err(e) => {
                    outcome.record_failure(Some(source.id.clone()), e.to_string());
                    continue;
                }
            };
            for reply in replies {
                let reply_id = Uuid::new_v4().to_string();
                let result = rewrite_for_copy(&reply.raw, &reply_id, params, Some(&new_id));
                match result {
                    Ok(doc) => match Self::create_anno(pool, &doc, true).await {
                        Ok(_) => outcome.record_success(),
                        Err(e) => outcome.record_failure(Some(reply.id.clone()), e.to_string()),
                    },
                    Err(e) => outcome.record_failure(Some(reply.id.clone()), e.to_string()),
                }
            }
        }

        tracing::info!(
            total_success = outcome.total_success,
            total_failed = outcome.total_failed,
            "copy finished"
        );
        outcome
    }

    /// Permanently purge all soft-deleted annotations.
    pub async fn true_delete_sweep(pool: &PgPool) -> Result<u64, CrudError> {
        let purged = AnnotationRepo::purge_deleted(pool).await?;
        tracing::info!(purged, "true-delete sweep finished");
        Ok(purged)
    }

    /// Render a stored row as a catcha response document, with the live
    /// reply count attached.
    pub async fn render_catcha(pool: &PgPool, row: &AnnotationRow) -> Result<Value, CrudError> {
        let total_replies = AnnotationRepo::count_replies(pool, &row.id).await?;
        let mut doc = row.raw.clone();
        doc["totalReplies"] = json!(total_replies);
        Ok(doc)
    }

    /// Render a stored row as a legacy AnnotatorJS document, fetching the
    /// parent document when the row is a reply.
    pub async fn render_annojs(pool: &PgPool, row: &AnnotationRow) -> Result<Value, CrudError> {
        let total_replies = AnnotationRepo::count_replies(pool, &row.id).await?;
        let parent = match &row.reply_to {
            Some(parent_id) => Some(
                AnnotationRepo::find_by_id(pool, parent_id)
                    .await?
                    .ok_or_else(|| CrudError::not_found(parent_id))?,
            ),
            None => None,
        };
        let doc = catchpy_core::convert::convert_from_anno(
            &row.raw,
            parent.as_ref().map(|p| &p.raw),
            total_replies,
        )?;
        Ok(doc)
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

struct ProjectedDocument {
    new_annotation: NewAnnotation,
    targets: Vec<NewTarget>,
    tags: Vec<String>,
}

/// Decompose a catcha document into the derived relational projection.
/// The raw document inside the projection is rewritten so its id and
/// timestamps agree with the columns; nothing else is touched.
fn project_document(
    catcha: &Value,
    id: &str,
    created: Timestamp,
    modified: Timestamp,
) -> Result<ProjectedDocument, CoreError> {
    let groups = document::group_body_items(catcha)?;
    let (target_type, target_items) = document::extract_targets(catcha)?;
    let reply_to = document::reply_to(catcha)?;
    let creator = document::creator_of(catcha);
    let permissions = document::permissions_of(catcha);
    let schema_version = catcha
        .get("schema_version")
        .and_then(Value::as_str)
        .unwrap_or(catchpy_core::media::CATCHA_SCHEMA_VERSION)
        .to_string();

    let mut raw = catcha.clone();
    raw["id"] = json!(id);
    raw["created"] = json!(format_timestamp(created));
    raw["modified"] = json!(format_timestamp(modified));

    let targets = target_items
        .iter()
        .map(|t| NewTarget {
            target_source: t.source.clone(),
            target_media: t.media.as_str().to_string(),
        })
        .collect();

    Ok(ProjectedDocument {
        new_annotation: NewAnnotation {
            id: id.to_string(),
            schema_version,
            created,
            modified,
            creator_id: creator.id,
            creator_name: creator.name,
            body_text: groups.text,
            body_format: groups.format,
            target_type: target_type.as_str().to_string(),
            reply_to,
            can_read: permissions.can_read,
            can_update: permissions.can_update,
            can_delete: permissions.can_delete,
            can_admin: permissions.can_admin,
            raw,
        },
        targets,
        tags: groups.tags,
    })
}

/// Ascending `created` order, best-effort parent-before-child heuristic
/// for import. Unparseable timestamps sort by their string form.
fn sort_by_created(docs: &mut [&Value]) {
    docs.sort_by_key(|doc| document::created_of(doc).unwrap_or("").to_string());
}

/// Rewrite a source document for the copy operation: fresh id, target
/// context/collection, optional platform rename, optional creator remap,
/// and, for replies, the new parent id.
fn rewrite_for_copy(
    raw: &Value,
    new_id: &str,
    params: &CopyParams,
    new_parent_id: Option<&str>,
) -> Result<Value, CoreError> {
    let mut doc = raw.clone();
    doc["id"] = json!(new_id);
    doc["platform"]["context_id"] = json!(params.target_context_id);
    doc["platform"]["collection_id"] = json!(params.target_collection_id);
    if params.fix_platform_name {
        if let Some(ref platform_name) = params.platform_name {
            doc["platform"]["platform_name"] = json!(platform_name);
        }
    }

    if let Some(ref userid_map) = params.userid_map {
        let creator = document::creator_of(&doc);
        if let Some(new_creator) = userid_map.get(&creator.id) {
            doc["creator"]["id"] = json!(new_creator);
            // Remapped copies are forced fully public-readable; write
            // access collapses to the new creator alone.
            doc["permissions"] = json!({
                "can_read": [],
                "can_update": [new_creator],
                "can_delete": [new_creator],
                "can_admin": [new_creator],
            });
        }
    }

    if let Some(parent_id) = new_parent_id {
        let items = doc
            .pointer_mut("/target/items")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| CoreError::Validation("reply document has no target items".into()))?;
        for item in items {
            if item.get("type").and_then(Value::as_str) == Some("Annotation") {
                item["source"] = json!(parent_id);
            }
        }
        doc["platform"]["target_source_id"] = json!(parent_id);
    }

    Ok(doc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn catcha_doc() -> Value {
        json!({
            "@context": "http://catchpy.harvardx.harvard.edu/jsonld/catch_context_jsonld.json",
            "type": "Annotation",
            "schema_version": "1.2.0",
            "id": "anno-1",
            "created": "2024-03-01T16:04:05+00:00",
            "modified": "2024-03-01T16:04:05+00:00",
            "creator": { "id": "user-1", "name": "Ada" },
            "permissions": {
                "can_read": [], "can_update": ["user-1"],
                "can_delete": ["user-1"], "can_admin": ["user-1"],
            },
            "platform": {
                "platform_name": "hxat",
                "context_id": "course-9",
                "collection_id": "assignment-2",
                "target_source_id": "doc-55",
            },
            "body": {
                "type": "List",
                "items": [
                    { "type": "TextualBody", "purpose": "commenting",
                      "format": "text/html", "value": "a note" },
                    { "type": "TextualBody", "purpose": "tagging", "value": "alpha" },
                    { "type": "TextualBody", "purpose": "tagging", "value": "alpha" },
                ],
            },
            "target": {
                "type": "List",
                "items": [
                    { "source": "http://lti/doc-55", "type": "Text", "format": "text/html" },
                ],
            },
        })
    }

    fn ts(s: &str) -> Timestamp {
        document::parse_timestamp(s).unwrap()
    }

    #[test]
    fn projection_decomposes_document() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let projected = project_document(&catcha_doc(), "anno-1", now, now).unwrap();
        let row = &projected.new_annotation;
        assert_eq!(row.id, "anno-1");
        assert_eq!(row.creator_id, "user-1");
        assert_eq!(row.body_text, "a note");
        assert_eq!(row.target_type, "List");
        assert!(row.reply_to.is_none());
        // Duplicate tag values collapse before any row is written.
        assert_eq!(projected.tags, vec!["alpha"]);
        assert_eq!(projected.targets.len(), 1);
        assert_eq!(projected.targets[0].target_media, "Text");
    }

    #[test]
    fn projection_rewrites_raw_timestamps() {
        let created = ts("2020-01-01T00:00:00+00:00");
        let modified = ts("2024-06-01T12:00:00+00:00");
        let projected = project_document(&catcha_doc(), "anno-1", created, modified).unwrap();
        let raw = &projected.new_annotation.raw;
        assert_eq!(raw["created"], json!("2020-01-01T00:00:00+00:00"));
        assert_eq!(raw["modified"], json!("2024-06-01T12:00:00+00:00"));
    }

    #[test]
    fn sort_by_created_is_ascending() {
        let a = json!({ "created": "2024-03-02T00:00:00+00:00" });
        let b = json!({ "created": "2024-03-01T00:00:00+00:00" });
        let c = json!({ "created": "2024-03-03T00:00:00+00:00" });
        let mut docs = vec![&a, &b, &c];
        sort_by_created(&mut docs);
        let order: Vec<&str> = docs
            .iter()
            .map(|d| d["created"].as_str().unwrap())
            .collect();
        assert_eq!(
            order,
            vec![
                "2024-03-01T00:00:00+00:00",
                "2024-03-02T00:00:00+00:00",
                "2024-03-03T00:00:00+00:00",
            ]
        );
    }

    #[test]
    fn copy_rewrites_platform_and_id() {
        let params = CopyParams {
            target_context_id: "course-new".into(),
            target_collection_id: "assign-new".into(),
            userid_map: None,
            fix_platform_name: false,
            platform_name: None,
            with_replies: false,
        };
        let doc = rewrite_for_copy(&catcha_doc(), "fresh-id", &params, None).unwrap();
        assert_eq!(doc["id"], json!("fresh-id"));
        assert_eq!(doc["platform"]["context_id"], json!("course-new"));
        assert_eq!(doc["platform"]["collection_id"], json!("assign-new"));
        // Untouched without a remap.
        assert_eq!(doc["creator"]["id"], json!("user-1"));
        assert_eq!(doc["permissions"]["can_update"], json!(["user-1"]));
    }

    #[test]
    fn copy_userid_remap_forces_public() {
        let mut map = std::collections::HashMap::new();
        map.insert("user-1".to_string(), "user-9".to_string());
        let params = CopyParams {
            target_context_id: "course-new".into(),
            target_collection_id: "assign-new".into(),
            userid_map: Some(map),
            fix_platform_name: false,
            platform_name: None,
            with_replies: false,
        };
        let doc = rewrite_for_copy(&catcha_doc(), "fresh-id", &params, None).unwrap();
        assert_eq!(doc["creator"]["id"], json!("user-9"));
        assert_eq!(doc["permissions"]["can_read"], json!([]));
        assert_eq!(doc["permissions"]["can_update"], json!(["user-9"]));
        assert_eq!(doc["permissions"]["can_admin"], json!(["user-9"]));
    }

    #[test]
    fn copy_reply_repointed_at_new_parent() {
        let mut reply = catcha_doc();
        reply["target"]["items"] = json!([
            { "source": "old-parent", "type": "Annotation", "format": "text/html" }
        ]);
        let params = CopyParams {
            target_context_id: "c".into(),
            target_collection_id: "a".into(),
            userid_map: None,
            fix_platform_name: false,
            platform_name: None,
            with_replies: true,
        };
        let doc = rewrite_for_copy(&reply, "new-reply", &params, Some("new-parent")).unwrap();
        assert_eq!(doc["target"]["items"][0]["source"], json!("new-parent"));
        assert_eq!(doc["platform"]["target_source_id"], json!("new-parent"));
    }

    #[test]
    fn copy_platform_rename_requires_flag() {
        let params = CopyParams {
            target_context_id: "c".into(),
            target_collection_id: "a".into(),
            userid_map: None,
            fix_platform_name: true,
            platform_name: Some("edx".into()),
            with_replies: false,
        };
        let doc = rewrite_for_copy(&catcha_doc(), "x", &params, None).unwrap();
        assert_eq!(doc["platform"]["platform_name"], json!("edx"));
    }
}
