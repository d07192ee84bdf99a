//! Repository for the `annotations` and `annotation_targets` tables.

use catchpy_core::types::Timestamp;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use crate::models::annotation::{AnnotationRow, NewAnnotation, NewTarget, SearchFilters};

/// Column list for annotations queries.
const COLUMNS: &str = "id, schema_version, created, modified, creator_id, creator_name, \
    body_text, body_format, target_type, reply_to, deleted, \
    can_read, can_update, can_delete, can_admin, raw";

/// Reply tally over the whole thread, soft-deleted rows included: the
/// count feeds `totalComments`/`total_replies`, which tracks thread size,
/// not its visible portion.
const COUNT_REPLIES_SQL: &str = "SELECT COUNT(*) FROM annotations WHERE reply_to = $1";

/// Provides row-level operations for annotations.
pub struct AnnotationRepo;

impl AnnotationRepo {
    /// Insert a new annotation row, returning the created row. A duplicate
    /// id surfaces as a unique violation on the primary key.
    pub async fn insert(
        conn: &mut PgConnection,
        input: &NewAnnotation,
    ) -> Result<AnnotationRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO annotations
                (id, schema_version, created, modified, creator_id, creator_name,
                 body_text, body_format, target_type, reply_to,
                 can_read, can_update, can_delete, can_admin, raw)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnnotationRow>(&query)
            .bind(&input.id)
            .bind(&input.schema_version)
            .bind(input.created)
            .bind(input.modified)
            .bind(&input.creator_id)
            .bind(&input.creator_name)
            .bind(&input.body_text)
            .bind(&input.body_format)
            .bind(&input.target_type)
            .bind(&input.reply_to)
            .bind(&input.can_read)
            .bind(&input.can_update)
            .bind(&input.can_delete)
            .bind(&input.can_admin)
            .bind(&input.raw)
            .fetch_one(conn)
            .await
    }

    /// Fully replace a non-deleted annotation row, preserving `created`.
    /// Returns `None` when the row is missing or soft-deleted.
    pub async fn update(
        conn: &mut PgConnection,
        input: &NewAnnotation,
    ) -> Result<Option<AnnotationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE annotations SET
                schema_version = $2, modified = $3,
                creator_id = $4, creator_name = $5,
                body_text = $6, body_format = $7,
                target_type = $8, reply_to = $9,
                can_read = $10, can_update = $11, can_delete = $12, can_admin = $13,
                raw = $14
             WHERE id = $1 AND deleted = FALSE
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnnotationRow>(&query)
            .bind(&input.id)
            .bind(&input.schema_version)
            .bind(input.modified)
            .bind(&input.creator_id)
            .bind(&input.creator_name)
            .bind(&input.body_text)
            .bind(&input.body_format)
            .bind(&input.target_type)
            .bind(&input.reply_to)
            .bind(&input.can_read)
            .bind(&input.can_update)
            .bind(&input.can_delete)
            .bind(&input.can_admin)
            .bind(&input.raw)
            .fetch_optional(conn)
            .await
    }

    /// Find an annotation by its id, soft-deleted rows included.
    pub async fn find_by_id(
        pool: &PgPool,
        id: &str,
    ) -> Result<Option<AnnotationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM annotations WHERE id = $1");
        sqlx::query_as::<_, AnnotationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Soft-delete an annotation. Returns true if the row was flipped,
    /// false when it was already deleted or missing.
    pub async fn mark_deleted(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE annotations SET deleted = TRUE WHERE id = $1 AND deleted = FALSE")
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of all direct replies (deleted included, for cascade walks).
    pub async fn list_reply_ids(pool: &PgPool, id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM annotations WHERE reply_to = $1")
                .bind(id)
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Direct replies of an annotation, oldest first.
    pub async fn list_replies(
        pool: &PgPool,
        id: &str,
        include_deleted: bool,
    ) -> Result<Vec<AnnotationRow>, sqlx::Error> {
        let deleted_clause = if include_deleted {
            ""
        } else {
            "AND deleted = FALSE"
        };
        let query = format!(
            "SELECT {COLUMNS} FROM annotations
             WHERE reply_to = $1 {deleted_clause}
             ORDER BY created ASC"
        );
        sqlx::query_as::<_, AnnotationRow>(&query)
            .bind(id)
            .fetch_all(pool)
            .await
    }

    /// Count of direct replies, soft-deleted included.
    pub async fn count_replies(pool: &PgPool, id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(COUNT_REPLIES_SQL)
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Permanently remove every soft-deleted row (child targets and tag
    /// associations go with them via FK cascade). Returns the number of
    /// annotations purged.
    pub async fn purge_deleted(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM annotations WHERE deleted = TRUE")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Replace the derived target rows for an annotation.
    pub async fn replace_targets(
        conn: &mut PgConnection,
        annotation_id: &str,
        targets: &[NewTarget],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM annotation_targets WHERE annotation_id = $1")
            .bind(annotation_id)
            .execute(&mut *conn)
            .await?;
        for target in targets {
            sqlx::query(
                "INSERT INTO annotation_targets (annotation_id, target_source, target_media)
                 VALUES ($1, $2, $3)",
            )
            .bind(annotation_id)
            .bind(&target.target_source)
            .bind(&target.target_media)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Filtered, sorted (newest created first), paginated scan.
    pub async fn search(
        pool: &PgPool,
        filters: &SearchFilters,
    ) -> Result<Vec<AnnotationRow>, sqlx::Error> {
        let (where_clause, bind_values, mut bind_idx) = build_search_filter(filters);

        let mut query = format!(
            "SELECT {COLUMNS} FROM annotations {where_clause} ORDER BY created DESC"
        );
        let limit = filters.limit.unwrap_or(i64::MAX);
        let offset = filters.offset.unwrap_or(0);
        query.push_str(&format!(" LIMIT ${bind_idx}"));
        bind_idx += 1;
        query.push_str(&format!(" OFFSET ${bind_idx}"));

        let q = sqlx::query_as::<_, AnnotationRow>(&query);
        let q = bind_search_values(q, &bind_values);
        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Total row count for a search, ignoring pagination.
    pub async fn search_count(
        pool: &PgPool,
        filters: &SearchFilters,
    ) -> Result<i64, sqlx::Error> {
        let (where_clause, bind_values, _) = build_search_filter(filters);
        let query = format!("SELECT COUNT(*) FROM annotations {where_clause}");
        let q = sqlx::query_scalar::<_, i64>(&query);
        let q = bind_search_values_scalar(q, &bind_values);
        q.fetch_one(pool).await
    }
}

/// Typed bind value for dynamically-built search queries.
enum BindValue {
    Text(String),
    TextArray(Vec<String>),
    Timestamp(Timestamp),
    Json(Value),
}

/// Build a WHERE clause and bind values from `SearchFilters`.
///
/// Returns `(where_clause, bind_values, next_bind_index)`.
/// The `where_clause` is empty if no filters are active, or starts with `WHERE `.
fn build_search_filter(filters: &SearchFilters) -> (String, Vec<BindValue>, u32) {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_idx = 1u32;
    let mut bind_values: Vec<BindValue> = Vec::new();

    if !filters.include_deleted_and_replies {
        conditions.push("deleted = FALSE".into());
        conditions.push("reply_to IS NULL".into());
    }

    // Platform predicates go through jsonb containment on the raw
    // document, the projection columns don't carry them.
    let mut platform = serde_json::Map::new();
    if let Some(ref context_id) = filters.context_id {
        platform.insert("context_id".into(), Value::String(context_id.clone()));
    }
    if let Some(ref collection_id) = filters.collection_id {
        platform.insert("collection_id".into(), Value::String(collection_id.clone()));
    }
    if let Some(ref platform_name) = filters.platform_name {
        platform.insert("platform_name".into(), Value::String(platform_name.clone()));
    }
    if !platform.is_empty() {
        conditions.push(format!("raw -> 'platform' @> ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(BindValue::Json(Value::Object(platform)));
    }

    if !filters.userid_list.is_empty() {
        conditions.push(format!("creator_id = ANY(${bind_idx})"));
        bind_idx += 1;
        bind_values.push(BindValue::TextArray(filters.userid_list.clone()));
    }

    if !filters.username_list.is_empty() {
        conditions.push(format!("creator_name = ANY(${bind_idx})"));
        bind_idx += 1;
        bind_values.push(BindValue::TextArray(filters.username_list.clone()));
    }

    // Tags are AND-combined, each with a substring-contains match.
    for tag in &filters.tag_list {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM annotation_tags at
                     JOIN tags t ON t.id = at.tag_id
                     WHERE at.annotation_id = annotations.id
                       AND t.name ILIKE ${bind_idx})"
        ));
        bind_idx += 1;
        bind_values.push(BindValue::Text(format!("%{tag}%")));
    }

    if let Some(ref target_source) = filters.target_source {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM annotation_targets tg
                     WHERE tg.annotation_id = annotations.id
                       AND tg.target_source = ${bind_idx})"
        ));
        bind_idx += 1;
        bind_values.push(BindValue::Text(target_source.clone()));
    }

    if let Some(ref media) = filters.media {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM annotation_targets tg
                     WHERE tg.annotation_id = annotations.id
                       AND tg.target_media = ${bind_idx})"
        ));
        bind_idx += 1;
        bind_values.push(BindValue::Text(media.clone()));
    }

    if let Some(ref text) = filters.text {
        conditions.push(format!("body_text ILIKE ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(BindValue::Text(format!("%{text}%")));
    }

    if let Some(ref principal) = filters.read_principal {
        conditions.push(format!(
            "(can_read = '{{}}' OR creator_id = ${bind_idx} OR ${bind_idx} = ANY(can_read))"
        ));
        bind_idx += 1;
        bind_values.push(BindValue::Text(principal.clone()));
    }

    if let Some(since) = filters.since {
        conditions.push(format!("created >= ${bind_idx}"));
        bind_idx += 1;
        bind_values.push(BindValue::Timestamp(since));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, bind_values, bind_idx)
}

/// Bind a slice of `BindValue` to a sqlx `QueryAs`.
fn bind_search_values<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    bind_values: &'q [BindValue],
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    for val in bind_values {
        match val {
            BindValue::Text(v) => q = q.bind(v.as_str()),
            BindValue::TextArray(v) => q = q.bind(v),
            BindValue::Timestamp(v) => q = q.bind(*v),
            BindValue::Json(v) => q = q.bind(v),
        }
    }
    q
}

/// Bind a slice of `BindValue` to a sqlx `QueryScalar`.
fn bind_search_values_scalar<'q>(
    mut q: sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments>,
    bind_values: &'q [BindValue],
) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments> {
    for val in bind_values {
        match val {
            BindValue::Text(v) => q = q.bind(v.as_str()),
            BindValue::TextArray(v) => q = q.bind(v),
            BindValue::Timestamp(v) => q = q.bind(*v),
            BindValue::Json(v) => q = q.bind(v),
        }
    }
    q
}
