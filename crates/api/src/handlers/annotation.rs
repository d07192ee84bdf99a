//! Handlers for single-annotation CRUD and search.
//!
//! Every inbound document runs through the validator's `normalize` (either
//! dialect in, schema-checked catcha out) before it can touch the store;
//! every outbound document is rendered from the stored raw catcha in the
//! caller's requested dialect.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use catchpy_core::document;
use catchpy_core::error::CoreError;
use catchpy_core::validate::{check_for_create_conflicts, Operation};
use catchpy_db::crud::AnnoCrud;
use catchpy_db::models::annotation::AnnotationRow;
use catchpy_db::DbPool;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::query::{FormatParams, OutputFormat, SearchParams};
use crate::response::SearchResponse;
use crate::state::AppState;

/* --------------------------------------------------------------------------
   Rendering
   -------------------------------------------------------------------------- */

/// Render a stored row in the requested output dialect.
pub async fn render(
    pool: &DbPool,
    row: &AnnotationRow,
    format: OutputFormat,
) -> AppResult<Value> {
    let doc = match format {
        OutputFormat::Catcha => AnnoCrud::render_catcha(pool, row).await?,
        OutputFormat::Annotatorjs => AnnoCrud::render_annojs(pool, row).await?,
    };
    Ok(doc)
}

/* --------------------------------------------------------------------------
   Handlers
   -------------------------------------------------------------------------- */

/// POST /annos
///
/// Create an annotation; the server assigns the id when the document
/// carries none.
pub async fn create_annotation(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<FormatParams>,
    Json(input): Json<Value>,
) -> AppResult<impl IntoResponse> {
    create_inner(auth, state, params.format, input, None).await
}

/// POST /annos/{id}
///
/// Create an annotation under a client-chosen id.
pub async fn create_annotation_with_id(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FormatParams>,
    Json(input): Json<Value>,
) -> AppResult<impl IntoResponse> {
    create_inner(auth, state, params.format, input, Some(id)).await
}

async fn create_inner(
    auth: AuthUser,
    state: AppState,
    format: OutputFormat,
    input: Value,
    path_id: Option<String>,
) -> AppResult<impl IntoResponse> {
    let mut doc = state.validator.normalize(&input).map_err(AppError::Core)?;

    match (path_id, document::id_of(&doc)) {
        (Some(path_id), Some(doc_id)) if path_id != doc_id => {
            return Err(AppError::Core(CoreError::Conflict(format!(
                "document id '{doc_id}' does not match path id '{path_id}'"
            ))));
        }
        (Some(path_id), _) => doc["id"] = Value::String(path_id),
        (None, Some(_)) => {}
        (None, None) => doc["id"] = Value::String(Uuid::new_v4().to_string()),
    }

    check_for_create_conflicts(&doc, &auth.user_id).map_err(AppError::Core)?;

    let row = AnnoCrud::create_anno(&state.pool, &doc, false).await?;
    tracing::info!(user_id = %auth.user_id, anno_id = %row.id, "Annotation created");

    let rendered = render(&state.pool, &row, format).await?;
    Ok((StatusCode::CREATED, Json(rendered)))
}

/// GET /annos/{id}
pub async fn get_annotation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FormatParams>,
) -> AppResult<impl IntoResponse> {
    let row = AnnoCrud::read_anno(&state.pool, &id).await?;
    if !auth.may(&row.raw, Operation::Read) {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "user '{}' may not read annotation '{id}'",
            auth.user_id
        ))));
    }
    let rendered = render(&state.pool, &row, params.format).await?;
    Ok(Json(rendered))
}

/// PUT /annos/{id}
///
/// Fully replace an annotation (targets and tags included).
pub async fn update_annotation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FormatParams>,
    Json(input): Json<Value>,
) -> AppResult<impl IntoResponse> {
    let existing = AnnoCrud::read_anno(&state.pool, &id).await?;
    if !auth.may(&existing.raw, Operation::Update) {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "user '{}' may not update annotation '{id}'",
            auth.user_id
        ))));
    }

    let mut doc = state.validator.normalize(&input).map_err(AppError::Core)?;
    // The path id wins; an update cannot move a document to a new id.
    doc["id"] = Value::String(id.clone());

    let row = AnnoCrud::update_anno(&state.pool, &existing, &doc).await?;
    tracing::info!(user_id = %auth.user_id, anno_id = %id, "Annotation updated");

    let rendered = render(&state.pool, &row, params.format).await?;
    Ok(Json(rendered))
}

/// DELETE /annos/{id}
///
/// Soft-delete an annotation and its reply subtree. Idempotent: deleting
/// an already-deleted annotation succeeds.
pub async fn delete_annotation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FormatParams>,
) -> AppResult<impl IntoResponse> {
    let existing = AnnoCrud::fetch_any(&state.pool, &id).await?;
    if !auth.may(&existing.raw, Operation::Delete) {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "user '{}' may not delete annotation '{id}'",
            auth.user_id
        ))));
    }

    let row = AnnoCrud::delete_anno(&state.pool, &id).await?;
    tracing::info!(user_id = %auth.user_id, anno_id = %id, "Annotation deleted");

    let rendered = render(&state.pool, &row, params.format).await?;
    Ok(Json(rendered))
}

/// GET /annos
///
/// Filtered search over top-level, non-deleted annotations, newest first.
/// Non-privileged callers only see rows they are allowed to read.
pub async fn search_annotations(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<impl IntoResponse> {
    let format = params.format;
    let mut filters = params.into_filters(state.config.default_page_size)?;
    if !auth.is_privileged(Operation::Read) {
        filters.read_principal = Some(auth.user_id.clone());
    }
    let limit = filters.limit.unwrap_or(state.config.default_page_size);
    let offset = filters.offset.unwrap_or(0);

    let (total, rows) = AnnoCrud::select_annos(&state.pool, &filters).await?;

    let mut rendered = Vec::with_capacity(rows.len());
    for row in &rows {
        match render(&state.pool, row, format).await {
            Ok(doc) => rendered.push(doc),
            // Documents that cannot take the legacy shape (e.g. multiple
            // targets) are dropped from annotatorjs result sets.
            Err(e) if format == OutputFormat::Annotatorjs => {
                tracing::debug!(anno_id = %row.id, error = %e, "Row skipped in legacy output");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Json(SearchResponse {
        total,
        size: rendered.len(),
        limit,
        offset,
        rows: rendered,
    }))
}
