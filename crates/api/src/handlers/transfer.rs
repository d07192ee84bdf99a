//! Handlers for the bulk operations: export, import, copy, and the
//! true-delete sweep.
//!
//! All four cross user boundaries, so they require the admin group id or
//! a `CAN_ADMIN` token override. Import and copy are deliberately
//! non-transactional; per-item failures land in the returned outcome
//! instead of aborting the batch.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use catchpy_core::error::CoreError;
use catchpy_core::validate::Operation;
use catchpy_db::crud::AnnoCrud;
use catchpy_db::models::annotation::{BatchOutcome, CopyParams, SearchFilters};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::query::SearchParams;
use crate::response::{DataResponse, SearchResponse};
use crate::state::AppState;

fn require_admin(auth: &AuthUser, what: &str) -> AppResult<()> {
    if auth.is_privileged(Operation::Admin) {
        return Ok(());
    }
    Err(AppError::Core(CoreError::Forbidden(format!(
        "user '{}' may not {what}",
        auth.user_id
    ))))
}

/// GET /annos/export
///
/// Export-mode search: soft-deleted rows and replies included, raw catcha
/// documents out. Deleted rows are stamped `platform.deleted` so a later
/// import can replay the deletion.
pub async fn export_annotations(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth, "export annotations")?;

    let mut filters = params.into_filters(state.config.default_page_size)?;
    filters.include_deleted_and_replies = true;
    let limit = filters.limit.unwrap_or(state.config.default_page_size);
    let offset = filters.offset.unwrap_or(0);

    let (total, rows) = AnnoCrud::select_annos(&state.pool, &filters).await?;

    let rendered: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut doc = row.raw.clone();
            if row.deleted {
                doc["platform"]["deleted"] = json!(true);
            }
            doc
        })
        .collect();

    Ok(Json(SearchResponse {
        total,
        size: rendered.len(),
        limit,
        offset,
        rows: rendered,
    }))
}

/// POST /annos/import
///
/// Three-phase batch import of previously exported documents. Documents
/// failing normalization are discarded up front; the rest go through the
/// lifecycle manager with their original timestamps preserved.
pub async fn import_annotations(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(docs): Json<Vec<Value>>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth, "import annotations")?;

    let mut outcome = BatchOutcome::default();
    let mut normalized = Vec::with_capacity(docs.len());
    for doc in &docs {
        match state.validator.normalize(doc) {
            Ok(doc) => normalized.push(doc),
            Err(e) => {
                outcome.record_failure(catchpy_core::document::id_of(doc), e.to_string());
            }
        }
    }

    let import_outcome = AnnoCrud::import_annos(&state.pool, &normalized).await;
    outcome.total_success += import_outcome.total_success;
    outcome.total_failed += import_outcome.total_failed;
    outcome.failed.extend(import_outcome.failed);

    tracing::info!(
        user_id = %auth.user_id,
        total_success = outcome.total_success,
        total_failed = outcome.total_failed,
        "Import finished"
    );
    Ok(Json(DataResponse { data: outcome }))
}

/// Request body for the copy endpoint.
#[derive(Debug, Deserialize)]
pub struct CopyRequest {
    /// Context to copy from.
    pub source_context_id: String,
    /// Collection to copy from; all collections in the context when unset.
    pub source_collection_id: Option<String>,
    #[serde(flatten)]
    pub params: CopyParams,
}

/// POST /annos/copy
///
/// Copy all top-level annotations of a source context/collection into a
/// target context/collection under fresh ids.
pub async fn copy_annotations(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<CopyRequest>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth, "copy annotations")?;

    let filters = SearchFilters {
        context_id: Some(request.source_context_id.clone()),
        collection_id: request.source_collection_id.clone(),
        ..Default::default()
    };
    let (_, sources) = AnnoCrud::select_annos(&state.pool, &filters).await?;

    let outcome = AnnoCrud::copy_annos(&state.pool, &sources, &request.params).await;
    tracing::info!(
        user_id = %auth.user_id,
        source_context = %request.source_context_id,
        total_success = outcome.total_success,
        total_failed = outcome.total_failed,
        "Copy finished"
    );
    Ok(Json(DataResponse { data: outcome }))
}

/// DELETE /annos/deleted
///
/// Permanently purge every soft-deleted annotation.
pub async fn purge_deleted_annotations(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth, "purge deleted annotations")?;

    let purged = AnnoCrud::true_delete_sweep(&state.pool).await?;
    tracing::info!(user_id = %auth.user_id, purged, "Purged soft-deleted annotations");
    Ok(Json(DataResponse {
        data: json!({ "purged": purged }),
    }))
}
