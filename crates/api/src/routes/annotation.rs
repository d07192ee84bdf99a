//! Route definitions for the annotation store.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{annotation, transfer};
use crate::state::AppState;

/// Annotation routes, mounted under `/annos`.
///
/// ```text
/// GET    /            search_annotations (?context_id, ?userid, ?media, ...)
/// POST   /            create_annotation (server-assigned id)
/// GET    /export      export_annotations
/// POST   /import      import_annotations
/// POST   /copy        copy_annotations
/// DELETE /deleted     purge_deleted_annotations
/// GET    /{id}        get_annotation (?format=catcha|annotatorjs)
/// POST   /{id}        create_annotation_with_id
/// PUT    /{id}        update_annotation
/// DELETE /{id}        delete_annotation
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(annotation::search_annotations).post(annotation::create_annotation),
        )
        .route("/export", get(transfer::export_annotations))
        .route("/import", post(transfer::import_annotations))
        .route("/copy", post(transfer::copy_annotations))
        .route("/deleted", delete(transfer::purge_deleted_annotations))
        .route(
            "/{id}",
            get(annotation::get_annotation)
                .post(annotation::create_annotation_with_id)
                .put(annotation::update_annotation)
                .delete(annotation::delete_annotation),
        )
}
