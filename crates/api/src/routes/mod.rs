//! Route table.

pub mod annotation;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// All API routes (mounted at the root, next to `/health`).
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/annos", annotation::router())
}
