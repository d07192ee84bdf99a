use std::sync::Arc;

use catchpy_core::validate::Validator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: catchpy_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Compiled schema/context/forbidden-content validator, built once at
    /// startup and shared by reference.
    pub validator: Arc<Validator>,
}
