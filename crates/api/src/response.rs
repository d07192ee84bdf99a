//! Shared response envelope types for API handlers.
//!
//! Annotation endpoints return the document shapes themselves; list and
//! batch endpoints use the envelopes here instead of ad-hoc
//! `serde_json::json!` blobs.

use serde::Serialize;
use serde_json::Value;

/// Standard `{ "data": T }` response envelope for non-document payloads.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Search result page: total match count plus the rendered page of
/// documents (already in the caller's requested dialect).
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// Total matches ignoring pagination.
    pub total: i64,
    /// Number of rows in this page.
    pub size: usize,
    pub limit: i64,
    pub offset: i64,
    pub rows: Vec<Value>,
}
