//! HTTP-level tests for bearer-token authentication on annotation routes.
//!
//! Every `/annos` route requires a signed token; these tests cover the
//! rejection paths, which never reach the database.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, get_auth, mint_token, post_json, unreachable_pool};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

// ---------------------------------------------------------------------------
// Missing / malformed credentials
// ---------------------------------------------------------------------------

/// A request without an Authorization header returns 401.
#[tokio::test]
async fn missing_authorization_header_returns_401() {
    let app = common::build_test_app(unreachable_pool());
    let response = get(app, "/annos/some-id").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
}

/// An Authorization header without the `Bearer ` prefix returns 401.
#[tokio::test]
async fn non_bearer_authorization_returns_401() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/annos/some-id")
        .header("authorization", token)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// A garbage token returns 401.
#[tokio::test]
async fn invalid_token_returns_401() {
    let app = common::build_test_app(unreachable_pool());
    let response = get_auth(app, "/annos/some-id", "not-a-real-token").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// A structurally valid token signed with the wrong secret returns 401.
#[tokio::test]
async fn wrong_secret_token_returns_401() {
    let app = common::build_test_app(unreachable_pool());

    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "sub": "user-1",
        "consumer": "test-consumer",
        "exp": now + 3600,
        "iat": now,
        "jti": "not-a-uuid-but-nobody-checks",
    });
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"a-different-secret"),
    )
    .unwrap();

    let response = get_auth(app, "/annos/some-id", &token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// An expired token returns 401.
#[tokio::test]
async fn expired_token_returns_401() {
    let app = common::build_test_app(unreachable_pool());

    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "sub": "user-1",
        "consumer": "test-consumer",
        "exp": now - 3600,
        "iat": now - 7200,
        "jti": "expired",
    });
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(common::TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap();

    let response = get_auth(app, "/annos/some-id", &token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Unauthenticated create attempts are rejected before the body is read.
#[tokio::test]
async fn create_without_token_returns_401() {
    let app = common::build_test_app(unreachable_pool());
    let response = post_json(app, "/annos", json!({"media": "text"})).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Admin-only transfer routes
// ---------------------------------------------------------------------------

/// A scoped (non-admin) token may not export.
#[tokio::test]
async fn export_requires_admin_returns_403() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", Some(vec!["CAN_READ".into()]));

    let response = get_auth(app, "/annos/export", &token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// A scoped token may not import.
#[tokio::test]
async fn import_requires_admin_returns_403() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", Some(vec!["CAN_READ".into(), "CAN_UPDATE".into()]));

    let response = common::post_json_auth(app, "/annos/import", json!([]), &token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// A CAN_ADMIN override passes the admin gate (and then fails on the
/// unreachable store rather than on permissions).
#[tokio::test]
async fn admin_override_passes_admin_gate() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", Some(vec!["CAN_ADMIN".into()]));

    let response = get_auth(app, "/annos/export", &token).await;
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
}
