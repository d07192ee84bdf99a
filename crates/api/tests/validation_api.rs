//! HTTP-level tests for document validation and create-time conflicts.
//!
//! All of these rejections happen during normalization or the semantic
//! create checks, before any persistence, so no live database is needed.

mod common;

use axum::http::StatusCode;
use common::{body_json, mint_token, post_json_auth, unreachable_pool};
use serde_json::json;

/// A well-formed legacy text annotation owned by `user_id`.
fn annojs_text(user_id: &str) -> serde_json::Value {
    json!({
        "media": "text",
        "uri": "http://lti/source-1",
        "text": "a remark",
        "user": { "id": user_id, "name": "Ada" },
        "permissions": {
            "read": [],
            "update": [user_id],
            "delete": [user_id],
            "admin": [user_id],
        },
        "ranges": [
            { "start": "/p[1]", "end": "/p[1]", "startOffset": 0, "endOffset": 4 },
        ],
    })
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// A document without the required `media` key returns 400.
#[tokio::test]
async fn missing_media_returns_400() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let mut doc = annojs_text("user-1");
    doc.as_object_mut().unwrap().remove("media");

    let response = post_json_auth(app, "/annos", doc, &token).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

/// An unknown media kind returns 400 with the unsupported-shape code.
#[tokio::test]
async fn unknown_media_returns_400() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let mut doc = annojs_text("user-1");
    doc["media"] = json!("hologram");

    let response = post_json_auth(app, "/annos", doc, &token).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNSUPPORTED_SHAPE");
}

/// A text annotation without ranges returns 400.
#[tokio::test]
async fn text_without_ranges_returns_400() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let mut doc = annojs_text("user-1");
    doc.as_object_mut().unwrap().remove("ranges");

    let response = post_json_auth(app, "/annos", doc, &token).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Forbidden content
// ---------------------------------------------------------------------------

/// A script tag in the body text returns 403 with the content code.
#[tokio::test]
async fn script_in_body_returns_403() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let mut doc = annojs_text("user-1");
    doc["text"] = json!("hello <script>alert(1)</script>");

    let response = post_json_auth(app, "/annos", doc, &token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["code"], "FORBIDDEN_CONTENT");
}

/// Ordinary markup in the body text is not rejected as forbidden content.
#[tokio::test]
async fn plain_markup_not_rejected_as_forbidden() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let mut doc = annojs_text("user-1");
    doc["text"] = json!("<p>some <em>styled</em> text</p>");

    let response = post_json_auth(app, "/annos", doc, &token).await;
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Create-time conflicts
// ---------------------------------------------------------------------------

/// The document creator must be the requesting user.
#[tokio::test]
async fn creator_mismatch_returns_409() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-2", None);

    let response = post_json_auth(app, "/annos", annojs_text("user-1"), &token).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "CONFLICT");
}

/// The creator must keep update rights on their own annotation.
#[tokio::test]
async fn creator_without_update_returns_409() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let mut doc = annojs_text("user-1");
    doc["permissions"]["update"] = json!(["someone-else"]);

    let response = post_json_auth(app, "/annos", doc, &token).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

/// Creating under a path id that disagrees with the document id returns 409.
#[tokio::test]
async fn path_and_document_id_mismatch_returns_409() {
    let app = common::build_test_app(unreachable_pool());
    let token = mint_token("user-1", None);

    let mut doc = annojs_text("user-1");
    doc["id"] = json!(42);

    let response = post_json_auth(app, "/annos/a-different-id", doc, &token).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert!(
        json["error"].as_str().unwrap_or("").contains("does not match"),
        "error should explain the id mismatch, got: {json}"
    );
}
