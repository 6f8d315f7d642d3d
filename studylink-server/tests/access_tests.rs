//! Static hosting, access gate and transport policy
//!
//! Tests cover:
//! - Public pages served without credentials
//! - /private pages and the monitor feed behind Basic authentication
//! - Gate closed when no credential is configured
//! - Health endpoint
//! - Plain-http redirect when force_https is set

mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use helpers::*;
use studylink_server::api::auth::CHALLENGE;

// =============================================================================
// Public area
// =============================================================================

#[tokio::test]
async fn test_public_index_served() {
    let app = TestApp::start().await;

    let response = app.request(get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<h1>participant</h1>");

    let response = app.request(get("/index.html")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_public_file_is_not_found() {
    let app = TestApp::start().await;

    let response = app.request(get("/nope.js")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::start().await;
    let (_id, _socket) = app.connect("Jane Doe").await;

    let response = app.request(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "studylink-server");
    assert_eq!(json["participants"], 1);
}

// =============================================================================
// Private area
// =============================================================================

#[tokio::test]
async fn test_private_page_requires_credentials() {
    let app = TestApp::start().await;

    let response = app.request(get("/private/server_index.html")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], CHALLENGE);
    assert_eq!(body_text(response).await, "Not authenticated");
}

#[tokio::test]
async fn test_private_page_rejects_wrong_credentials() {
    let app = TestApp::start().await;

    let response = app
        .request(get_with_basic("/private/server_index.html", LAB_USER, "wrong"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], CHALLENGE);

    let response = app
        .request(get_with_basic("/private/server_index.html", "someone", LAB_PASS))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_private_page_with_credentials() {
    let app = TestApp::start().await;

    let response = app
        .request(get_with_basic("/private/server_index.html", LAB_USER, LAB_PASS))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<h1>recorder</h1>");
}

#[tokio::test]
async fn test_private_files_not_reachable_from_public_root() {
    let app = TestApp::start().await;

    let response = app.request(get("/server_index.html")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_monitor_feed_is_gated() {
    let app = TestApp::start().await;

    let response = app.request(get("/private/events")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(get_with_basic("/private/events", LAB_USER, LAB_PASS))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_gate_closed_without_configured_credential() {
    let app = TestApp::start_with(|config| {
        config.auth.username = None;
        config.auth.password = None;
    })
    .await;

    let response = app
        .request(get_with_basic("/private/server_index.html", LAB_USER, LAB_PASS))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Public side unaffected
    let response = app.request(get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Transport policy
// =============================================================================

fn forwarded(uri: &str, proto: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::HOST, "study.example.org")
        .header("x-forwarded-proto", proto)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_plain_http_redirected_when_forced() {
    let app = TestApp::start_with(|config| config.force_https = true).await;

    let response = app.request(forwarded("/index.html?session=2", "http")).await;
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://study.example.org/index.html?session=2"
    );
}

#[tokio::test]
async fn test_https_passes_through_when_forced() {
    let app = TestApp::start_with(|config| config.force_https = true).await;

    let response = app.request(forwarded("/index.html", "https")).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Direct connections without a proxy header are served as-is
    let response = app.request(get("/index.html")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_no_redirect_unless_forced() {
    let app = TestApp::start().await;

    let response = app.request(forwarded("/index.html", "http")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let app = TestApp::start().await;

    let request = Request::builder()
        .method("POST")
        .uri("/qualtrics")
        .header(header::ORIGIN, "https://survey.example.com")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
