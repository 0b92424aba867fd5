use std::fs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use session_gate::{build_router, AppState, StartupError};
use tempfile::TempDir;
use tower::ServiceExt;

const WP_CONFIG: &str = r#"<?php
define( 'DB_NAME', 'wordpress' );
define( 'LOGGED_IN_KEY',  'K' );
define( 'LOGGED_IN_SALT', 'S' );
define( 'COOKIEHASH', '84d1a0b2c6e0' );
$table_prefix = 'wp_';
"#;

fn install_dir(config: &str) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("wp-config.php"), config).expect("write config");
    dir
}

fn router_for(config: &str) -> (Router, Arc<AppState>) {
    let dir = install_dir(config);
    let state = Arc::new(AppState::load(dir.path()).expect("state"));
    (build_router(state.clone()), state)
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}

fn signed_cookie(state: &AppState, user: &str, frag: &str, expiration: i64) -> String {
    let expiration = expiration.to_string();
    let hmac = state
        .validator
        .expected_digest(user, frag, &expiration, "tok123");
    format!("{user}%7C{expiration}%7Ctok123%7C{hmac}")
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.expect("response");
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("body").to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (parts.status, value)
}

async fn validate(router: Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/sessions/validate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

#[tokio::test]
async fn accepts_valid_cookie() {
    let (router, state) = router_for(WP_CONFIG);
    let cookie = signed_cookie(&state, "alice", "pwd1", now() + 3600);

    let (status, body) = validate(
        router,
        json!({ "cookie": cookie, "password_fragment": "pwd1" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "valid": true }));
}

#[tokio::test]
async fn rejects_wrong_password_fragment() {
    let (router, state) = router_for(WP_CONFIG);
    let cookie = signed_cookie(&state, "alice", "pwd1", now() + 3600);

    let (status, body) = validate(
        router,
        json!({ "cookie": cookie, "password_fragment": "pwd2" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn rejects_expired_cookie() {
    let (router, state) = router_for(WP_CONFIG);
    let cookie = signed_cookie(&state, "alice", "pwd1", now() - 5);

    let (_, body) = validate(
        router,
        json!({ "cookie": cookie, "password_fragment": "pwd1" }),
    )
    .await;

    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn malformed_cookie_is_invalid_not_an_error() {
    let (router, _) = router_for(WP_CONFIG);

    let (status, body) = validate(
        router,
        json!({ "cookie": "not-a-cookie", "password_fragment": "pwd1" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn bad_request_body_is_rejected() {
    let (router, _) = router_for(WP_CONFIG);

    let (status, body) = validate(router, json!({ "cookie": "alice|1|t|h" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn cookie_name_comes_from_cookiehash() {
    let (router, _) = router_for(WP_CONFIG);
    let request = Request::builder()
        .uri("/v1/sessions/cookie-name")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "wordpress_logged_in_84d1a0b2c6e0");
}

#[tokio::test]
async fn cookie_name_is_not_found_without_cookiehash() {
    let (router, _) = router_for("define('LOGGED_IN_KEY', 'K'); define('LOGGED_IN_SALT', 'S');");
    let request = Request::builder()
        .uri("/v1/sessions/cookie-name")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn health_route_reports_service() {
    let (router, _) = router_for(WP_CONFIG);
    let request = Request::builder()
        .uri("/v1/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "service": "session-gate" }));
}

#[test]
fn startup_fails_without_secrets() {
    let dir = install_dir("define('LOGGED_IN_KEY', 'K');");
    assert!(matches!(
        AppState::load(dir.path()),
        Err(StartupError::Config(_))
    ));

    let empty = TempDir::new().expect("tempdir");
    assert!(matches!(
        AppState::load(empty.path()),
        Err(StartupError::Config(_))
    ));
}
