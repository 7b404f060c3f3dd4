//! Smoke tests against a running storefront.
//!
//! These tests require:
//! - A migrated `PostgreSQL` database (hinata migrate)
//! - The storefront running (cargo run -p hinata-storefront)
//!
//! Run with: cargo test -p hinata-integration-tests -- --ignored

#![allow(clippy::unwrap_used)]

use reqwest::{Client, StatusCode, redirect::Policy};
use serde_json::{Value, json};

/// Base URL for the storefront (configurable via environment).
fn base_url() -> String {
    std::env::var("STOREFRONT_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

fn client() -> Client {
    Client::builder()
        .cookie_store(true)
        .redirect(Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
#[ignore = "Requires running storefront"]
async fn test_live_health() {
    let base = base_url();
    let resp = client().get(format!("{base}/health/ready")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "Requires running storefront"]
async fn test_live_session_defaults_to_logged_out() {
    let base = base_url();
    let resp = client()
        .get(format!("{base}/api/auth/line/session"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["logged_in"], false);
}

#[tokio::test]
#[ignore = "Requires running storefront"]
async fn test_live_line_redirect() {
    let base = base_url();
    let resp = client()
        .get(format!("{base}/api/auth/line"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
}

#[tokio::test]
#[ignore = "Requires running storefront"]
async fn test_live_forgot_password_is_uniform() {
    let base = base_url();
    let resp = client()
        .post(format!("{base}/api/auth/email/forgot-password"))
        .json(&json!({"email": "smoke-test-unknown@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
}
