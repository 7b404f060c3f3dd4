//! Email registration, login and password reset through the full router.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;

use hinata_core::CodePurpose;
use hinata_integration_tests::{TestApp, json_body, session_cookie};

const PASSWORD: &str = "correct-horse-42";

#[tokio::test]
async fn test_register_verify_sets_session() {
    let app = TestApp::new();

    let res = app
        .post_json(
            "/api/auth/email/register",
            &json!({"email": "Hana@Example.com", "password": PASSWORD, "name": "Hana"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["email"], "hana@example.com");
    let code = body["devCode"].as_str().unwrap().to_owned();
    assert_eq!(code.len(), 6);

    let res = app
        .post_json(
            "/api/auth/email/verify",
            &json!({"email": "hana@example.com", "code": code}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = session_cookie(&res).unwrap();
    let body = json_body(res).await;
    assert_eq!(body["user"]["email"], "hana@example.com");
    assert!(body["user"]["customer_id"].is_string());
    assert_eq!(app.commerce.customer_count().await, 1);

    let res = app.get("/api/auth/line/session", Some(&cookie)).await;
    let body = json_body(res).await;
    assert_eq!(body["logged_in"], true);
    assert_eq!(body["session"]["auth_method"], "email");
    assert_eq!(body["session"]["email"], "hana@example.com");
}

#[tokio::test]
async fn test_register_missing_field_is_json_bad_request() {
    let app = TestApp::new();

    let res = app
        .post_json(
            "/api/auth/email/register",
            &json!({"email": "kai@example.com", "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        res.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("name"));
    assert_eq!(app.store.email_user_count().await, 0);
}

#[tokio::test]
async fn test_wrongly_typed_field_is_json_bad_request() {
    let app = TestApp::new();

    let res = app
        .post_json(
            "/api/auth/email/login",
            &json!({"email": "kai@example.com", "password": 42}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_register_again_inside_cooldown_is_rate_limited() {
    let app = TestApp::new();
    let form = json!({"email": "ren@example.com", "password": PASSWORD, "name": "Ren"});

    let res = app.post_json("/api/auth/email/register", &form, None).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.post_json("/api/auth/email/register", &form, None).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_register_verified_email_conflicts() {
    let app = TestApp::new();
    app.signed_in_email_user("sora@example.com", PASSWORD).await;

    let res = app
        .post_json(
            "/api/auth/email/register",
            &json!({"email": "sora@example.com", "password": PASSWORD, "name": "Sora"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_register_rejects_weak_password() {
    let app = TestApp::new();
    let res = app
        .post_json(
            "/api/auth/email/register",
            &json!({"email": "yui@example.com", "password": "short", "name": "Yui"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_code_reports_remaining_attempts() {
    let app = TestApp::new();
    let res = app
        .post_json(
            "/api/auth/email/register",
            &json!({"email": "kai@example.com", "password": PASSWORD, "name": "Kai"}),
            None,
        )
        .await;
    let code = json_body(res).await["devCode"].as_str().unwrap().to_owned();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let res = app
        .post_json(
            "/api/auth/email/verify",
            &json!({"email": "kai@example.com", "code": wrong}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(session_cookie(&res).is_none());
    let body = json_body(res).await;
    assert_eq!(body["remainingAttempts"], 4);

    // The right code still works afterwards.
    let res = app
        .post_json(
            "/api/auth/email/verify",
            &json!({"email": "kai@example.com", "code": code}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_verify_without_code_is_not_found() {
    let app = TestApp::new();
    let res = app
        .post_json(
            "/api/auth/email/verify",
            &json!({"email": "nobody@example.com", "code": "123456"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_login_before_verification_needs_verification() {
    let app = TestApp::new();
    app.post_json(
        "/api/auth/email/register",
        &json!({"email": "mio@example.com", "password": PASSWORD, "name": "Mio"}),
        None,
    )
    .await;

    let res = app
        .post_json(
            "/api/auth/email/login",
            &json!({"email": "mio@example.com", "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body = json_body(res).await;
    assert_eq!(body["needsVerification"], true);
}

#[tokio::test]
async fn test_login_after_verification() {
    let app = TestApp::new();
    app.signed_in_email_user("aoi@example.com", PASSWORD).await;

    let res = app
        .post_json(
            "/api/auth/email/login",
            &json!({"email": "aoi@example.com", "password": "wrong-password-1"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cookie(&res).is_none());

    let res = app
        .post_json(
            "/api/auth/email/login",
            &json!({"email": "aoi@example.com", "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(session_cookie(&res).is_some());
    // Linked at verification; login reuses the customer.
    assert_eq!(app.commerce.customer_count().await, 1);
}

#[tokio::test]
async fn test_forgot_password_answers_the_same_for_unknown_email() {
    let app = TestApp::with_outbox();
    let outbox = app.outbox.clone().unwrap();

    let known = app
        .post_json(
            "/api/auth/email/register",
            &json!({"email": "rin@example.com", "password": PASSWORD, "name": "Rin"}),
            None,
        )
        .await;
    assert_eq!(known.status(), StatusCode::OK);
    // Production never returns the code.
    assert!(json_body(known).await.get("devCode").is_none());

    let res = app
        .post_json("/api/auth/email/forgot-password", &json!({"email": "rin@example.com"}), None)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let known_body = json_body(res).await;

    let res = app
        .post_json(
            "/api/auth/email/forgot-password",
            &json!({"email": "ghost@example.com"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await, known_body);

    assert!(
        outbox
            .last_code("rin@example.com", CodePurpose::ResetPassword)
            .await
            .is_some()
    );
    assert!(
        outbox
            .last_code("ghost@example.com", CodePurpose::ResetPassword)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_reset_password_then_login() {
    let app = TestApp::with_outbox();
    let outbox = app.outbox.clone().unwrap();

    app.post_json(
        "/api/auth/email/register",
        &json!({"email": "taro@example.com", "password": PASSWORD, "name": "Taro"}),
        None,
    )
    .await;
    let code = outbox
        .last_code("taro@example.com", CodePurpose::Register)
        .await
        .unwrap();
    let res = app
        .post_json(
            "/api/auth/email/verify",
            &json!({"email": "taro@example.com", "code": code}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    app.post_json("/api/auth/email/forgot-password", &json!({"email": "taro@example.com"}), None)
        .await;
    let reset_code = outbox
        .last_code("taro@example.com", CodePurpose::ResetPassword)
        .await
        .unwrap();

    let new_password = "brand-new-pass-7";
    let res = app
        .post_json(
            "/api/auth/email/reset-password",
            &json!({"email": "taro@example.com", "code": reset_code, "newPassword": new_password}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .post_json(
            "/api/auth/email/login",
            &json!({"email": "taro@example.com", "password": PASSWORD}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .post_json(
            "/api/auth/email/login",
            &json!({"email": "taro@example.com", "password": new_password}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_resend_rejects_unknown_purpose() {
    let app = TestApp::new();
    let res = app
        .post_json(
            "/api/auth/email/resend-otp",
            &json!({"email": "a@example.com", "purpose": "newsletter"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resend_for_unknown_email_issues_nothing() {
    let app = TestApp::new();
    let res = app
        .post_json(
            "/api/auth/email/resend-otp",
            &json!({"email": "nobody@example.com", "purpose": "register"}),
            None,
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["success"], true);
    assert!(body.get("devCode").is_none());
}

#[tokio::test]
async fn test_bind_requires_line_session() {
    let app = TestApp::new();

    let res = app
        .post_json("/api/auth/email/bind", &json!({"email": "x@example.com"}), None)
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let cookie = app.signed_in_email_user("emi@example.com", PASSWORD).await;
    let res = app
        .post_json(
            "/api/auth/email/bind",
            &json!({"email": "emi@example.com"}),
            Some(&cookie),
        )
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}
