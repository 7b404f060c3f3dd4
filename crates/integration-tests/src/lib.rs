//! Integration tests for Hinata.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process tests (in-memory repositories and commerce backend)
//! cargo test -p hinata-integration-tests
//!
//! # Live smoke tests against a running storefront
//! STOREFRONT_BASE_URL=http://localhost:3000 cargo test -p hinata-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `email_auth` - Registration, verification, login, reset, bind
//! - `line_auth` - LINE redirect, callback failures, session status
//! - `member` - Member endpoints and revalidation
//! - `passkey` - Passkey endpoints that need no authenticator
//! - `live_storefront` - Ignored; needs a running server

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use hinata_storefront::commerce::InMemoryCommerce;
use hinata_storefront::config::{
    CommerceConfig, Environment, LineConfig, OtpConfig, StorefrontConfig,
};
use hinata_storefront::db::{MemoryStore, Repositories};
use hinata_storefront::routes;
use hinata_storefront::services::email::{EmailSender, MemoryOutbox};
use hinata_storefront::services::session::SESSION_COOKIE;
use hinata_storefront::state::{AppState, Backends};

/// Secret accepted by `POST /api/revalidate` in tests.
pub const REVALIDATE_SECRET: &str = "rv_9fQ2xL7mZ4kP1wT8sB3nY6cH0dJ5gA";

/// Storefront configuration for in-process tests.
#[must_use]
pub fn test_config(environment: Environment) -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://localhost/hinata_test"),
        host: std::net::IpAddr::from([127, 0, 0, 1]),
        port: 3000,
        base_url: "http://localhost:3000".to_owned(),
        environment,
        session_secret: SecretString::from("sS8#kL2@pQ9!vX4$mN7&wE1*zR6^tY3%"),
        revalidate_secret: SecretString::from(REVALIDATE_SECRET),
        otp: OtpConfig::default(),
        line: LineConfig {
            channel_id: "1650000000".to_owned(),
            channel_secret: SecretString::from("line_channel_secret_value"),
            authorize_url: "https://access.line.me/oauth2/v2.1/authorize".to_owned(),
            api_url: "https://api.line.me".to_owned(),
        },
        commerce: CommerceConfig {
            api_url: "http://commerce.internal".to_owned(),
            admin_email: "ops@hinata.shop".to_owned(),
            admin_password: SecretString::from("commerce_admin_password_value"),
        },
        email: None,
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// The full router over in-memory backends, plus handles to inspect them.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub commerce: Arc<InMemoryCommerce>,
    /// Set when built with [`TestApp::with_outbox`].
    pub outbox: Option<Arc<MemoryOutbox>>,
}

impl TestApp {
    /// Development environment without email delivery, so issued codes come
    /// back as `devCode`.
    #[must_use]
    pub fn new() -> Self {
        Self::build(Environment::Development, None)
    }

    /// Production environment with codes captured in a [`MemoryOutbox`].
    #[must_use]
    pub fn with_outbox() -> Self {
        Self::build(Environment::Production, Some(Arc::new(MemoryOutbox::new())))
    }

    #[allow(clippy::expect_used)]
    fn build(environment: Environment, outbox: Option<Arc<MemoryOutbox>>) -> Self {
        let store = Arc::new(MemoryStore::default());
        let commerce = Arc::new(InMemoryCommerce::new());
        let state = AppState::new(
            test_config(environment),
            Backends {
                pool: None,
                repos: Repositories::from_store(&store),
                commerce: commerce.clone(),
                mailer: outbox.clone().map(|o| o as Arc<dyn EmailSender>),
            },
        )
        .expect("test state should build");

        Self {
            router: routes::app(state, false),
            store,
            commerce,
            outbox,
        }
    }

    /// Send a request through the router.
    #[allow(clippy::expect_used)]
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// `GET path` with an optional cookie header.
    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Response<Body> {
        self.send(request("GET", path, cookie, None)).await
    }

    /// `POST path` with a JSON body and an optional cookie header.
    pub async fn post_json(&self, path: &str, body: &Value, cookie: Option<&str>) -> Response<Body> {
        self.send(request("POST", path, cookie, Some(body))).await
    }

    /// Register and verify an email user; returns the session cookie.
    #[allow(clippy::expect_used)]
    pub async fn signed_in_email_user(&self, email: &str, password: &str) -> String {
        let res = self
            .post_json(
                "/api/auth/email/register",
                &serde_json::json!({"email": email, "password": password, "name": "Test Member"}),
                None,
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let code = body["devCode"].as_str().expect("devCode in development");

        let res = self
            .post_json(
                "/api/auth/email/verify",
                &serde_json::json!({"email": email, "code": code}),
                None,
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        session_cookie(&res).expect("verify should set the session cookie")
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a request, JSON body optional.
#[allow(clippy::expect_used)]
#[must_use]
pub fn request(method: &str, path: &str, cookie: Option<&str>, body: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("valid request")
}

/// Parse a response body as JSON.
#[allow(clippy::expect_used)]
pub async fn json_body(res: Response<Body>) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// `name=value` of a cookie set by the response, for a `Cookie` header.
#[must_use]
pub fn set_cookie(res: &Response<Body>, name: &str) -> Option<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| {
            pair.split_once('=')
                .is_some_and(|(n, value)| n == name && !value.is_empty())
        })
        .map(str::to_owned)
}

/// The session cookie set by the response.
#[must_use]
pub fn session_cookie(res: &Response<Body>) -> Option<String> {
    set_cookie(res, SESSION_COOKIE)
}

/// The `Location` header of a redirect.
#[must_use]
pub fn location(res: &Response<Body>) -> Option<&str> {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}
