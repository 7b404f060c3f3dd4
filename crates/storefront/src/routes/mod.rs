//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness
//! GET  /health/ready           - Readiness (database ping)
//!
//! # Email auth
//! POST /api/auth/email/register
//! POST /api/auth/email/verify
//! POST /api/auth/email/login
//! POST /api/auth/email/resend-otp
//! POST /api/auth/email/forgot-password
//! POST /api/auth/email/reset-password
//! POST /api/auth/email/bind
//! POST /api/auth/email/bind-verify
//!
//! # LINE Login
//! GET    /api/auth/line
//! GET    /api/auth/line/callback
//! GET    /api/auth/line/session
//! DELETE /api/auth/line/session
//!
//! # Passkeys
//! POST   /api/auth/passkey/register/options
//! POST   /api/auth/passkey/register/verify
//! POST   /api/auth/passkey/authenticate/options
//! POST   /api/auth/passkey/authenticate/verify
//! GET    /api/auth/passkey
//! DELETE /api/auth/passkey/{id}
//!
//! # Member (session required)
//! GET  /api/member/{profile,wallet,tier,orders,preferences}
//!
//! # Cache invalidation
//! POST /api/revalidate
//! ```

pub mod api;

use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{
    api_rate_limiter, auth_rate_limiter, request_id_middleware, security_headers_middleware,
};
use crate::state::AppState;

use api::{email_auth, line_auth, member, passkey, revalidate};

/// Create the email auth routes router.
pub fn email_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(email_auth::register))
        .route("/verify", post(email_auth::verify))
        .route("/login", post(email_auth::login))
        .route("/resend-otp", post(email_auth::resend_otp))
        .route("/forgot-password", post(email_auth::forgot_password))
        .route("/reset-password", post(email_auth::reset_password))
        .route("/bind", post(email_auth::bind))
        .route("/bind-verify", post(email_auth::bind_verify))
}

/// Create the LINE Login routes router.
pub fn line_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(line_auth::authorize))
        .route("/callback", get(line_auth::callback))
        .route(
            "/session",
            get(line_auth::session).delete(line_auth::logout),
        )
}

/// Create the passkey routes router.
pub fn passkey_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(passkey::list))
        .route("/{id}", delete(passkey::remove))
        .route("/register/options", post(passkey::register_options))
        .route("/register/verify", post(passkey::register_verify))
        .route("/authenticate/options", post(passkey::authenticate_options))
        .route("/authenticate/verify", post(passkey::authenticate_verify))
}

/// Create the member routes router.
pub fn member_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(member::profile))
        .route("/wallet", get(member::wallet))
        .route("/tier", get(member::tier))
        .route("/orders", get(member::orders))
        .route("/preferences", get(member::preferences))
}

/// All `/api` routes.
///
/// With `rate_limited`, auth routes get the strict per-IP limiter and the
/// rest the relaxed one. The limiters key on proxy headers, so in-process
/// tests build the router without them.
pub fn api_routes(rate_limited: bool) -> Router<AppState> {
    let auth = Router::new()
        .nest("/email", email_auth_routes())
        .nest("/line", line_auth_routes())
        .nest("/passkey", passkey_routes());
    let other = Router::new()
        .nest("/member", member_routes())
        .route("/revalidate", post(revalidate::revalidate));

    let (auth, other) = if rate_limited {
        (
            match auth_rate_limiter() {
                Some(limiter) => auth.layer(limiter),
                None => auth,
            },
            match api_rate_limiter() {
                Some(limiter) => other.layer(limiter),
                None => other,
            },
        )
    } else {
        (auth, other)
    };

    Router::new().nest("/auth", auth).merge(other)
}

/// CORS for the storefront frontend: its own origin, with cookies.
fn cors_layer(base_url: &str) -> Option<CorsLayer> {
    let origin = HeaderValue::from_str(base_url).ok()?;
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

/// The complete application router, state applied.
///
/// Sentry layers are added by the binary around this.
pub fn app(state: AppState, rate_limited: bool) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api", api_routes(rate_limited))
        .layer(middleware::from_fn(security_headers_middleware));

    if let Some(cors) = cors_layer(&state.config().base_url) {
        router = router.layer(cors);
    }

    router
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
/// Without a pool (in-memory repositories) there is nothing to check.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    let Some(pool) = state.pool() else {
        return StatusCode::OK;
    };
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
