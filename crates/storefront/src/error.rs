//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Every error renders as `{"success": false, "error": "..."}`. A code
//! mismatch adds `remainingAttempts`; a login with an unverified email adds
//! `needsVerification: true`.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::commerce::CommerceError;
use crate::db::RepositoryError;
use crate::line::LineError;
use crate::services::auth::AuthError;
use crate::services::member::MemberError;
use crate::services::passkey::PasskeyError;
use crate::services::verification::VerificationError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Email/LINE auth flow failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Code issuance or verification failed outside an auth flow.
    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    /// Passkey ceremony failed.
    #[error("Passkey error: {0}")]
    Passkey(#[from] PasskeyError),

    /// Member view failed.
    #[error("Member error: {0}")]
    Member(#[from] MemberError),

    /// Commerce backend failed.
    #[error("Commerce error: {0}")]
    Commerce(#[from] CommerceError),

    /// LINE API failed.
    #[error("LINE error: {0}")]
    Line(#[from] LineError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_attempts: Option<i32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    needs_verification: bool,
}

/// Status, client message and extras for one error.
struct Rendered {
    status: StatusCode,
    message: String,
    remaining_attempts: Option<i32>,
    needs_verification: bool,
    retry_after: Option<u64>,
}

impl Rendered {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            remaining_attempts: None,
            needs_verification: false,
            retry_after: None,
        }
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    fn upstream() -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "External service error")
    }
}

fn render_verification(err: &VerificationError) -> Rendered {
    match err {
        VerificationError::NotFound => Rendered::new(
            StatusCode::NOT_FOUND,
            "Verification code not found. Please request a new code",
        ),
        VerificationError::Expired => Rendered::new(
            StatusCode::BAD_REQUEST,
            "Verification code expired. Please request a new code",
        ),
        VerificationError::AttemptsExhausted => Rendered::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many failed attempts. Please request a new code",
        ),
        VerificationError::CodeMismatch { remaining } => Rendered {
            remaining_attempts: Some(*remaining),
            ..Rendered::new(StatusCode::BAD_REQUEST, "Invalid verification code")
        },
        VerificationError::RateLimited { retry_after_secs } => Rendered {
            retry_after: Some(*retry_after_secs),
            ..Rendered::new(
                StatusCode::TOO_MANY_REQUESTS,
                format!("Please wait {retry_after_secs} seconds before requesting a new code"),
            )
        },
        VerificationError::Repository(_) => Rendered::internal(),
    }
}

fn render_commerce(err: &CommerceError) -> Rendered {
    match err {
        CommerceError::NotFound(_) => Rendered::new(StatusCode::NOT_FOUND, "Not found"),
        CommerceError::RateLimited(secs) => Rendered {
            retry_after: Some(*secs),
            ..Rendered::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
        },
        _ => Rendered::upstream(),
    }
}

fn render_auth(err: &AuthError) -> Rendered {
    match err {
        AuthError::InvalidEmail(_) => Rendered::new(StatusCode::BAD_REQUEST, "Invalid email address"),
        AuthError::Validation(msg) => Rendered::new(StatusCode::BAD_REQUEST, msg.clone()),
        AuthError::InvalidPurpose(_) => {
            Rendered::new(StatusCode::BAD_REQUEST, "Unknown verification purpose")
        }
        AuthError::InvalidCredentials => {
            Rendered::new(StatusCode::UNAUTHORIZED, "Invalid email or password")
        }
        AuthError::NeedsVerification => Rendered {
            needs_verification: true,
            ..Rendered::new(StatusCode::FORBIDDEN, "Please verify your email first")
        },
        AuthError::AlreadyRegistered => Rendered::new(
            StatusCode::CONFLICT,
            "An account with this email already exists",
        ),
        AuthError::EmailAlreadyBound => Rendered::new(
            StatusCode::CONFLICT,
            "This email is already linked to another account",
        ),
        AuthError::UserNotFound => Rendered::new(StatusCode::NOT_FOUND, "Account not found"),
        AuthError::SessionRequired => Rendered::new(StatusCode::UNAUTHORIZED, "Please sign in"),
        AuthError::LineSessionRequired => {
            Rendered::new(StatusCode::FORBIDDEN, "Please sign in with LINE first")
        }
        AuthError::Verification(v) => render_verification(v),
        AuthError::Commerce(c) => render_commerce(c),
        AuthError::Repository(_) | AuthError::PasswordHash => Rendered::internal(),
    }
}

fn render_passkey(err: &PasskeyError) -> Rendered {
    match err {
        PasskeyError::InvalidEmail(_) => {
            Rendered::new(StatusCode::BAD_REQUEST, "Invalid email address")
        }
        PasskeyError::ChallengeNotFound => {
            Rendered::new(StatusCode::BAD_REQUEST, "Passkey challenge expired, please try again")
        }
        PasskeyError::NoCredentials => Rendered::new(
            StatusCode::NOT_FOUND,
            "No passkeys registered for this account",
        ),
        PasskeyError::CredentialNotFound
        | PasskeyError::CounterRejected
        | PasskeyError::OwnerNotFound
        | PasskeyError::WebAuthn(_) => {
            Rendered::new(StatusCode::UNAUTHORIZED, "Passkey verification failed")
        }
        PasskeyError::InvalidState(_) | PasskeyError::Repository(_) => Rendered::internal(),
    }
}

impl AppError {
    fn render(&self) -> Rendered {
        match self {
            Self::Database(_) | Self::Internal(_) => Rendered::internal(),
            Self::Auth(err) => render_auth(err),
            Self::Verification(err) => render_verification(err),
            Self::Passkey(err) => render_passkey(err),
            Self::Member(MemberError::NotLinked) => Rendered::new(
                StatusCode::FORBIDDEN,
                "Your account is not linked to a member record yet",
            ),
            Self::Member(MemberError::Commerce(err)) | Self::Commerce(err) => render_commerce(err),
            Self::Member(MemberError::Repository(_)) => Rendered::internal(),
            Self::Line(_) => Rendered::upstream(),
            Self::NotFound(msg) => Rendered::new(StatusCode::NOT_FOUND, msg.clone()),
            Self::Unauthorized(msg) => Rendered::new(StatusCode::UNAUTHORIZED, msg.clone()),
            Self::Forbidden(msg) => Rendered::new(StatusCode::FORBIDDEN, msg.clone()),
            Self::BadRequest(msg) => Rendered::new(StatusCode::BAD_REQUEST, msg.clone()),
            Self::RateLimited => Rendered::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let rendered = self.render();

        // Capture server errors to Sentry
        if rendered.status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = %rendered.status, "Request rejected");
        }

        let body = ErrorBody {
            success: false,
            error: rendered.message,
            remaining_attempts: rendered.remaining_attempts,
            needs_verification: rendered.needs_verification,
        };

        let mut response = (rendered.status, Json(body)).into_response();
        if let Some(secs) = rendered.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("passkey-123".to_string());
        assert_eq!(err.to_string(), "Not found: passkey-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_verification_statuses() {
        let status = |e: VerificationError| get_status(AppError::from(AuthError::from(e)));
        assert_eq!(status(VerificationError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(VerificationError::Expired), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(VerificationError::AttemptsExhausted),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(VerificationError::CodeMismatch { remaining: 2 }),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_conflicts_and_upstream() {
        assert_eq!(
            get_status(AuthError::AlreadyRegistered.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AuthError::EmailAlreadyBound.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(MemberError::NotLinked.into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(CommerceError::InvalidResponse("x".to_owned()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            get_status(PasskeyError::ChallengeNotFound.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(PasskeyError::CounterRejected.into()),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_mismatch_body_carries_remaining_attempts() {
        let response =
            AppError::from(VerificationError::CodeMismatch { remaining: 0 }).into_response();
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["remainingAttempts"], 0);
        assert!(body.get("needsVerification").is_none());
    }

    #[tokio::test]
    async fn test_unverified_login_body() {
        let response = AppError::from(AuthError::NeedsVerification).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["needsVerification"], true);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_internal_details_not_leaked() {
        let response = AppError::Internal("connection refused at 10.0.0.3".to_owned()).into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response =
            AppError::from(VerificationError::RateLimited { retry_after_secs: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
