//! Authentication error types.

use thiserror::Error;

use hinata_core::ParseCodePurposeError;

use crate::commerce::CommerceError;
use crate::db::RepositoryError;
use crate::services::verification::VerificationError;

/// Errors that can occur during the email, LINE and passkey auth flows.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] hinata_core::EmailError),

    /// Malformed or missing input other than the email.
    #[error("{0}")]
    Validation(String),

    /// Unknown verification purpose.
    #[error(transparent)]
    InvalidPurpose(#[from] ParseCodePurposeError),

    /// Invalid credentials (wrong password or user not found).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Correct password, but the email was never verified.
    #[error("email not verified")]
    NeedsVerification,

    /// Email is registered and verified already.
    #[error("email already registered")]
    AlreadyRegistered,

    /// Email is bound to a different LINE profile.
    #[error("email already linked to another account")]
    EmailAlreadyBound,

    /// Identity record referenced by the request does not exist.
    #[error("user not found")]
    UserNotFound,

    /// Operation needs a signed-in session.
    #[error("sign-in required")]
    SessionRequired,

    /// Operation needs a session established with LINE.
    #[error("LINE sign-in required")]
    LineSessionRequired,

    /// Code issuance or verification failed.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Commerce backend failed.
    #[error("commerce backend error: {0}")]
    Commerce(#[from] CommerceError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,
}
