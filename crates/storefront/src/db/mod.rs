//! Database operations for storefront `PostgreSQL`.
//!
//! # Database: `hinata`
//!
//! Stores identity data only (the commerce backend owns customers, orders,
//! wallet and tier):
//!
//! ## Tables
//!
//! - `email_user` - Email/password members
//! - `line_profile` - LINE-linked members
//! - `verification_code` - One-time codes (register, reset, bind)
//! - `passkey_credential` - `WebAuthn` passkeys (soft-deleted)
//! - `passkey_challenge` - Pending single-use ceremony challenges
//!
//! Every table sits behind a repository trait with a `PostgreSQL`
//! implementation and an in-memory one ([`memory::MemoryStore`]).
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p hinata-cli -- migrate
//! ```

pub mod challenges;
pub mod email_users;
pub mod line_profiles;
pub mod memory;
pub mod passkeys;
pub mod verification_codes;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use challenges::{ChallengeRepository, PgChallengeRepository};
pub use email_users::{EmailUserRepository, PgEmailUserRepository};
pub use line_profiles::{LineProfileRepository, PgLineProfileRepository};
pub use memory::MemoryStore;
pub use passkeys::{PasskeyRepository, PgPasskeyRepository};
pub use verification_codes::{PgVerificationCodeRepository, VerificationCodeRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map a unique violation to `Conflict`, everything else to `Database`.
pub(crate) fn map_unique_violation(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}

/// All repositories, as shared trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub verification_codes: Arc<dyn VerificationCodeRepository>,
    pub email_users: Arc<dyn EmailUserRepository>,
    pub line_profiles: Arc<dyn LineProfileRepository>,
    pub passkeys: Arc<dyn PasskeyRepository>,
    pub challenges: Arc<dyn ChallengeRepository>,
}

impl Repositories {
    /// `PostgreSQL`-backed repositories sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            verification_codes: Arc::new(PgVerificationCodeRepository::new(pool.clone())),
            email_users: Arc::new(PgEmailUserRepository::new(pool.clone())),
            line_profiles: Arc::new(PgLineProfileRepository::new(pool.clone())),
            passkeys: Arc::new(PgPasskeyRepository::new(pool.clone())),
            challenges: Arc::new(PgChallengeRepository::new(pool.clone())),
        }
    }

    /// Repositories backed by a single in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_store(&Arc::new(MemoryStore::default()))
    }

    /// Repositories over an existing in-memory store, so tests can inspect it.
    #[must_use]
    pub fn from_store(store: &Arc<MemoryStore>) -> Self {
        Self {
            verification_codes: store.clone(),
            email_users: store.clone(),
            line_profiles: store.clone(),
            passkeys: store.clone(),
            challenges: store.clone(),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
