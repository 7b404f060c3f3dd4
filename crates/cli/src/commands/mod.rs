//! CLI subcommands.

pub mod maintenance;
pub mod migrate;

use secrecy::SecretString;
use thiserror::Error;

/// Errors from CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] hinata_storefront::db::RepositoryError),
}

/// Storefront database URL, `STOREFRONT_DATABASE_URL` then `DATABASE_URL`.
pub(crate) fn database_url() -> Result<SecretString, CommandError> {
    let _ = dotenvy::dotenv();

    std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("STOREFRONT_DATABASE_URL"))
}
