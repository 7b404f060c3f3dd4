//! Database migration commands.
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//!
//! # Migration Files
//!
//! `crates/storefront/migrations/`, embedded at compile time.

use super::{CommandError, database_url};

/// Run storefront database migrations.
///
/// # Errors
///
/// Returns an error if the URL is missing, the database is unreachable, or
/// a migration fails.
pub async fn storefront() -> Result<(), CommandError> {
    let url = database_url()?;

    tracing::info!("Connecting to storefront database...");
    let pool = hinata_storefront::db::create_pool(&url).await?;

    tracing::info!("Running storefront migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    tracing::info!("Storefront migrations complete!");
    Ok(())
}
