//! Maintenance commands.
//!
//! Expired challenges are also purged whenever a new ceremony starts; this
//! is for quiet periods, e.g. from a cron job.

use chrono::Utc;
use hinata_storefront::db::{ChallengeRepository, PgChallengeRepository};

use super::{CommandError, database_url};

/// Delete passkey challenges past their expiry.
///
/// # Errors
///
/// Returns an error if the URL is missing or the database is unreachable.
pub async fn purge_challenges() -> Result<(), CommandError> {
    let url = database_url()?;
    let pool = hinata_storefront::db::create_pool(&url).await?;

    let removed = PgChallengeRepository::new(pool)
        .purge_expired(Utc::now())
        .await?;

    tracing::info!(removed, "Expired passkey challenges purged");
    Ok(())
}
