//! Commerce admin authentication and token cache.
//!
//! Admin calls need a bearer token obtained with the admin email and
//! password. The token is cached per process and re-fetched when it is
//! missing, close to expiry, or rejected. Losing the cache only costs one
//! extra login.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::instrument;

use super::CommerceError;

/// Seconds before expiry at which a token counts as stale.
const REFRESH_MARGIN_SECONDS: i64 = 60;

/// Lifetime assumed when the backend does not say.
const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

/// Bearer token for the commerce admin API.
#[derive(Debug, Clone)]
pub struct AdminToken {
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl AdminToken {
    /// Whether the token should be replaced before use at `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(REFRESH_MARGIN_SECONDS)
    }
}

/// Single-entry, time-boxed token cache.
///
/// Concurrent refreshes are not coordinated: two requests that both find a
/// stale token both log in, and the later write wins. Either token works.
#[derive(Debug, Default)]
pub struct AdminTokenCache {
    token: RwLock<Option<AdminToken>>,
}

impl AdminTokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token if it is still fresh at `now`.
    pub async fn fresh_at(&self, now: DateTime<Utc>) -> Option<SecretString> {
        self.token
            .read()
            .await
            .as_ref()
            .filter(|token| !token.is_stale_at(now))
            .map(|token| token.access_token.clone())
    }

    /// Return a fresh token, calling `refresh` when there is none.
    ///
    /// # Errors
    ///
    /// Returns whatever `refresh` returns on failure. The cache is left as
    /// it was.
    pub async fn get_or_refresh<F, Fut, E>(
        &self,
        now: DateTime<Utc>,
        refresh: F,
    ) -> Result<SecretString, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AdminToken, E>>,
    {
        if let Some(token) = self.fresh_at(now).await {
            return Ok(token);
        }

        let token = refresh().await?;
        let access_token = token.access_token.clone();
        *self.token.write().await = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token (e.g. after a 401).
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    /// Token lifetime in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct AuthErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Log in to the commerce admin API.
///
/// # Errors
///
/// Returns `CommerceError::AuthenticationFailed` if the credentials are
/// rejected, `CommerceError::Http` on network failure.
#[instrument(skip(client, password), fields(email = %email))]
pub async fn authenticate(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &SecretString,
) -> Result<AdminToken, CommerceError> {
    let now = Utc::now();

    let response = client
        .post(format!("{base_url}/admin/auth"))
        .json(&AuthRequest {
            email,
            password: password.expose_secret(),
        })
        .send()
        .await?;

    let status = response.status();

    if status.is_success() {
        let auth: AuthResponse = response.json().await?;
        let expires_at = token_expiry(now, auth.expires_in);
        tracing::info!(%expires_at, "commerce admin token obtained");

        Ok(AdminToken {
            access_token: SecretString::from(auth.token),
            expires_at,
        })
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        let error_response: AuthErrorResponse =
            response.json().await.unwrap_or(AuthErrorResponse {
                error: None,
                message: None,
            });

        let message = error_response
            .message
            .or(error_response.error)
            .unwrap_or_else(|| "Invalid credentials".to_string());

        Err(CommerceError::AuthenticationFailed(message))
    } else {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(CommerceError::AuthenticationFailed(format!(
            "HTTP {status}: {error_text}"
        )))
    }
}

/// Expiry for a token issued at `now` with the backend's `expires_in`.
///
/// A missing, non-positive or unrepresentable lifetime falls back to the
/// default.
fn token_expiry(now: DateTime<Utc>, expires_in: Option<i64>) -> DateTime<Utc> {
    let expiry = |seconds: i64| {
        Duration::try_seconds(seconds).and_then(|lifetime| now.checked_add_signed(lifetime))
    };
    expires_in
        .filter(|seconds| *seconds > 0)
        .and_then(expiry)
        .or_else(|| expiry(DEFAULT_TOKEN_LIFETIME_SECONDS))
        .unwrap_or(now)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn token(value: &str, expires_at: DateTime<Utc>) -> AdminToken {
        AdminToken {
            access_token: SecretString::from(value.to_owned()),
            expires_at,
        }
    }

    #[test]
    fn test_token_expiry_from_backend_lifetime() {
        let now = Utc::now();
        assert_eq!(token_expiry(now, Some(7200)), now + Duration::hours(2));
        assert_eq!(token_expiry(now, None), now + Duration::hours(1));
    }

    #[test]
    fn test_token_expiry_out_of_range_lifetime_uses_default() {
        let now = Utc::now();
        let default = now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECONDS);
        assert_eq!(token_expiry(now, Some(i64::MAX)), default);
        assert_eq!(token_expiry(now, Some(i64::MAX / 1000)), default);
        assert_eq!(token_expiry(now, Some(0)), default);
        assert_eq!(token_expiry(now, Some(-30)), default);
    }

    #[test]
    fn test_token_stale_within_margin() {
        let now = Utc::now();
        assert!(token("t", now - Duration::hours(1)).is_stale_at(now));
        assert!(token("t", now + Duration::seconds(30)).is_stale_at(now));
        assert!(!token("t", now + Duration::hours(1)).is_stale_at(now));
    }

    #[tokio::test]
    async fn test_cache_reuses_fresh_token() {
        let cache = AdminTokenCache::new();
        let calls = AtomicUsize::new(0);
        let now = Utc::now();

        for _ in 0..3 {
            let value = cache
                .get_or_refresh(now, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CommerceError>(token("first", now + Duration::hours(1)))
                })
                .await
                .unwrap();
            assert_eq!(value.expose_secret(), "first");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_refreshes_near_expiry() {
        let cache = AdminTokenCache::new();
        let now = Utc::now();

        cache
            .get_or_refresh(now, || async {
                Ok::<_, CommerceError>(token("old", now + Duration::minutes(5)))
            })
            .await
            .unwrap();

        let later = now + Duration::minutes(4) + Duration::seconds(30);
        let value = cache
            .get_or_refresh(later, || async {
                Ok::<_, CommerceError>(token("new", later + Duration::hours(1)))
            })
            .await
            .unwrap();
        assert_eq!(value.expose_secret(), "new");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh_and_failure_keeps_cache_empty() {
        let cache = AdminTokenCache::new();
        let now = Utc::now();

        cache
            .get_or_refresh(now, || async {
                Ok::<_, CommerceError>(token("t1", now + Duration::hours(1)))
            })
            .await
            .unwrap();
        cache.invalidate().await;
        assert!(cache.fresh_at(now).await.is_none());

        let failed = cache
            .get_or_refresh(now, || async {
                Err::<AdminToken, _>(CommerceError::AuthenticationFailed("nope".to_owned()))
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.fresh_at(now).await.is_none());
    }
}
