//! LINE Login client.
//!
//! Handles the server side of the LINE Login OAuth flow:
//! - Authorization URL with CSRF `state`
//! - Code exchange for an access token and ID token
//! - Profile fetch (user ID, display name, picture)
//! - ID token verification, which is where LINE exposes the email claim

pub mod types;

pub use types::{LineIdentity, LineProfileInfo, LineTokens};

use std::sync::Arc;

use rand::{Rng, distr::Alphanumeric};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::instrument;

use crate::config::LineConfig;
use types::{IdTokenClaims, TokenResponse};

/// OAuth scopes requested from LINE.
const SCOPE: &str = "profile openid email";

/// Length of the CSRF state value.
pub const STATE_LENGTH: usize = 32;

/// Errors from the LINE platform.
#[derive(Debug, Error)]
pub enum LineError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// LINE rejected the OAuth exchange or token.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// LINE API returned an error status.
    #[error("LINE API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Generate a random alphanumeric string (OAuth state, nonce).
#[must_use]
pub fn generate_random_string(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// LINE Login API client.
#[derive(Clone)]
pub struct LineClient {
    inner: Arc<LineClientInner>,
}

struct LineClientInner {
    client: reqwest::Client,
    channel_id: String,
    channel_secret: SecretString,
    authorize_url: String,
    api_url: String,
}

impl LineClient {
    /// Create a new LINE Login client.
    ///
    /// # Errors
    ///
    /// Returns `LineError::Http` if the HTTP client cannot be built.
    pub fn new(config: &LineConfig) -> Result<Self, LineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        Ok(Self {
            inner: Arc::new(LineClientInner {
                client,
                channel_id: config.channel_id.clone(),
                channel_secret: config.channel_secret.clone(),
                authorize_url: config.authorize_url.clone(),
                api_url: config.api_url.trim_end_matches('/').to_owned(),
            }),
        })
    }

    /// Build the authorization URL to redirect the user to.
    #[must_use]
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}&scope={}",
            self.inner.authorize_url,
            urlencoding::encode(&self.inner.channel_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(SCOPE),
        )
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns `LineError::OAuth` if LINE rejects the code.
    #[instrument(skip(self, code))]
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<LineTokens, LineError> {
        let url = format!("{}/oauth2/v2.1/token", self.inner.api_url);
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.inner.channel_id.as_str()),
            ("client_secret", self.inner.channel_secret.expose_secret()),
        ];

        let response = self.inner.client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LineError::OAuth(format!("Token exchange failed: {text}")));
        }

        let token: TokenResponse = response.json().await?;
        Ok(LineTokens {
            access_token: SecretString::from(token.access_token),
            id_token: token.id_token,
        })
    }

    /// Fetch the profile of the user an access token belongs to.
    ///
    /// # Errors
    ///
    /// Returns `LineError::Api` on a non-success response.
    #[instrument(skip(self, access_token))]
    pub async fn profile(&self, access_token: &SecretString) -> Result<LineProfileInfo, LineError> {
        let response = self
            .inner
            .client
            .get(format!("{}/v2/profile", self.inner.api_url))
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Verify an ID token with LINE and return its email claim, if any.
    ///
    /// # Errors
    ///
    /// Returns `LineError::OAuth` if LINE does not accept the token.
    #[instrument(skip(self, id_token))]
    pub async fn verify_id_token(&self, id_token: &str) -> Result<Option<String>, LineError> {
        let url = format!("{}/oauth2/v2.1/verify", self.inner.api_url);
        let params = [("id_token", id_token), ("client_id", self.inner.channel_id.as_str())];

        let response = self.inner.client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LineError::OAuth(format!("ID token rejected: {text}")));
        }

        let claims: IdTokenClaims = response.json().await?;
        Ok(claims.email)
    }

    /// Complete the callback: exchange the code, fetch the profile and,
    /// when an ID token came back, its email.
    ///
    /// A failed ID token verification only drops the email.
    ///
    /// # Errors
    ///
    /// Returns an error if the code exchange or profile fetch fails.
    pub async fn identify(&self, code: &str, redirect_uri: &str) -> Result<LineIdentity, LineError> {
        let tokens = self.exchange_code(code, redirect_uri).await?;
        let profile = self.profile(&tokens.access_token).await?;

        let email = match tokens.id_token.as_deref() {
            Some(id_token) => match self.verify_id_token(id_token).await {
                Ok(email) => email,
                Err(e) => {
                    tracing::warn!(error = %e, "LINE id token verification failed, continuing without email");
                    None
                }
            },
            None => None,
        };

        Ok(LineIdentity { profile, email })
    }
}
