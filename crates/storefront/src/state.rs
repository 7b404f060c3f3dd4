//! Application state shared across handlers.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use lettre::transport::smtp::Error as SmtpError;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use thiserror::Error;

use crate::commerce::{CommerceBackend, CommerceError, HttpCommerceClient};
use crate::config::StorefrontConfig;
use crate::db::Repositories;
use crate::line::{LineClient, LineError};
use crate::services::auth::AuthService;
use crate::services::email::{EmailSender, SmtpEmailSender};
use crate::services::member::MemberService;
use crate::services::passkey::{PasskeyService, WebauthnConfigError, create_webauthn};
use crate::services::session::{SessionManager, derive_cookie_key};
use crate::services::verification::VerificationCodeManager;

/// Relying party name shown by authenticators.
const RP_NAME: &str = "Hinata";

/// Error building the application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("webauthn configuration: {0}")]
    Webauthn(#[from] WebauthnConfigError),
    #[error("commerce client: {0}")]
    Commerce(#[from] CommerceError),
    #[error("LINE client: {0}")]
    Line(#[from] LineError),
    #[error("SMTP: {0}")]
    Smtp(#[from] SmtpError),
}

/// Storage and outbound dependencies of the state.
///
/// Production wiring is [`AppState::from_config`]; tests pass in-memory
/// implementations here.
pub struct Backends {
    /// Pool for readiness checks. `None` when repositories are in memory.
    pub pool: Option<PgPool>,
    pub repos: Repositories,
    pub commerce: Arc<dyn CommerceBackend>,
    /// `None` disables email delivery.
    pub mailer: Option<Arc<dyn EmailSender>>,
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    line: LineClient,
    cookie_key: Key,
    sessions: SessionManager,
    auth: AuthService,
    passkeys: PasskeyService,
    members: MemberService,
}

impl AppState {
    /// Wire the production dependencies: `PostgreSQL` repositories, the HTTP
    /// commerce client and SMTP delivery when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if a client cannot be configured.
    pub fn from_config(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let commerce = HttpCommerceClient::new(&config.commerce)?;
        let mailer = match &config.email {
            Some(email) => Some(Arc::new(SmtpEmailSender::new(email)?) as Arc<dyn EmailSender>),
            None => {
                tracing::warn!("SMTP_HOST not set, email delivery disabled");
                None
            }
        };

        Self::new(
            config,
            Backends {
                repos: Repositories::postgres(&pool),
                pool: Some(pool),
                commerce: Arc::new(commerce),
                mailer,
            },
        )
    }

    /// Create the application state over the given backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the `WebAuthn` or LINE configuration is invalid.
    pub fn new(config: StorefrontConfig, backends: Backends) -> Result<Self, StateError> {
        let Backends {
            pool,
            repos,
            commerce,
            mailer,
        } = backends;

        let (webauthn, rp_id) = create_webauthn(&config.base_url, RP_NAME)?;
        let line = LineClient::new(&config.line)?;
        let cookie_key = derive_cookie_key(config.session_secret.expose_secret());
        let sessions = SessionManager::new(config.secure_cookies());

        let codes = VerificationCodeManager::new(repos.verification_codes.clone(), config.otp);
        let auth = AuthService::new(
            repos.clone(),
            codes,
            mailer,
            commerce.clone(),
            config.environment,
        );
        let passkeys = PasskeyService::new(repos.clone(), Arc::new(webauthn), rp_id);
        let members = MemberService::new(repos, commerce);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                line,
                cookie_key,
                sessions,
                auth,
                passkeys,
                members,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool, if any.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn line(&self) -> &LineClient {
        &self.inner.line
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    #[must_use]
    pub fn passkeys(&self) -> &PasskeyService {
        &self.inner.passkeys
    }

    #[must_use]
    pub fn members(&self) -> &MemberService {
        &self.inner.members
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.inner.cookie_key.clone()
    }
}
