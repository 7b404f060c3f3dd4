//! Storefront configuration loaded from environment variables.
//!
//! Configuration is resolved once at start-up into an immutable
//! [`StorefrontConfig`] and shared through `AppState`. Handlers never read
//! the environment themselves.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `STOREFRONT_SESSION_SECRET` - Session cookie signing secret (min 32 chars, high entropy)
//! - `REVALIDATE_SECRET` - Shared secret for `POST /api/revalidate`
//! - `LINE_CHANNEL_ID` - LINE Login channel ID
//! - `LINE_CHANNEL_SECRET` - LINE Login channel secret
//! - `COMMERCE_API_URL` - Commerce backend base URL
//! - `COMMERCE_ADMIN_EMAIL` - Commerce backend admin account
//! - `COMMERCE_ADMIN_PASSWORD` - Commerce backend admin password
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_ENV` - `production` or `development` (default: production)
//! - `OTP_CODE_LENGTH` - Digits per verification code (default: 6)
//! - `OTP_TTL_SECONDS` - Code lifetime (default: 600)
//! - `OTP_RESEND_COOLDOWN_SECONDS` - Minimum gap between codes (default: 60)
//! - `OTP_MAX_ATTEMPTS` - Wrong guesses before a code is dead (default: 5)
//! - `SMTP_HOST` - SMTP relay; email delivery is disabled when unset
//! - `SMTP_PORT` - SMTP port (default: 587)
//! - `SMTP_USERNAME` / `SMTP_PASSWORD` - SMTP credentials (required with `SMTP_HOST`)
//! - `EMAIL_FROM` - Sender address (default: `Hinata <no-reply@hinata.shop>`)
//! - `LINE_AUTHORIZE_URL` - default: `https://access.line.me/oauth2/v2.1/authorize`
//! - `LINE_API_URL` - default: `https://api.line.me`
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const MIN_OTP_CODE_LENGTH: usize = 4;
const MAX_OTP_CODE_LENGTH: usize = 10;
const MAX_OTP_TTL_SECONDS: i64 = 24 * 60 * 60;
const MAX_OTP_RESEND_COOLDOWN_SECONDS: i64 = 60 * 60;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development. Enables the verification-code fallback.
    Development,
    #[default]
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("expected 'production' or 'development', got '{other}'")),
        }
    }
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Deployment environment
    pub environment: Environment,
    /// Session cookie signing secret
    pub session_secret: SecretString,
    /// Shared secret for the cache revalidation endpoint
    pub revalidate_secret: SecretString,
    /// Verification code policy
    pub otp: OtpConfig,
    /// LINE Login configuration
    pub line: LineConfig,
    /// Commerce backend configuration
    pub commerce: CommerceConfig,
    /// SMTP configuration (None disables delivery)
    pub email: Option<EmailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
}

/// Verification code policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpConfig {
    /// Number of digits in a code.
    pub code_length: usize,
    /// Seconds a code stays valid after issuance.
    pub ttl_seconds: i64,
    /// Seconds before another code may be issued for the same subject and purpose.
    pub resend_cooldown_seconds: i64,
    /// Wrong guesses allowed before the code is exhausted.
    pub max_attempts: i32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            ttl_seconds: 10 * 60,
            resend_cooldown_seconds: 60,
            max_attempts: 5,
        }
    }
}

/// LINE Login channel configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct LineConfig {
    /// LINE Login channel ID (OAuth client ID)
    pub channel_id: String,
    /// LINE Login channel secret (OAuth client secret)
    pub channel_secret: SecretString,
    /// Authorization endpoint
    pub authorize_url: String,
    /// API base URL (token, verify, profile)
    pub api_url: String,
}

impl std::fmt::Debug for LineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineConfig")
            .field("channel_id", &self.channel_id)
            .field("channel_secret", &"[REDACTED]")
            .field("authorize_url", &self.authorize_url)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Commerce backend configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct CommerceConfig {
    /// Base URL of the commerce backend API
    pub api_url: String,
    /// Admin account used for customer provisioning and member lookups
    pub admin_email: String,
    /// Admin account password
    pub admin_password: SecretString,
}

impl std::fmt::Debug for CommerceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommerceConfig")
            .field("api_url", &self.api_url)
            .field("admin_email", &self.admin_email)
            .field("admin_password", &"[REDACTED]")
            .finish()
    }
}

/// SMTP configuration for transactional email.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = parse_env_or_default::<IpAddr>("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>("STOREFRONT_PORT", "3000")?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?
            .trim_end_matches('/')
            .to_owned();
        let environment = parse_env_or_default::<Environment>("STOREFRONT_ENV", "production")?;
        let session_secret = get_validated_secret("STOREFRONT_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "STOREFRONT_SESSION_SECRET")?;
        let revalidate_secret = get_validated_secret("REVALIDATE_SECRET")?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            environment,
            session_secret,
            revalidate_secret,
            otp: OtpConfig::from_env()?,
            line: LineConfig::from_env()?,
            commerce: CommerceConfig::from_env()?,
            email: EmailConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether this is a production deployment.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Whether cookies must carry the `Secure` attribute.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.is_production() || self.base_url.starts_with("https://")
    }

    /// OAuth redirect URI registered with LINE.
    #[must_use]
    pub fn line_redirect_uri(&self) -> String {
        format!("{}/api/auth/line/callback", self.base_url)
    }
}

impl OtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Self {
            code_length: parse_env_or_default(
                "OTP_CODE_LENGTH",
                &defaults.code_length.to_string(),
            )?,
            ttl_seconds: parse_env_or_default(
                "OTP_TTL_SECONDS",
                &defaults.ttl_seconds.to_string(),
            )?,
            resend_cooldown_seconds: parse_env_or_default(
                "OTP_RESEND_COOLDOWN_SECONDS",
                &defaults.resend_cooldown_seconds.to_string(),
            )?,
            max_attempts: parse_env_or_default(
                "OTP_MAX_ATTEMPTS",
                &defaults.max_attempts.to_string(),
            )?,
        }
        .validated()
    }

    /// Reject lengths and durations outside the supported ranges.
    fn validated(self) -> Result<Self, ConfigError> {
        let invalid = |var: &str, msg: String| -> Result<Self, ConfigError> {
            Err(ConfigError::InvalidEnvVar(var.to_owned(), msg))
        };

        if !(MIN_OTP_CODE_LENGTH..=MAX_OTP_CODE_LENGTH).contains(&self.code_length) {
            return invalid(
                "OTP_CODE_LENGTH",
                format!("must be between {MIN_OTP_CODE_LENGTH} and {MAX_OTP_CODE_LENGTH}"),
            );
        }
        if !(1..=MAX_OTP_TTL_SECONDS).contains(&self.ttl_seconds) {
            return invalid(
                "OTP_TTL_SECONDS",
                format!("must be between 1 and {MAX_OTP_TTL_SECONDS}"),
            );
        }
        if !(0..=MAX_OTP_RESEND_COOLDOWN_SECONDS).contains(&self.resend_cooldown_seconds) {
            return invalid(
                "OTP_RESEND_COOLDOWN_SECONDS",
                format!("must be between 0 and {MAX_OTP_RESEND_COOLDOWN_SECONDS}"),
            );
        }
        if self.max_attempts <= 0 {
            return invalid("OTP_MAX_ATTEMPTS", "must be positive".to_owned());
        }
        Ok(self)
    }
}

impl LineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            channel_id: get_required_env("LINE_CHANNEL_ID")?,
            channel_secret: get_validated_secret("LINE_CHANNEL_SECRET")?,
            authorize_url: get_env_or_default(
                "LINE_AUTHORIZE_URL",
                "https://access.line.me/oauth2/v2.1/authorize",
            ),
            api_url: get_env_or_default("LINE_API_URL", "https://api.line.me")
                .trim_end_matches('/')
                .to_owned(),
        })
    }
}

impl CommerceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: get_required_env("COMMERCE_API_URL")?
                .trim_end_matches('/')
                .to_owned(),
            admin_email: get_required_env("COMMERCE_ADMIN_EMAIL")?,
            admin_password: get_required_secret("COMMERCE_ADMIN_PASSWORD")?,
        })
    }
}

impl EmailConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(smtp_host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            smtp_host,
            smtp_port: parse_env_or_default("SMTP_PORT", "587")?,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_required_secret("SMTP_PASSWORD")?,
            from_address: get_env_or_default("EMAIL_FROM", "Hinata <no-reply@hinata.shop>"),
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to a default literal.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_config(base_url: &str, environment: Environment) -> StorefrontConfig {
        StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: base_url.to_string(),
            environment,
            session_secret: SecretString::from("x".repeat(32)),
            revalidate_secret: SecretString::from("r".repeat(32)),
            otp: OtpConfig::default(),
            line: LineConfig {
                channel_id: "1650000000".to_string(),
                channel_secret: SecretString::from("line_channel_secret_value"),
                authorize_url: "https://access.line.me/oauth2/v2.1/authorize".to_string(),
                api_url: "https://api.line.me".to_string(),
            },
            commerce: CommerceConfig {
                api_url: "http://commerce.internal".to_string(),
                admin_email: "ops@hinata.shop".to_string(),
                admin_password: SecretString::from("super_secret_admin_password"),
            },
            email: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-api-key-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_session_secret_too_short() {
        let secret = SecretString::from("short");
        assert!(validate_session_secret(&secret, "TEST_SESSION").is_err());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("development".parse::<Environment>(), Ok(Environment::Development));
        assert_eq!("PRODUCTION".parse::<Environment>(), Ok(Environment::Production));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_otp_defaults() {
        let otp = OtpConfig::default();
        assert_eq!(otp.code_length, 6);
        assert_eq!(otp.ttl_seconds, 600);
        assert_eq!(otp.resend_cooldown_seconds, 60);
        assert_eq!(otp.max_attempts, 5);
    }

    #[test]
    fn test_otp_bounds() {
        let otp = OtpConfig::default();
        assert!(otp.validated().is_ok());
        assert!(
            OtpConfig {
                ttl_seconds: MAX_OTP_TTL_SECONDS,
                resend_cooldown_seconds: 0,
                ..otp
            }
            .validated()
            .is_ok()
        );

        let rejected = [
            ("OTP_CODE_LENGTH", OtpConfig { code_length: 3, ..otp }),
            ("OTP_CODE_LENGTH", OtpConfig { code_length: 11, ..otp }),
            ("OTP_TTL_SECONDS", OtpConfig { ttl_seconds: 0, ..otp }),
            ("OTP_TTL_SECONDS", OtpConfig { ttl_seconds: i64::MAX, ..otp }),
            (
                "OTP_RESEND_COOLDOWN_SECONDS",
                OtpConfig { resend_cooldown_seconds: -1, ..otp },
            ),
            (
                "OTP_RESEND_COOLDOWN_SECONDS",
                OtpConfig { resend_cooldown_seconds: MAX_OTP_RESEND_COOLDOWN_SECONDS + 1, ..otp },
            ),
            ("OTP_MAX_ATTEMPTS", OtpConfig { max_attempts: 0, ..otp }),
        ];
        for (var, config) in rejected {
            match config.validated() {
                Err(ConfigError::InvalidEnvVar(name, _)) => assert_eq!(name, var),
                other => panic!("{var}: expected InvalidEnvVar, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_secure_cookies() {
        assert!(!sample_config("http://localhost:3000", Environment::Development).secure_cookies());
        assert!(sample_config("https://shop.example", Environment::Development).secure_cookies());
        assert!(sample_config("http://localhost:3000", Environment::Production).secure_cookies());
    }

    #[test]
    fn test_socket_addr_and_redirect_uri() {
        let config = sample_config("http://localhost:3000", Environment::Development);
        assert_eq!(config.socket_addr().port(), 3000);
        assert_eq!(
            config.line_redirect_uri(),
            "http://localhost:3000/api/auth/line/callback"
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = sample_config("http://localhost:3000", Environment::Development);
        let line_debug = format!("{:?}", config.line);
        let commerce_debug = format!("{:?}", config.commerce);

        assert!(line_debug.contains("1650000000"));
        assert!(line_debug.contains("[REDACTED]"));
        assert!(!line_debug.contains("line_channel_secret_value"));
        assert!(commerce_debug.contains("ops@hinata.shop"));
        assert!(!commerce_debug.contains("super_secret_admin_password"));
    }
}
