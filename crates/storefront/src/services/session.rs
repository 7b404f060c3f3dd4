//! Signed-cookie sessions.
//!
//! The session is a bearer token held by the client: a JSON
//! [`SessionPayload`] in a cookie signed with a key derived from the session
//! secret. Nothing is stored server side.

use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use sha2::{Digest, Sha512};

use crate::models::SessionPayload;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "hinata_session";

/// LINE OAuth CSRF state cookie name.
pub const LINE_STATE_COOKIE: &str = "hinata_line_state";

const SESSION_MAX_AGE: time::Duration = time::Duration::days(7);
const LINE_STATE_MAX_AGE: time::Duration = time::Duration::minutes(10);

/// Derive the cookie signing key from the session secret.
#[must_use]
pub fn derive_cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

/// Creates, reads and destroys session cookies.
#[derive(Debug, Clone, Copy)]
pub struct SessionManager {
    secure: bool,
}

impl SessionManager {
    /// `secure` sets the `Secure` attribute on every cookie.
    #[must_use]
    pub const fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn cookie(&self, name: &'static str, value: String, max_age: time::Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure)
            .max_age(max_age)
            .build()
    }

    /// Store `payload` as the session, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialised.
    pub fn create(
        &self,
        jar: SignedCookieJar,
        payload: &SessionPayload,
    ) -> Result<SignedCookieJar, serde_json::Error> {
        let value = serde_json::to_string(payload)?;
        Ok(jar.add(self.cookie(SESSION_COOKIE, value, SESSION_MAX_AGE)))
    }

    /// Current session, or `None` if absent, tampered with or malformed.
    #[must_use]
    pub fn read(&self, jar: &SignedCookieJar) -> Option<SessionPayload> {
        let cookie = jar.get(SESSION_COOKIE)?;
        match serde_json::from_str(cookie.value()) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::debug!(error = %e, "discarding malformed session cookie");
                None
            }
        }
    }

    /// Remove the session cookie. Safe to call without a session.
    #[must_use]
    pub fn destroy(&self, jar: SignedCookieJar) -> SignedCookieJar {
        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }

    /// Remember the OAuth `state` for the callback.
    #[must_use]
    pub fn set_line_state(&self, jar: SignedCookieJar, state: String) -> SignedCookieJar {
        jar.add(self.cookie(LINE_STATE_COOKIE, state, LINE_STATE_MAX_AGE))
    }

    /// Take the stored OAuth `state`, removing the cookie.
    #[must_use]
    pub fn take_line_state(&self, jar: SignedCookieJar) -> (SignedCookieJar, Option<String>) {
        let state = jar.get(LINE_STATE_COOKIE).map(|c| c.value().to_owned());
        let jar = jar.remove(Cookie::build(LINE_STATE_COOKIE).path("/"));
        (jar, state)
    }
}
