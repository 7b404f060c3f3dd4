//! `WebAuthn` credential types.
//!
//! Type-safe wrappers for passkey credential data.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::id::EmailUserId;

/// `WebAuthn` credential identifier (from authenticator).
///
/// This is the raw credential ID bytes returned by the authenticator
/// during registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebAuthnCredentialId(Vec<u8>);

impl WebAuthnCredentialId {
    /// Create a new `WebAuthn` credential ID.
    #[must_use]
    pub const fn new(id: Vec<u8>) -> Self {
        Self(id)
    }

    /// Get the credential ID as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert into the inner bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for WebAuthnCredentialId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for WebAuthnCredentialId {
    fn from(id: Vec<u8>) -> Self {
        Self(id)
    }
}

impl From<&[u8]> for WebAuthnCredentialId {
    fn from(id: &[u8]) -> Self {
        Self(id.to_vec())
    }
}

/// The identity record a passkey belongs to.
///
/// Passkeys can be registered from either an email/password account or a
/// LINE-linked profile. The owner also scopes ceremony challenges, via
/// [`CredentialOwner::scope_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CredentialOwner {
    /// An `email_user` row.
    Email(EmailUserId),
    /// A `line_profile` row, keyed by the LINE user ID.
    Line(String),
}

impl CredentialOwner {
    /// The owner type as stored in the `owner_type` column.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Line(_) => "line",
        }
    }

    /// The owner identifier as stored in the `owner_id` column.
    #[must_use]
    pub fn owner_id(&self) -> String {
        match self {
            Self::Email(id) => id.to_string(),
            Self::Line(line_user_id) => line_user_id.clone(),
        }
    }

    /// Rebuild an owner from its stored `(owner_type, owner_id)` columns.
    ///
    /// Returns `None` for an unknown owner type or a malformed email user ID.
    #[must_use]
    pub fn from_parts(kind: &str, owner_id: &str) -> Option<Self> {
        match kind {
            "email" => owner_id.parse::<i32>().ok().map(|id| Self::Email(EmailUserId::new(id))),
            "line" if !owner_id.is_empty() => Some(Self::Line(owner_id.to_owned())),
            _ => None,
        }
    }

    /// Stable key used to scope challenges to this owner.
    #[must_use]
    pub fn scope_key(&self) -> String {
        format!("{}:{}", self.kind(), self.owner_id())
    }
}

impl fmt::Display for CredentialOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope_key())
    }
}
