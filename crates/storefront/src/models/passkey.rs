//! `WebAuthn` passkey credentials and ceremony challenges.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use webauthn_rs::prelude::Passkey;

use hinata_core::{CredentialOwner, Email, PasskeyRowId, WebAuthnCredentialId};

/// A registered passkey (domain type).
///
/// Members can have multiple passkeys for different devices. Removal is a
/// soft delete (`is_active = false`).
#[derive(Debug, Clone)]
pub struct PasskeyCredential {
    /// Database ID of this credential.
    pub id: PasskeyRowId,
    /// `WebAuthn` credential ID (from the authenticator).
    pub credential_id: WebAuthnCredentialId,
    /// Identity record the passkey belongs to.
    pub owner: CredentialOwner,
    /// Email used to find this passkey at sign-in.
    pub email: Option<Email>,
    /// The full passkey data including public key.
    pub passkey: Passkey,
    /// Last accepted signature counter.
    pub sign_count: u32,
    /// Relying party the credential is bound to.
    pub rp_id: String,
    /// Authenticator transports reported at registration.
    pub transports: Vec<String>,
    /// User-assigned name (e.g. "iPhone").
    pub device_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl PasskeyCredential {
    /// Public listing view (no key material).
    #[must_use]
    pub fn summary(&self) -> PasskeySummary {
        PasskeySummary {
            id: self.id,
            device_name: self.device_name.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// Data for storing a newly registered passkey.
#[derive(Debug, Clone)]
pub struct NewPasskeyCredential {
    pub owner: CredentialOwner,
    pub email: Option<Email>,
    pub passkey: Passkey,
    pub rp_id: String,
    pub transports: Vec<String>,
    pub device_name: String,
}

/// Passkey listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeySummary {
    pub id: PasskeyRowId,
    pub device_name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// `WebAuthn` ceremony a challenge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ceremony {
    Registration,
    Authentication,
}

impl Ceremony {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }
}

/// A pending single-use ceremony challenge.
///
/// `state` is the serialised webauthn-rs ceremony state. `scope` ties the
/// challenge to the identity that requested it.
#[derive(Debug, Clone)]
pub struct PasskeyChallenge {
    pub id: Uuid,
    pub ceremony: Ceremony,
    pub scope: String,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
