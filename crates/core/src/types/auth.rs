//! Authentication enums and the commerce customer identifier.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a verification code is allowed to authorise.
///
/// This is a closed set. Anything else is rejected before a code is
/// persisted or looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    /// Prove control of the email used to register.
    Register,
    /// Authorise a password reset.
    ResetPassword,
    /// Attach an email to a LINE-linked profile.
    BindEmail,
}

impl CodePurpose {
    /// The value stored in the `purpose` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::ResetPassword => "reset_password",
            Self::BindEmail => "bind_email",
        }
    }
}

impl fmt::Display for CodePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognised purpose string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown verification purpose: {0}")]
pub struct ParseCodePurposeError(pub String);

impl FromStr for CodePurpose {
    type Err = ParseCodePurposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(Self::Register),
            "reset_password" => Ok(Self::ResetPassword),
            "bind_email" => Ok(Self::BindEmail),
            other => Err(ParseCodePurposeError(other.to_owned())),
        }
    }
}

/// How the current session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// LINE OAuth login.
    Line,
    /// Email and password (or email OTP verification).
    Email,
    /// `WebAuthn` passkey.
    Passkey,
}

impl AuthMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Email => "email",
            Self::Passkey => "passkey",
        }
    }
}

/// Customer identifier in the external commerce backend.
///
/// This is the canonical identity key orders, wallet, and tier hang off.
/// Opaque to this application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Wrap a backend customer ID.
    ///
    /// Returns `None` for an empty or whitespace-only value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CustomerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for CustomerId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for CustomerId {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for CustomerId {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
