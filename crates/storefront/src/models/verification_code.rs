//! One-time verification code records.

use chrono::{DateTime, Utc};

use hinata_core::{CodePurpose, VerificationCodeId};

/// A persisted verification code.
///
/// A code is usable only while `now < expires_at`, `attempts < max_attempts`
/// and `used == false`. Records are never deleted; dead codes just age out.
#[derive(Debug, Clone)]
pub struct VerificationCode {
    pub id: VerificationCodeId,
    /// Who the code was sent to (normalised email).
    pub subject: String,
    /// The numeric code, compared exactly.
    pub code: String,
    pub purpose: CodePurpose,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Failed comparisons so far.
    pub attempts: i32,
    pub max_attempts: i32,
    pub used: bool,
}

impl VerificationCode {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Guesses left before the code is dead.
    #[must_use]
    pub fn remaining_attempts(&self) -> i32 {
        (self.max_attempts - self.attempts).max(0)
    }
}

/// Data for inserting a freshly issued code (`attempts = 0`, `used = false`).
#[derive(Debug, Clone)]
pub struct NewVerificationCode {
    pub subject: String,
    pub code: String,
    pub purpose: CodePurpose,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_attempts: i32,
}
