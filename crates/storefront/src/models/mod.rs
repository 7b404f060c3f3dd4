//! Domain models for the storefront.
//!
//! These are validated domain objects, separate from the database row types
//! in `crate::db`.

pub mod email_user;
pub mod line_profile;
pub mod passkey;
pub mod session;
pub mod verification_code;

pub use email_user::{EmailUser, EmailUserSummary, NewEmailUser};
pub use line_profile::{LineProfile, LineProfileUpsert, ShippingInfo};
pub use passkey::{
    Ceremony, NewPasskeyCredential, PasskeyChallenge, PasskeyCredential, PasskeySummary,
};
pub use session::SessionPayload;
pub use verification_code::{NewVerificationCode, VerificationCode};
