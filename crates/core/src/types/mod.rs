//! Core types for Hinata.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod auth;
pub mod credential;
pub mod email;
pub mod id;
pub mod money;

pub use auth::{AuthMethod, CodePurpose, CustomerId, ParseCodePurposeError};
pub use credential::{CredentialOwner, WebAuthnCredentialId};
pub use email::{Email, EmailError};
pub use id::*;
pub use money::{CurrencyCode, Money};
