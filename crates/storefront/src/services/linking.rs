//! Account linking.
//!
//! A person can hold an email identity and a LINE identity that were created
//! independently. Both should end up pointing at the same commerce customer.
//! [`resolve_customer`] decides which customer ID wins given what each side
//! currently carries; callers persist the result and, when nothing is known
//! yet, provision a new customer.

use std::fmt;

use serde::Serialize;

use hinata_core::CustomerId;

/// Which identity record a partial identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Email,
    Line,
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => f.write_str("email"),
            Self::Line => f.write_str("line"),
        }
    }
}

/// What one identity record knows about its customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialIdentity {
    pub source: IdentitySource,
    pub email: Option<String>,
    pub customer_id: Option<CustomerId>,
}

impl PartialIdentity {
    #[must_use]
    pub const fn email(email: Option<String>, customer_id: Option<CustomerId>) -> Self {
        Self {
            source: IdentitySource::Email,
            email,
            customer_id,
        }
    }

    #[must_use]
    pub const fn line(email: Option<String>, customer_id: Option<CustomerId>) -> Self {
        Self {
            source: IdentitySource::Line,
            email,
            customer_id,
        }
    }
}

/// Outcome of a linking decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDecision {
    /// The customer ID already in place stays; nothing to persist.
    KeepExisting,
    /// The email side adopts the LINE side's customer ID.
    AdoptFromLine,
    /// The LINE side adopts the email side's customer ID.
    AdoptFromEmail,
    /// Both sides carry different IDs. The email side's ID is used.
    Conflict,
    /// Neither side has a customer; one must be created.
    NeedsProvisioning,
}

/// Canonical customer ID plus how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkResolution {
    /// `None` only for [`LinkDecision::NeedsProvisioning`].
    pub customer_id: Option<CustomerId>,
    pub decision: LinkDecision,
    /// Human-readable steps, for logs.
    pub log: Vec<String>,
}

impl LinkResolution {
    /// Whether the email side must be updated to `customer_id`.
    #[must_use]
    pub const fn updates_email_side(&self) -> bool {
        matches!(self.decision, LinkDecision::AdoptFromLine)
    }

    /// Whether the LINE side must be updated to `customer_id`.
    #[must_use]
    pub const fn updates_line_side(&self) -> bool {
        matches!(self.decision, LinkDecision::AdoptFromEmail)
    }
}

/// Resolve the customer ID for a pair of optional identities.
///
/// `email_side` is the email user record, `line_side` the LINE profile.
/// Either may be absent when the person has only one identity so far.
#[must_use]
pub fn resolve_customer(
    email_side: Option<&PartialIdentity>,
    line_side: Option<&PartialIdentity>,
) -> LinkResolution {
    let email_id = email_side.and_then(|p| p.customer_id.clone());
    let line_id = line_side.and_then(|p| p.customer_id.clone());
    let mut log = Vec::new();

    let (customer_id, decision) = match (email_id, line_id) {
        (Some(email_id), Some(line_id)) if email_id == line_id => {
            log.push(format!("both identities already share customer {email_id}"));
            (Some(email_id), LinkDecision::KeepExisting)
        }
        (Some(email_id), Some(line_id)) => {
            log.push(format!(
                "email identity has customer {email_id}, line identity has {line_id}; using email's"
            ));
            (Some(email_id), LinkDecision::Conflict)
        }
        (Some(email_id), None) if line_side.is_some() => {
            log.push(format!("line identity adopts customer {email_id} from email identity"));
            (Some(email_id), LinkDecision::AdoptFromEmail)
        }
        (None, Some(line_id)) if email_side.is_some() => {
            log.push(format!("email identity adopts customer {line_id} from line identity"));
            (Some(line_id), LinkDecision::AdoptFromLine)
        }
        (Some(id), None) | (None, Some(id)) => {
            log.push(format!("single identity keeps customer {id}"));
            (Some(id), LinkDecision::KeepExisting)
        }
        (None, None) => {
            let sources: Vec<String> = [email_side, line_side]
                .into_iter()
                .flatten()
                .map(|p| p.source.to_string())
                .collect();
            log.push(format!(
                "no customer on {}; provisioning required",
                if sources.is_empty() {
                    "any identity".to_owned()
                } else {
                    sources.join(" or ")
                }
            ));
            (None, LinkDecision::NeedsProvisioning)
        }
    };

    LinkResolution {
        customer_id,
        decision,
        log,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cid(s: &str) -> Option<CustomerId> {
        CustomerId::new(s)
    }

    #[test]
    fn test_email_adopts_line_customer() {
        let email = PartialIdentity::email(Some("a@example.com".into()), None);
        let line = PartialIdentity::line(Some("a@example.com".into()), cid("cus_line"));

        let resolution = resolve_customer(Some(&email), Some(&line));
        assert_eq!(resolution.decision, LinkDecision::AdoptFromLine);
        assert_eq!(resolution.customer_id, cid("cus_line"));
        assert!(resolution.updates_email_side());
        assert!(!resolution.updates_line_side());
    }

    #[test]
    fn test_line_adopts_email_customer() {
        let email = PartialIdentity::email(Some("a@example.com".into()), cid("cus_email"));
        let line = PartialIdentity::line(None, None);

        let resolution = resolve_customer(Some(&email), Some(&line));
        assert_eq!(resolution.decision, LinkDecision::AdoptFromEmail);
        assert_eq!(resolution.customer_id, cid("cus_email"));
        assert!(resolution.updates_line_side());
    }

    #[test]
    fn test_same_customer_kept() {
        let email = PartialIdentity::email(None, cid("cus_1"));
        let line = PartialIdentity::line(None, cid("cus_1"));

        let resolution = resolve_customer(Some(&email), Some(&line));
        assert_eq!(resolution.decision, LinkDecision::KeepExisting);
        assert_eq!(resolution.customer_id, cid("cus_1"));
    }

    #[test]
    fn test_conflict_prefers_email_and_logs_both() {
        let email = PartialIdentity::email(None, cid("cus_e"));
        let line = PartialIdentity::line(None, cid("cus_l"));

        let resolution = resolve_customer(Some(&email), Some(&line));
        assert_eq!(resolution.decision, LinkDecision::Conflict);
        assert_eq!(resolution.customer_id, cid("cus_e"));
        assert!(!resolution.updates_email_side());
        assert!(!resolution.updates_line_side());
        assert!(resolution.log[0].contains("cus_e"));
        assert!(resolution.log[0].contains("cus_l"));
    }

    #[test]
    fn test_single_identity_keeps_its_customer() {
        let line = PartialIdentity::line(None, cid("cus_l"));
        let resolution = resolve_customer(None, Some(&line));
        assert_eq!(resolution.decision, LinkDecision::KeepExisting);
        assert_eq!(resolution.customer_id, cid("cus_l"));
    }

    #[test]
    fn test_nothing_known_needs_provisioning() {
        let email = PartialIdentity::email(Some("a@example.com".into()), None);
        let resolution = resolve_customer(Some(&email), None);
        assert_eq!(resolution.decision, LinkDecision::NeedsProvisioning);
        assert_eq!(resolution.customer_id, None);
        assert!(resolution.log[0].contains("email"));

        let empty = resolve_customer(None, None);
        assert_eq!(empty.decision, LinkDecision::NeedsProvisioning);
    }
}
