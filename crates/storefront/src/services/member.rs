//! Member data views.
//!
//! Everything here starts from the session payload. The payload may be
//! stale (linking can finish after the cookie was minted), so the customer
//! ID is re-read from the identity records when the cookie has none.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use hinata_core::{AuthMethod, CustomerId, Email};

use crate::commerce::{CommerceBackend, CommerceError, MemberTier, OrderSummary, Wallet};
use crate::db::{RepositoryError, Repositories};
use crate::models::{EmailUser, LineProfile, SessionPayload, ShippingInfo};

/// Tier lookups are cached for 5 minutes.
const TIER_TTL: Duration = Duration::from_secs(300);

const TIER_CACHE_CAPACITY: u64 = 10_000;

/// Orders returned when the client does not ask for a count.
pub const DEFAULT_ORDER_LIMIT: u32 = 10;

/// Largest order page.
pub const MAX_ORDER_LIMIT: u32 = 50;

/// Errors from the member views.
#[derive(Debug, Error)]
pub enum MemberError {
    /// The signed-in identity has no commerce customer yet.
    #[error("account is not linked to a customer yet")]
    NotLinked,

    #[error("commerce backend error: {0}")]
    Commerce(#[from] CommerceError),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// `GET /api/member/profile`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberProfile {
    pub display_name: String,
    pub picture_url: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub phone: Option<String>,
    pub customer_id: Option<CustomerId>,
    pub auth_method: AuthMethod,
    pub line_linked: bool,
}

/// `GET /api/member/preferences`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberPreferences {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub shipping: Option<ShippingInfo>,
}

/// Identity records behind a session.
struct Identity {
    email_user: Option<EmailUser>,
    line_profile: Option<LineProfile>,
}

impl Identity {
    fn customer_id(&self) -> Option<CustomerId> {
        self.email_user
            .as_ref()
            .and_then(|u| u.customer_id.clone())
            .or_else(|| self.line_profile.as_ref().and_then(|p| p.customer_id.clone()))
    }
}

/// Member views over the identity store and the commerce backend.
#[derive(Clone)]
pub struct MemberService {
    repos: Repositories,
    commerce: Arc<dyn CommerceBackend>,
    tiers: Cache<CustomerId, MemberTier>,
}

impl MemberService {
    #[must_use]
    pub fn new(repos: Repositories, commerce: Arc<dyn CommerceBackend>) -> Self {
        let tiers = Cache::builder()
            .max_capacity(TIER_CACHE_CAPACITY)
            .time_to_live(TIER_TTL)
            .build();
        Self {
            repos,
            commerce,
            tiers,
        }
    }

    /// Profile of the signed-in member.
    ///
    /// # Errors
    ///
    /// Returns `MemberError::Repository` if a lookup fails.
    pub async fn profile(&self, session: &SessionPayload) -> Result<MemberProfile, MemberError> {
        let identity = self.identity(session).await?;
        let email_user = identity.email_user.as_ref();
        let line = identity.line_profile.as_ref();

        Ok(MemberProfile {
            display_name: session.display_name.clone(),
            picture_url: session
                .picture_url
                .clone()
                .or_else(|| line.and_then(|p| p.picture_url.clone())),
            email: email_user
                .map(|u| u.email.to_string())
                .or_else(|| line.and_then(|p| p.email.as_ref().map(Email::to_string)))
                .or_else(|| session.email.clone()),
            email_verified: email_user.is_some_and(|u| u.email_verified),
            phone: email_user.and_then(|u| u.phone.clone()),
            customer_id: session.customer_id.clone().or_else(|| identity.customer_id()),
            auth_method: session.auth_method,
            line_linked: line.is_some(),
        })
    }

    /// Wallet balance and points.
    ///
    /// # Errors
    ///
    /// Returns `MemberError::NotLinked` without a customer, or the backend
    /// error.
    #[instrument(skip(self, session))]
    pub async fn wallet(&self, session: &SessionPayload) -> Result<Wallet, MemberError> {
        let customer_id = self.customer_id(session).await?;
        Ok(self.commerce.wallet(&customer_id).await?)
    }

    /// Membership tier, cached per customer.
    ///
    /// # Errors
    ///
    /// Returns `MemberError::NotLinked` without a customer, or the backend
    /// error. Failures are not cached.
    #[instrument(skip(self, session))]
    pub async fn tier(&self, session: &SessionPayload) -> Result<MemberTier, MemberError> {
        let customer_id = self.customer_id(session).await?;

        if let Some(tier) = self.tiers.get(&customer_id).await {
            return Ok(tier);
        }

        let tier = self.commerce.tier(&customer_id).await?;
        self.tiers.insert(customer_id, tier.clone()).await;
        Ok(tier)
    }

    /// Recent orders, newest first. `limit` is clamped to 1..=50.
    ///
    /// # Errors
    ///
    /// Returns `MemberError::NotLinked` without a customer, or the backend
    /// error.
    #[instrument(skip(self, session))]
    pub async fn orders(
        &self,
        session: &SessionPayload,
        limit: Option<u32>,
    ) -> Result<Vec<OrderSummary>, MemberError> {
        let customer_id = self.customer_id(session).await?;
        let limit = limit
            .unwrap_or(DEFAULT_ORDER_LIMIT)
            .clamp(1, MAX_ORDER_LIMIT);
        Ok(self.commerce.orders(&customer_id, limit).await?)
    }

    /// Saved contact and shipping details.
    ///
    /// # Errors
    ///
    /// Returns `MemberError::Repository` if a lookup fails.
    pub async fn preferences(
        &self,
        session: &SessionPayload,
    ) -> Result<MemberPreferences, MemberError> {
        let identity = self.identity(session).await?;
        let email_user = identity.email_user.as_ref();
        let line = identity.line_profile.as_ref();

        Ok(MemberPreferences {
            name: email_user.map_or_else(|| session.display_name.clone(), |u| u.name.clone()),
            email: email_user
                .map(|u| u.email.to_string())
                .or_else(|| line.and_then(|p| p.email.as_ref().map(Email::to_string))),
            phone: email_user.and_then(|u| u.phone.clone()),
            shipping: line.and_then(LineProfile::last_shipping),
        })
    }

    /// Drop cached views of one customer.
    pub async fn invalidate(&self, customer_id: &CustomerId) {
        self.tiers.invalidate(customer_id).await;
        tracing::debug!(customer_id = %customer_id, "member cache invalidated");
    }

    /// Drop every cached view.
    pub fn invalidate_all(&self) {
        self.tiers.invalidate_all();
        tracing::debug!("member cache cleared");
    }

    async fn customer_id(&self, session: &SessionPayload) -> Result<CustomerId, MemberError> {
        if let Some(id) = &session.customer_id {
            return Ok(id.clone());
        }
        self.identity(session)
            .await?
            .customer_id()
            .ok_or(MemberError::NotLinked)
    }

    async fn identity(&self, session: &SessionPayload) -> Result<Identity, MemberError> {
        let email_user = match session.email_user_id {
            Some(id) => self.repos.email_users.get_by_id(id).await?,
            None => None,
        };
        let line_profile = match &session.line_user_id {
            Some(line_user_id) => self.repos.line_profiles.get(line_user_id).await?,
            None => None,
        };
        Ok(Identity {
            email_user,
            line_profile,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use hinata_core::{CurrencyCode, Money};

    use super::*;
    use crate::commerce::InMemoryCommerce;
    use crate::commerce::memory::sample_order;
    use crate::db::{LineProfileRepository, MemoryStore};
    use crate::models::LineProfileUpsert;

    fn gold() -> MemberTier {
        MemberTier {
            code: "gold".to_owned(),
            name: "Gold".to_owned(),
            points: 1200,
            next_tier: Some("platinum".to_owned()),
            points_to_next: Some(800),
        }
    }

    fn linked_session(id: &CustomerId) -> SessionPayload {
        let mut session = SessionPayload::new("Aki", AuthMethod::Line);
        session.customer_id = Some(id.clone());
        session
    }

    fn service(commerce: &Arc<InMemoryCommerce>) -> MemberService {
        MemberService::new(Repositories::in_memory(), commerce.clone())
    }

    #[tokio::test]
    async fn test_unlinked_session_is_rejected() {
        let commerce = Arc::new(InMemoryCommerce::new());
        let members = service(&commerce);
        let session = SessionPayload::new("Aki", AuthMethod::Email);

        assert!(matches!(
            members.wallet(&session).await,
            Err(MemberError::NotLinked)
        ));
        assert!(matches!(
            members.tier(&session).await,
            Err(MemberError::NotLinked)
        ));
        assert!(matches!(
            members.orders(&session, None).await,
            Err(MemberError::NotLinked)
        ));
    }

    #[tokio::test]
    async fn test_tier_is_cached_until_invalidated() {
        let commerce = Arc::new(InMemoryCommerce::new());
        let id = CustomerId::new("cus_1").unwrap();
        commerce.seed_customer(&id, gold()).await;
        let members = service(&commerce);
        let session = linked_session(&id);

        assert_eq!(members.tier(&session).await.unwrap(), gold());
        assert_eq!(members.tier(&session).await.unwrap(), gold());
        assert_eq!(commerce.tier_lookups().await, 1);

        members.invalidate(&id).await;
        members.tier(&session).await.unwrap();
        assert_eq!(commerce.tier_lookups().await, 2);

        members.invalidate_all();
        members.tier(&session).await.unwrap();
        assert_eq!(commerce.tier_lookups().await, 3);
    }

    #[tokio::test]
    async fn test_orders_limit_is_clamped() {
        let commerce = Arc::new(InMemoryCommerce::new());
        let id = CustomerId::new("cus_1").unwrap();
        commerce.seed_customer(&id, gold()).await;
        for n in 0..60 {
            commerce
                .push_order(
                    &id,
                    sample_order(&format!("#{n}"), Money::new(Decimal::new(100, 0), CurrencyCode::JPY)),
                )
                .await;
        }
        let members = service(&commerce);
        let session = linked_session(&id);

        assert_eq!(members.orders(&session, None).await.unwrap().len(), 10);
        assert_eq!(members.orders(&session, Some(0)).await.unwrap().len(), 1);
        assert_eq!(members.orders(&session, Some(500)).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_stale_session_uses_stored_customer() {
        let store = Arc::new(MemoryStore::new());
        let commerce = Arc::new(InMemoryCommerce::new());
        let id = CustomerId::new("cus_9").unwrap();
        commerce.seed_customer(&id, gold()).await;

        LineProfileRepository::upsert(
            &*store,
            LineProfileUpsert {
                line_user_id: "U1".to_owned(),
                display_name: "Ren".to_owned(),
                picture_url: None,
                email: None,
            },
        )
        .await
        .unwrap();
        LineProfileRepository::set_customer_id(&*store, "U1", &id)
            .await
            .unwrap();

        let members = MemberService::new(Repositories::from_store(&store), commerce.clone());
        let mut session = SessionPayload::new("Ren", AuthMethod::Line);
        session.line_user_id = Some("U1".to_owned());

        let wallet = members.wallet(&session).await.unwrap();
        assert_eq!(wallet.balance, Money::zero(CurrencyCode::JPY));

        let profile = members.profile(&session).await.unwrap();
        assert_eq!(profile.customer_id, Some(id));
        assert!(profile.line_linked);
        assert!(!profile.email_verified);
    }

    #[tokio::test]
    async fn test_preferences_fall_back_to_session_name() {
        let commerce = Arc::new(InMemoryCommerce::new());
        let members = service(&commerce);
        let session = SessionPayload::new("Aki", AuthMethod::Line);

        let prefs = members.preferences(&session).await.unwrap();
        assert_eq!(prefs.name, "Aki");
        assert_eq!(prefs.shipping, None);
        assert_eq!(prefs.email, None);
    }
}
