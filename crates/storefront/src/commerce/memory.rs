//! In-process commerce backend for tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use hinata_core::{CurrencyCode, CustomerId, Money};

use super::types::{MemberTier, NewCustomer, OrderSummary, Wallet};
use super::{CommerceBackend, CommerceError};

#[derive(Default)]
struct State {
    next_id: u32,
    customers: HashMap<CustomerId, NewCustomer>,
    wallets: HashMap<CustomerId, Wallet>,
    tiers: HashMap<CustomerId, MemberTier>,
    orders: HashMap<CustomerId, Vec<OrderSummary>>,
    tier_lookups: usize,
}

/// Commerce backend held entirely in memory.
///
/// Customers get IDs `mem_1`, `mem_2`, ... Unknown customers answer
/// `NotFound`, except wallets and orders of created customers, which start
/// empty.
#[derive(Default)]
pub struct InMemoryCommerce {
    state: Mutex<State>,
}

impl InMemoryCommerce {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing customer with a tier, as if created elsewhere.
    pub async fn seed_customer(&self, id: &CustomerId, tier: MemberTier) {
        let mut state = self.state.lock().await;
        state.customers.insert(
            id.clone(),
            NewCustomer {
                email: None,
                name: String::new(),
                phone: None,
                line_user_id: None,
            },
        );
        state.tiers.insert(id.clone(), tier);
    }

    pub async fn set_wallet(&self, id: &CustomerId, wallet: Wallet) {
        self.state.lock().await.wallets.insert(id.clone(), wallet);
    }

    pub async fn set_tier(&self, id: &CustomerId, tier: MemberTier) {
        self.state.lock().await.tiers.insert(id.clone(), tier);
    }

    pub async fn push_order(&self, id: &CustomerId, order: OrderSummary) {
        self.state
            .lock()
            .await
            .orders
            .entry(id.clone())
            .or_default()
            .push(order);
    }

    /// Customers created through [`CommerceBackend::create_customer`] or seeded.
    pub async fn customer_count(&self) -> usize {
        self.state.lock().await.customers.len()
    }

    /// Customer created with this email, if any.
    pub async fn customer_by_email(&self, email: &str) -> Option<CustomerId> {
        self.state
            .lock()
            .await
            .customers
            .iter()
            .find(|(_, c)| c.email.as_deref() == Some(email))
            .map(|(id, _)| id.clone())
    }

    /// Number of tier lookups served, for cache assertions.
    pub async fn tier_lookups(&self) -> usize {
        self.state.lock().await.tier_lookups
    }
}

#[async_trait]
impl CommerceBackend for InMemoryCommerce {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<CustomerId, CommerceError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = CustomerId::new(format!("mem_{}", state.next_id))
            .ok_or_else(|| CommerceError::InvalidResponse("empty customer id".to_owned()))?;
        state.customers.insert(id.clone(), customer.clone());
        Ok(id)
    }

    async fn wallet(&self, customer_id: &CustomerId) -> Result<Wallet, CommerceError> {
        let state = self.state.lock().await;
        if let Some(wallet) = state.wallets.get(customer_id) {
            return Ok(wallet.clone());
        }
        if state.customers.contains_key(customer_id) {
            return Ok(Wallet {
                balance: Money::zero(CurrencyCode::JPY),
                points: 0,
            });
        }
        Err(CommerceError::NotFound(customer_id.to_string()))
    }

    async fn tier(&self, customer_id: &CustomerId) -> Result<MemberTier, CommerceError> {
        let mut state = self.state.lock().await;
        state.tier_lookups += 1;
        state
            .tiers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| CommerceError::NotFound(customer_id.to_string()))
    }

    async fn orders(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<OrderSummary>, CommerceError> {
        let state = self.state.lock().await;
        if !state.customers.contains_key(customer_id) && !state.orders.contains_key(customer_id) {
            return Err(CommerceError::NotFound(customer_id.to_string()));
        }
        let mut orders = state.orders.get(customer_id).cloned().unwrap_or_default();
        orders.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        orders.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(orders)
    }
}

/// A placeholder order placed now, for seeding.
#[must_use]
pub fn sample_order(number: &str, total: Money) -> OrderSummary {
    OrderSummary {
        id: format!("ord_{number}"),
        number: number.to_owned(),
        status: "paid".to_owned(),
        total,
        placed_at: Utc::now(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use super::*;

    fn new_customer(email: &str) -> NewCustomer {
        NewCustomer {
            email: Some(email.to_owned()),
            name: "Aki".to_owned(),
            phone: None,
            line_user_id: None,
        }
    }

    #[tokio::test]
    async fn test_created_customer_has_empty_wallet() {
        let commerce = InMemoryCommerce::new();
        let id = commerce
            .create_customer(&new_customer("a@example.com"))
            .await
            .unwrap();

        assert_eq!(id.as_str(), "mem_1");
        let wallet = commerce.wallet(&id).await.unwrap();
        assert_eq!(wallet.points, 0);
        assert_eq!(
            commerce.customer_by_email("a@example.com").await,
            Some(id)
        );
    }

    #[tokio::test]
    async fn test_unknown_customer_not_found() {
        let commerce = InMemoryCommerce::new();
        let id = CustomerId::new("nobody").unwrap();
        assert!(matches!(
            commerce.tier(&id).await,
            Err(CommerceError::NotFound(_))
        ));
        assert_eq!(commerce.tier_lookups().await, 1);
    }

    #[tokio::test]
    async fn test_orders_newest_first_and_limited() {
        let commerce = InMemoryCommerce::new();
        let id = commerce
            .create_customer(&new_customer("b@example.com"))
            .await
            .unwrap();
        let yen = |n| Money::new(Decimal::new(n, 0), CurrencyCode::JPY);

        let mut old = sample_order("1001", yen(500));
        old.placed_at -= Duration::days(3);
        commerce.push_order(&id, old).await;
        commerce.push_order(&id, sample_order("1002", yen(800))).await;
        commerce.push_order(&id, sample_order("1003", yen(900))).await;

        let orders = commerce.orders(&id, 2).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.number != "1001"));
    }
}
