//! HTTP client for the commerce backend admin API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::instrument;

use hinata_core::CustomerId;

use super::auth::{AdminTokenCache, authenticate};
use super::types::{MemberTier, NewCustomer, OrderSummary, Wallet};
use super::{CommerceBackend, CommerceError};
use crate::config::CommerceConfig;

/// Commerce backend admin API client.
///
/// Cheap to clone; clones share the HTTP connection pool and token cache.
#[derive(Clone)]
pub struct HttpCommerceClient {
    inner: Arc<HttpCommerceClientInner>,
}

struct HttpCommerceClientInner {
    client: reqwest::Client,
    base_url: String,
    admin_email: String,
    admin_password: SecretString,
    tokens: AdminTokenCache,
}

#[derive(Deserialize)]
struct CreatedCustomer {
    id: String,
}

#[derive(Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: Vec<OrderSummary>,
}

impl HttpCommerceClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::Http` if the HTTP client cannot be built.
    pub fn new(config: &CommerceConfig) -> Result<Self, CommerceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCommerceClientInner {
                client,
                base_url: config.api_url.trim_end_matches('/').to_owned(),
                admin_email: config.admin_email.clone(),
                admin_password: config.admin_password.clone(),
                tokens: AdminTokenCache::new(),
            }),
        })
    }

    async fn access_token(&self) -> Result<SecretString, CommerceError> {
        let inner = &self.inner;
        inner
            .tokens
            .get_or_refresh(Utc::now(), || {
                authenticate(
                    &inner.client,
                    &inner.base_url,
                    &inner.admin_email,
                    &inner.admin_password,
                )
            })
            .await
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, CommerceError> {
        let token = self.access_token().await?;
        let mut request = self
            .inner
            .client
            .request(method.clone(), format!("{}{path}", self.inner.base_url))
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send an admin request and decode a successful JSON body.
    ///
    /// A 401 drops the cached token and the request is sent once more with a
    /// fresh one. Nothing else is retried.
    async fn admin_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, CommerceError> {
        let mut response = self.send_once(&method, path, body.as_ref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::info!(path, "commerce admin token rejected, re-authenticating");
            self.inner.tokens.invalidate().await;
            response = self.send_once(&method, path, body.as_ref()).await?;
        }

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| CommerceError::InvalidResponse(e.to_string()));
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60);
                Err(CommerceError::RateLimited(retry_after))
            }
            StatusCode::NOT_FOUND => Err(CommerceError::NotFound(path.to_owned())),
            StatusCode::UNAUTHORIZED => Err(CommerceError::AuthenticationFailed(
                "admin token rejected after refresh".to_owned(),
            )),
            _ => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(CommerceError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

fn customer_path(customer_id: &CustomerId, suffix: &str) -> String {
    format!(
        "/admin/customers/{}/{suffix}",
        urlencoding::encode(customer_id.as_str())
    )
}

#[async_trait]
impl CommerceBackend for HttpCommerceClient {
    #[instrument(skip(self, customer), fields(has_line = customer.line_user_id.is_some()))]
    async fn create_customer(&self, customer: &NewCustomer) -> Result<CustomerId, CommerceError> {
        let body = serde_json::to_value(customer)
            .map_err(|e| CommerceError::InvalidResponse(e.to_string()))?;
        let created: CreatedCustomer = self
            .admin_request(Method::POST, "/admin/customers", Some(body))
            .await?;

        let id = CustomerId::new(created.id)
            .ok_or_else(|| CommerceError::InvalidResponse("empty customer id".to_owned()))?;
        tracing::info!(customer_id = %id, "commerce customer created");
        Ok(id)
    }

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn wallet(&self, customer_id: &CustomerId) -> Result<Wallet, CommerceError> {
        self.admin_request(Method::GET, &customer_path(customer_id, "wallet"), None)
            .await
    }

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn tier(&self, customer_id: &CustomerId) -> Result<MemberTier, CommerceError> {
        self.admin_request(Method::GET, &customer_path(customer_id, "tier"), None)
            .await
    }

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn orders(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<OrderSummary>, CommerceError> {
        let path = format!("{}?limit={limit}", customer_path(customer_id, "orders"));
        let response: OrdersResponse = self.admin_request(Method::GET, &path, None).await?;
        Ok(response.orders)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_path_escapes_id() {
        let id = CustomerId::new("cus/01 a").unwrap();
        assert_eq!(
            customer_path(&id, "wallet"),
            "/admin/customers/cus%2F01%20a/wallet"
        );
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = HttpCommerceClient::new(&CommerceConfig {
            api_url: "https://commerce.example.com/".to_owned(),
            admin_email: "ops@example.com".to_owned(),
            admin_password: SecretString::from("pw".to_owned()),
        })
        .unwrap();
        assert_eq!(client.inner.base_url, "https://commerce.example.com");
    }

    #[tokio::test]
    #[ignore = "requires a reachable commerce backend"]
    async fn test_live_wallet_lookup() {
        let config = CommerceConfig {
            api_url: std::env::var("COMMERCE_API_URL").unwrap(),
            admin_email: std::env::var("COMMERCE_ADMIN_EMAIL").unwrap(),
            admin_password: SecretString::from(std::env::var("COMMERCE_ADMIN_PASSWORD").unwrap()),
        };
        let client = HttpCommerceClient::new(&config).unwrap();
        let id = CustomerId::new(std::env::var("COMMERCE_TEST_CUSTOMER").unwrap()).unwrap();
        client.wallet(&id).await.unwrap();
    }
}
