//! Cache invalidation.
//!
//! ```text
//! POST /api/revalidate  - x-revalidate-secret header, body {customer_id?}
//! ```
//!
//! Called by the commerce backend when a customer's tier or orders change.
//! Without a `customer_id` every cached member view is dropped.

use axum::{extract::State, http::HeaderMap};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use hinata_core::CustomerId;

use crate::error::{AppError, Result};
use crate::extract::Json;
use crate::state::AppState;

/// Header carrying the shared secret.
pub const REVALIDATE_SECRET_HEADER: &str = "x-revalidate-secret";

#[derive(Debug, Default, Deserialize)]
pub struct RevalidateRequest {
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevalidateResponse {
    pub success: bool,
    /// The customer whose views were dropped, or `"all"`.
    pub revalidated: String,
}

/// Compare secrets by digest so the comparison time does not depend on how
/// many leading bytes match.
fn secret_matches(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

/// POST /api/revalidate
///
/// # Errors
///
/// 403 for a missing or wrong secret, 400 for an empty customer ID or a
/// malformed body. A request without a JSON body drops every view.
pub async fn revalidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RevalidateRequest>>,
) -> Result<Json<RevalidateResponse>> {
    let provided = headers
        .get(REVALIDATE_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secret_matches(provided, state.config().revalidate_secret.expose_secret()) {
        tracing::warn!("revalidate called with an invalid secret");
        return Err(AppError::Forbidden("Invalid revalidate secret".to_owned()));
    }

    let Json(req) = body.unwrap_or_default();
    let revalidated = match req.customer_id {
        Some(raw) => {
            let customer_id = CustomerId::new(raw)
                .ok_or_else(|| AppError::BadRequest("customer_id must not be empty".to_owned()))?;
            state.members().invalidate(&customer_id).await;
            customer_id.to_string()
        }
        None => {
            state.members().invalidate_all();
            "all".to_owned()
        }
    };

    tracing::info!(revalidated = %revalidated, "member caches revalidated");
    Ok(Json(RevalidateResponse {
        success: true,
        revalidated,
    }))
}
