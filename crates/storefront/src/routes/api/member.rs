//! Member routes. All require a session.
//!
//! ```text
//! GET /api/member/profile      - Identity summary
//! GET /api/member/wallet       - Balance and points (linked customer required)
//! GET /api/member/tier         - Membership tier (linked customer required)
//! GET /api/member/orders       - Recent orders, ?limit= (linked customer required)
//! GET /api/member/preferences  - Contact and last shipping details
//! ```

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::commerce::{MemberTier, OrderSummary, Wallet};
use crate::error::Result;
use crate::middleware::RequireSession;
use crate::services::member::{MemberPreferences, MemberProfile};
use crate::state::AppState;

/// `{success: true, data: ...}`.
#[derive(Debug, Serialize)]
pub struct MemberResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> MemberResponse<T> {
    const fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// GET /api/member/profile
///
/// # Errors
///
/// 401 without a session.
pub async fn profile(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
) -> Result<Json<MemberResponse<MemberProfile>>> {
    Ok(MemberResponse::ok(state.members().profile(&session).await?))
}

/// GET /api/member/wallet
///
/// # Errors
///
/// 401 without a session, 403 without a linked customer.
pub async fn wallet(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
) -> Result<Json<MemberResponse<Wallet>>> {
    Ok(MemberResponse::ok(state.members().wallet(&session).await?))
}

/// GET /api/member/tier
///
/// # Errors
///
/// 401 without a session, 403 without a linked customer.
pub async fn tier(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
) -> Result<Json<MemberResponse<MemberTier>>> {
    Ok(MemberResponse::ok(state.members().tier(&session).await?))
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub limit: Option<u32>,
}

/// GET /api/member/orders
///
/// # Errors
///
/// 401 without a session, 403 without a linked customer.
pub async fn orders(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<MemberResponse<Vec<OrderSummary>>>> {
    Ok(MemberResponse::ok(
        state.members().orders(&session, query.limit).await?,
    ))
}

/// GET /api/member/preferences
///
/// # Errors
///
/// 401 without a session.
pub async fn preferences(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
) -> Result<Json<MemberResponse<MemberPreferences>>> {
    Ok(MemberResponse::ok(state.members().preferences(&session).await?))
}
