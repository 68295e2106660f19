use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::require_admin;
use crate::error::ApiError;
use crate::models::format_usd;
use crate::stripe::{PaymentsReport, Transfer};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentsQuery {
    /// Bypass the short-lived payments cache.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct TransfersResponse {
    pub account: String,
    pub transfers: Vec<Transfer>,
    pub total: i64,
    pub total_formatted: String,
}

/// GET /api/admin/stripe/payments
pub async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PaymentsQuery>,
) -> Result<Json<PaymentsReport>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.stripe.payments_report(query.refresh).await?))
}

/// GET /api/admin/stripe/transfers
pub async fn list_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TransfersResponse>, ApiError> {
    require_admin(&state, &headers).await?;

    let transfers = state.stripe.list_transfers().await?;
    let total: i64 = transfers
        .iter()
        .filter(|t| !t.reversed)
        .map(|t| t.amount)
        .sum();

    Ok(Json(TransfersResponse {
        account: state.stripe.connected_account_id().to_string(),
        transfers,
        total,
        total_formatted: format_usd(total),
    }))
}
