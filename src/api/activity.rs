use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::require_admin;
use crate::error::ApiError;
use crate::firebase::firestore::Document;
use crate::models::ACTIVITY;
use crate::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

/// GET /api/admin/activity: newest entries first.
pub async fn list_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    require_admin(&state, &headers).await?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let entries = state
        .db
        .list(ACTIVITY, Some("timestamp desc"), Some(limit))
        .await?;
    Ok(Json(entries))
}
