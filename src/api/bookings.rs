use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{log_activity, require_admin};
use crate::error::ApiError;
use crate::firebase::firestore::Document;
use crate::models::{now_rfc3339, Booking, BookingStatus, BOOKINGS};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BookingFilter {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: String,
}

/// GET /api/admin/bookings: newest first, optionally filtered by `?status=`.
pub async fn list_bookings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<BookingFilter>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    require_admin(&state, &headers).await?;

    let wanted = match filter.status.as_deref().filter(|s| !s.is_empty() && *s != "all") {
        Some(s) => Some(
            BookingStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status {s:?}")))?,
        ),
        None => None,
    };

    let docs = state.db.list(BOOKINGS, None, None).await?;
    let mut bookings: Vec<Booking> = docs
        .iter()
        .map(Booking::from_document)
        .filter(|b| wanted.map_or(true, |s| s == b.status))
        .collect();
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(bookings))
}

/// PATCH /api/admin/bookings/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Booking>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let next = BookingStatus::parse(&change.status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown status {:?}", change.status)))?;

    let current = Booking::from_document(&state.db.get(BOOKINGS, &id).await?);
    check_transition(current.status, next)?;

    let mut fields = Document::new();
    fields.insert("status".into(), Value::String(next.as_str().to_string()));
    fields.insert("updated_at".into(), Value::String(now_rfc3339()));
    let updated = Booking::from_document(&state.db.update(BOOKINGS, &id, &fields).await?);

    tracing::info!(
        booking_id = %id,
        from = current.status.as_str(),
        to = next.as_str(),
        "Booking status changed"
    );
    log_activity(
        &state,
        &admin,
        "booking_status",
        &id,
        json!({
            "from": current.status.as_str(),
            "to": next.as_str(),
            "customer": updated.customer_name,
        }),
    )
    .await;

    Ok(Json(updated))
}

fn check_transition(current: BookingStatus, next: BookingStatus) -> Result<(), ApiError> {
    if current.can_transition_to(next) {
        return Ok(());
    }
    Err(ApiError::Conflict(format!(
        "cannot move booking from {} to {}",
        current.as_str(),
        next.as_str()
    )))
}

/// DELETE /api/admin/bookings/{id}
pub async fn delete_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let existing = Booking::from_document(&state.db.get(BOOKINGS, &id).await?);
    state.db.delete(BOOKINGS, &id).await?;

    log_activity(
        &state,
        &admin,
        "booking_deleted",
        &id,
        json!({ "customer": existing.customer_name, "status": existing.status.as_str() }),
    )
    .await;

    Ok(Json(json!({ "deleted": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn allowed_transition_passes() {
        assert!(check_transition(BookingStatus::Pending, BookingStatus::Confirmed).is_ok());
        assert!(check_transition(BookingStatus::Active, BookingStatus::Completed).is_ok());
    }

    #[test]
    fn illegal_transition_is_a_conflict() {
        let err = check_transition(BookingStatus::Completed, BookingStatus::Pending).unwrap_err();
        assert!(err.to_string().contains("from completed to pending"), "{err}");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let err = check_transition(BookingStatus::Cancelled, BookingStatus::Active).unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
