//! Unauthenticated routes used by the booking site.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::vehicles::load_fleet;
use crate::error::ApiError;
use crate::firebase::firestore::Document;
use crate::models::{
    format_usd, now_rfc3339, rental_days, Booking, BookingStatus, PaymentStatus, Vehicle,
    BOOKINGS, VEHICLES,
};
use crate::settings::load_sms_settings;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: String,
    pub vehicle_id: String,
    pub pickup_date: String,
    pub return_date: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub booking_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub amount_formatted: String,
}

/// GET /api/vehicles
pub async fn list_available_vehicles(
    State(state): State<AppState>,
) -> Result<Json<Vec<Vehicle>>, ApiError> {
    let fleet = load_fleet(&state).await?;
    Ok(Json(fleet.into_iter().filter(|v| v.available).collect()))
}

impl BookingRequest {
    fn validate(&self) -> Result<i64, String> {
        if self.customer_name.trim().is_empty() {
            return Err("customer_name is required".into());
        }
        let email = self.customer_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err("a valid customer_email is required".into());
        }
        if self.vehicle_id.trim().is_empty() {
            return Err("vehicle_id is required".into());
        }
        rental_days(&self.pickup_date, &self.return_date)
    }
}

/// POST /api/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let days = req.validate().map_err(ApiError::BadRequest)?;

    let vehicle = Vehicle::from_document(&state.db.get(VEHICLES, req.vehicle_id.trim()).await?);
    if !vehicle.available {
        return Err(ApiError::Conflict(format!(
            "{} is not available",
            vehicle.display_name()
        )));
    }

    let total = vehicle.price_per_day * days as f64;
    let now = now_rfc3339();
    let mut fields = Document::new();
    for (key, value) in [
        ("customer_name", req.customer_name.trim()),
        ("customer_email", req.customer_email.trim()),
        ("customer_phone", req.customer_phone.trim()),
        ("vehicle_id", vehicle.id.as_str()),
        ("pickup_date", req.pickup_date.trim()),
        ("return_date", req.return_date.trim()),
        ("status", BookingStatus::Pending.as_str()),
        ("payment_status", PaymentStatus::Unpaid.as_str()),
    ] {
        fields.insert(key.into(), Value::String(value.to_string()));
    }
    fields.insert("vehicle_name".into(), Value::String(vehicle.display_name()));
    fields.insert("rental_days".into(), Value::from(days));
    fields.insert("total_price".into(), Value::from(total));
    if let Some(notes) = req.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        fields.insert("notes".into(), Value::String(notes.to_string()));
    }
    fields.insert("created_at".into(), Value::String(now.clone()));
    fields.insert("updated_at".into(), Value::String(now));

    let booking = Booking::from_document(&state.db.create(BOOKINGS, &fields).await?);
    tracing::info!(
        booking_id = %booking.id,
        vehicle = %booking.vehicle_name,
        days,
        "Booking created"
    );

    let notify_state = state.clone();
    let summary = format!(
        "New booking: {} booked {} from {} to {} ({}).",
        booking.customer_name,
        booking.vehicle_name,
        booking.pickup_date,
        booking.return_date,
        format_usd(booking.amount_cents())
    );
    tokio::spawn(async move {
        match load_sms_settings(&notify_state.db).await {
            Ok(settings) if settings.notify_on_booking => {
                notify_state.notifier.notify_admin(&settings, &summary).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not load SMS settings: {e}"),
        }
    });

    Ok((StatusCode::CREATED, Json(booking)))
}

/// POST /api/checkout
pub async fn checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let booking_id = req.booking_id.trim();
    if booking_id.is_empty() {
        return Err(ApiError::BadRequest("booking_id is required".to_string()));
    }

    let booking = Booking::from_document(&state.db.get(BOOKINGS, booking_id).await?);
    if booking.payment_status == PaymentStatus::Paid {
        return Err(ApiError::Conflict("booking is already paid".to_string()));
    }
    if booking.status == BookingStatus::Cancelled {
        return Err(ApiError::Conflict("booking was cancelled".to_string()));
    }
    let amount = booking.amount_cents();
    if amount <= 0 {
        return Err(ApiError::BadRequest("booking has no amount due".to_string()));
    }

    let description = format!(
        "{} ({} to {})",
        booking.vehicle_name, booking.pickup_date, booking.return_date
    );
    let intent = state
        .stripe
        .create_payment_intent(
            amount,
            &booking.id,
            Some(booking.customer_email.as_str()),
            &description,
        )
        .await?;

    let mut fields = Document::new();
    fields.insert("payment_intent_id".into(), Value::String(intent.id.clone()));
    fields.insert("updated_at".into(), Value::String(now_rfc3339()));
    state.db.update(BOOKINGS, &booking.id, &fields).await?;

    let client_secret = intent.client_secret.ok_or_else(|| {
        ApiError::Internal("Stripe returned no client_secret".to_string())
    })?;

    Ok(Json(CheckoutResponse {
        client_secret,
        payment_intent_id: intent.id,
        amount,
        amount_formatted: format_usd(amount),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::firebase::fake::FakeFirestore;

    async fn post_booking(fake: &FakeFirestore, vehicle_id: &str) -> (StatusCode, Value) {
        let body = json!({
            "customer_name": "Dana Reyes",
            "customer_email": "dana@example.com",
            "vehicle_id": vehicle_id,
            "pickup_date": "2026-07-01",
            "return_date": "2026-07-04",
        });
        let resp = crate::app(fake.state())
            .oneshot(
                Request::post("/api/bookings")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn request() -> BookingRequest {
        BookingRequest {
            customer_name: "Dana Reyes".into(),
            customer_email: "dana@example.com".into(),
            customer_phone: "+15551230000".into(),
            vehicle_id: "civic".into(),
            pickup_date: "2026-07-01".into(),
            return_date: "2026-07-04".into(),
            notes: None,
        }
    }

    #[test]
    fn valid_request_yields_rental_days() {
        assert_eq!(request().validate(), Ok(3));
    }

    #[test]
    fn missing_customer_fields_are_rejected() {
        let mut r = request();
        r.customer_name = "  ".into();
        assert!(r.validate().unwrap_err().contains("customer_name"));

        let mut r = request();
        r.customer_email = "not-an-email".into();
        assert!(r.validate().unwrap_err().contains("customer_email"));
    }

    #[test]
    fn return_before_pickup_is_rejected() {
        let mut r = request();
        r.return_date = "2026-06-30".into();
        assert!(r.validate().is_err());
    }

    #[tokio::test]
    async fn booking_is_priced_and_stored_pending() {
        let fake = FakeFirestore::start().await;
        let civic = json!({ "name": "Civic", "price_per_day": 50, "available": true });
        fake.put(VEHICLES, "civic", civic).await;

        let (status, body) = post_booking(&fake, "civic").await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["total_price"], 150.0);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["payment_status"], "unpaid");
        let stored = fake.list(BOOKINGS).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["rental_days"], 3);
    }

    #[tokio::test]
    async fn unavailable_vehicle_is_a_conflict() {
        let fake = FakeFirestore::start().await;
        let civic = json!({ "name": "Civic", "price_per_day": 50, "available": false });
        fake.put(VEHICLES, "civic", civic).await;

        let (status, _) = post_booking(&fake, "civic").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert!(fake.list(BOOKINGS).await.is_empty());
    }

    #[tokio::test]
    async fn vehicle_id_outside_the_fleet_is_rejected() {
        let fake = FakeFirestore::start().await;
        let settings = json!({ "available": true, "price": 1 });
        fake.put("admin_sms_settings", "config", settings).await;

        let (status, body) = post_booking(&fake, "../admin_sms_settings/config").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid document id"));
        assert!(fake.requests().await.is_empty());
    }
}
