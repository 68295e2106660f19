use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::firebase::firestore::Document;
use crate::models::{format_usd, now_rfc3339, Booking, BookingStatus, PaymentStatus, BOOKINGS};
use crate::settings::load_sms_settings;
use crate::stripe::webhook::{construct_event, Event, DEFAULT_TOLERANCE_SECS};
use crate::AppState;

/// POST /api/stripe/webhook
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let event = construct_event(
        &body,
        signature,
        &state.config.stripe.webhook_secret,
        chrono::Utc::now().timestamp(),
        DEFAULT_TOLERANCE_SECS,
    )
    .map_err(|e| {
        tracing::warn!("Rejected Stripe webhook: {e}");
        ApiError::BadRequest(e.to_string())
    })?;

    tracing::info!(event_id = %event.id, kind = %event.kind, "Stripe event received");

    let Some(payment_status) = payment_status_for(&event.kind) else {
        return Ok(Json(json!({ "received": true })));
    };

    let Some(booking) = find_booking(&state, &event).await? else {
        tracing::warn!(event_id = %event.id, "No booking matches Stripe event");
        return Ok(Json(json!({ "received": true })));
    };

    let fields = payment_update(&booking, payment_status, event.payment_intent_id());
    let confirms = fields.contains_key("status");
    state.db.update(BOOKINGS, &booking.id, &fields).await?;

    tracing::info!(
        booking_id = %booking.id,
        payment_status = payment_status.as_str(),
        confirmed = confirms,
        "Booking payment updated"
    );

    if payment_status == PaymentStatus::Paid {
        let message = format!(
            "Payment received: {} paid {} for {}.",
            booking.customer_name,
            format_usd(booking.amount_cents()),
            booking.vehicle_name
        );
        let notify_state = state.clone();
        tokio::spawn(async move {
            match load_sms_settings(&notify_state.db).await {
                Ok(settings) if settings.notify_on_payment => {
                    notify_state.notifier.notify_admin(&settings, &message).await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Could not load SMS settings: {e}"),
            }
        });
    }

    Ok(Json(json!({ "received": true })))
}

/// Payment status an event kind sets, or `None` for events we ignore.
fn payment_status_for(kind: &str) -> Option<PaymentStatus> {
    match kind {
        "payment_intent.succeeded" => Some(PaymentStatus::Paid),
        "payment_intent.payment_failed" => Some(PaymentStatus::Failed),
        "charge.refunded" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

/// Fields to merge into the booking. Only a paid pending booking is confirmed.
fn payment_update(
    booking: &Booking,
    payment_status: PaymentStatus,
    payment_intent_id: Option<&str>,
) -> Document {
    let mut fields = Document::new();
    fields.insert(
        "payment_status".into(),
        Value::String(payment_status.as_str().to_string()),
    );
    if let Some(pi) = payment_intent_id {
        fields.insert("payment_intent_id".into(), Value::String(pi.to_string()));
    }
    if payment_status == PaymentStatus::Paid && booking.status == BookingStatus::Pending {
        fields.insert(
            "status".into(),
            Value::String(BookingStatus::Confirmed.as_str().to_string()),
        );
    }
    fields.insert("updated_at".into(), Value::String(now_rfc3339()));
    fields
}

/// Bookings are tagged with `metadata.booking_id` at checkout. Refund events
/// carry the charge, so fall back to matching the PaymentIntent id.
async fn find_booking(state: &AppState, event: &Event) -> Result<Option<Booking>, ApiError> {
    if let Some(id) = event.booking_id() {
        if let Some(doc) = state.db.get_optional(BOOKINGS, id).await? {
            return Ok(Some(Booking::from_document(&doc)));
        }
    }
    let Some(pi) = event.payment_intent_id() else {
        return Ok(None);
    };
    let docs = state.db.list(BOOKINGS, None, None).await?;
    Ok(docs
        .iter()
        .map(Booking::from_document)
        .find(|b| b.payment_intent_id.as_deref() == Some(pi)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::firebase::fake::FakeFirestore;
    use crate::stripe::webhook::sign;

    fn booking(status: &str, payment_status: &str) -> Value {
        json!({
            "customer_name": "Dana Reyes",
            "vehicle_name": "Civic",
            "total_price": 150.0,
            "status": status,
            "payment_status": payment_status,
        })
    }

    fn event(kind: &str, object: Value) -> Value {
        json!({ "id": "evt_1", "type": kind, "data": { "object": object } })
    }

    fn intent(booking_id: &str) -> Value {
        json!({
            "id": "pi_1",
            "object": "payment_intent",
            "metadata": { "booking_id": booking_id },
        })
    }

    async fn deliver(fake: &FakeFirestore, event: Value) -> StatusCode {
        let payload = serde_json::to_vec(&event).unwrap();
        let header = sign(&payload, "whsec_test", chrono::Utc::now().timestamp());
        let response = crate::app(fake.state())
            .oneshot(
                Request::post("/api/stripe/webhook")
                    .header("stripe-signature", header)
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        response.status()
    }

    async fn stored(fake: &FakeFirestore, id: &str) -> Booking {
        Booking::from_document(&fake.doc(BOOKINGS, id).await.unwrap())
    }

    #[test]
    fn event_kinds_map_to_payment_status() {
        assert_eq!(payment_status_for("payment_intent.succeeded"), Some(PaymentStatus::Paid));
        assert_eq!(
            payment_status_for("payment_intent.payment_failed"),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(payment_status_for("charge.refunded"), Some(PaymentStatus::Refunded));
        assert_eq!(payment_status_for("customer.created"), None);
    }

    #[test]
    fn only_paid_pending_bookings_are_confirmed() {
        let doc = |status: &str| {
            let Value::Object(doc) = booking(status, "unpaid") else {
                unreachable!()
            };
            Booking::from_document(&doc)
        };

        let fields = payment_update(&doc("pending"), PaymentStatus::Paid, Some("pi_1"));
        assert_eq!(fields["status"], "confirmed");
        assert_eq!(fields["payment_status"], "paid");
        assert_eq!(fields["payment_intent_id"], "pi_1");

        for status in ["confirmed", "active", "completed", "cancelled"] {
            let fields = payment_update(&doc(status), PaymentStatus::Paid, None);
            assert!(!fields.contains_key("status"), "{status} must not change");
        }
        let fields = payment_update(&doc("pending"), PaymentStatus::Failed, None);
        assert!(!fields.contains_key("status"));
        assert!(!fields.contains_key("payment_intent_id"));
    }

    #[tokio::test]
    async fn paid_intent_confirms_pending_booking() {
        let fake = FakeFirestore::start().await;
        fake.put(BOOKINGS, "b1", booking("pending", "unpaid")).await;

        let status = deliver(&fake, event("payment_intent.succeeded", intent("b1"))).await;

        assert_eq!(status, StatusCode::OK);
        let b = stored(&fake, "b1").await;
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert_eq!(b.payment_status, PaymentStatus::Paid);
        assert_eq!(b.payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn paid_intent_leaves_cancelled_booking_cancelled() {
        let fake = FakeFirestore::start().await;
        fake.put(BOOKINGS, "b1", booking("cancelled", "unpaid")).await;

        deliver(&fake, event("payment_intent.succeeded", intent("b1"))).await;

        let b = stored(&fake, "b1").await;
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn failed_intent_marks_payment_failed() {
        let fake = FakeFirestore::start().await;
        fake.put(BOOKINGS, "b1", booking("pending", "unpaid")).await;

        deliver(&fake, event("payment_intent.payment_failed", intent("b1"))).await;

        let b = stored(&fake, "b1").await;
        assert_eq!(b.status, BookingStatus::Pending);
        assert_eq!(b.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn refund_finds_booking_by_payment_intent() {
        let fake = FakeFirestore::start().await;
        let mut paid = booking("confirmed", "paid");
        paid["payment_intent_id"] = json!("pi_9");
        fake.put(BOOKINGS, "b1", booking("pending", "unpaid")).await;
        fake.put(BOOKINGS, "b2", paid).await;

        let charge = json!({ "id": "ch_1", "object": "charge", "payment_intent": "pi_9" });
        let status = deliver(&fake, event("charge.refunded", charge)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored(&fake, "b2").await.payment_status, PaymentStatus::Refunded);
        assert_eq!(stored(&fake, "b2").await.status, BookingStatus::Confirmed);
        assert_eq!(stored(&fake, "b1").await.payment_status, PaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn ignored_and_unmatched_events_are_acknowledged() {
        let fake = FakeFirestore::start().await;
        fake.put(BOOKINGS, "b1", booking("pending", "unpaid")).await;

        let status = deliver(&fake, event("customer.created", json!({ "id": "cus_1" }))).await;
        assert_eq!(status, StatusCode::OK);
        let status = deliver(&fake, event("payment_intent.succeeded", intent("missing"))).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(stored(&fake, "b1").await.status, BookingStatus::Pending);
    }
}
