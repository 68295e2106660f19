use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

/// Stripe's default replay window.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// An event delivered to the webhook endpoint.
#[derive(Debug, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

impl Event {
    /// `metadata.booking_id` of the event object, if any.
    pub fn booking_id(&self) -> Option<&str> {
        self.data.object["metadata"]["booking_id"]
            .as_str()
            .filter(|s| !s.is_empty())
    }

    /// PaymentIntent id the event refers to.
    pub fn payment_intent_id(&self) -> Option<&str> {
        let obj = &self.data.object;
        match obj["object"].as_str() {
            Some("payment_intent") => obj["id"].as_str(),
            _ => obj["payment_intent"].as_str(),
        }
    }
}

/// Verify the `Stripe-Signature` header against the raw body and parse the event.
pub fn construct_event(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<Event, WebhookError> {
    verify_signature(payload, signature_header, secret, now, tolerance_secs)?;
    serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))
}

pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::NotConfigured);
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in signature_header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }

    let matched = signatures.iter().any(|sig| {
        signer(secret, timestamp, payload).verify_slice(sig).is_ok()
    });
    if !matched {
        return Err(WebhookError::SignatureMismatch);
    }

    if (now - timestamp).abs() > tolerance_secs {
        return Err(WebhookError::Expired);
    }

    Ok(())
}

fn signer(secret: &str, timestamp: i64, payload: &[u8]) -> Hmac<Sha256> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Build a `Stripe-Signature` header value for `payload`, as Stripe does.
#[cfg(test)]
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let sig = signer(secret, timestamp, payload).finalize().into_bytes();
    format!("t={timestamp},v1={}", hex::encode(sig))
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WebhookError {
    #[error("Webhook secret not configured")]
    NotConfigured,
    #[error("Malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("No signature matches the payload")]
    SignatureMismatch,
    #[error("Timestamp outside the tolerance window")]
    Expired,
    #[error("Invalid event payload: {0}")]
    Payload(String),
}
