//! Stripe REST client and the payment records the admin dashboard shows.

pub mod webhook;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::StripeConfig;
use crate::models::format_usd;

const API_BASE: &str = "https://api.stripe.com/v1";
const LIST_LIMIT: &str = "100";

pub struct StripeClient {
    client: reqwest::Client,
    secret_key: String,
    connected_account_id: String,
    currency: String,
    payments_cache: PaymentsCache,
}

/// Charge as returned by `GET /v1/charges`, reduced to what we read.
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub amount_refunded: i64,
    pub currency: String,
    pub status: String,
    pub created: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub on_behalf_of: Option<String>,
    #[serde(default)]
    pub transfer_data: Option<TransferData>,
    #[serde(default)]
    pub billing_details: Option<BillingDetails>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferData {
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Transfer {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub created: i64,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub source_transaction: Option<String>,
    #[serde(default)]
    pub reversed: bool,
}

#[derive(Deserialize)]
struct List<T> {
    data: Vec<T>,
}

/// Flat payment row for the admin payments table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Payment {
    pub id: String,
    pub amount: i64,
    pub amount_formatted: String,
    pub amount_refunded: i64,
    pub currency: String,
    pub status: String,
    pub created: i64,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub description: Option<String>,
    pub booking_id: Option<String>,
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentsSummary {
    pub count: usize,
    pub succeeded_count: usize,
    pub total_volume: i64,
    pub total_volume_formatted: String,
    pub refunded_amount: i64,
    pub refunded_amount_formatted: String,
    pub net_amount_formatted: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentsReport {
    pub payments: Vec<Payment>,
    pub summary: PaymentsSummary,
    pub cached: bool,
}

/// A PaymentIntent created for a booking checkout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl StripeClient {
    pub fn new(client: reqwest::Client, config: &StripeConfig) -> Self {
        Self {
            client,
            secret_key: config.secret_key.clone(),
            connected_account_id: config.connected_account_id.clone(),
            currency: config.currency.clone(),
            payments_cache: PaymentsCache::new(Duration::from_secs(config.payments_cache_secs)),
        }
    }

    pub fn connected_account_id(&self) -> &str {
        &self.connected_account_id
    }

    /// Payments that belong to this business, with totals. Served from a
    /// short-lived cache unless `refresh` is set.
    pub async fn payments_report(&self, refresh: bool) -> Result<PaymentsReport, StripeError> {
        if !refresh {
            if let Some(payments) = self.payments_cache.get().await {
                let summary = summarize(&payments);
                return Ok(PaymentsReport {
                    payments: payments.to_vec(),
                    summary,
                    cached: true,
                });
            }
        }

        let charges = self.list_charges().await?;
        let payments: Vec<Payment> = tenant_charges(&charges, &self.connected_account_id)
            .map(Payment::from)
            .collect();
        tracing::info!(
            charges = charges.len(),
            tenant_payments = payments.len(),
            "Fetched Stripe payments"
        );

        let payments = self.payments_cache.put(payments).await;
        Ok(PaymentsReport {
            summary: summarize(&payments),
            payments: payments.to_vec(),
            cached: false,
        })
    }

    pub async fn list_charges(&self) -> Result<Vec<Charge>, StripeError> {
        let list: List<Charge> = self
            .get("charges", &[("limit", LIST_LIMIT)])
            .await?;
        Ok(list.data)
    }

    /// Transfers paid out to the connected account.
    pub async fn list_transfers(&self) -> Result<Vec<Transfer>, StripeError> {
        let list: List<Transfer> = self
            .get(
                "transfers",
                &[
                    ("limit", LIST_LIMIT),
                    ("destination", self.connected_account_id.as_str()),
                ],
            )
            .await?;
        Ok(list.data)
    }

    /// Create a PaymentIntent whose funds are routed to the connected account.
    pub async fn create_payment_intent(
        &self,
        amount_cents: i64,
        booking_id: &str,
        receipt_email: Option<&str>,
        description: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let amount = amount_cents.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("amount", amount.as_str()),
            ("currency", self.currency.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[booking_id]", booking_id),
            ("description", description),
        ];
        if !self.connected_account_id.is_empty() {
            params.push(("transfer_data[destination]", self.connected_account_id.as_str()));
        }
        if let Some(email) = receipt_email.filter(|e| !e.is_empty()) {
            params.push(("receipt_email", email));
        }

        let resp = self
            .client
            .post(format!("{API_BASE}/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("booking-{booking_id}-{amount_cents}"))
            .form(&params)
            .send()
            .await
            .map_err(|e| StripeError::Request(e.to_string()))?;

        let intent: PaymentIntent = read_json(resp).await?;
        tracing::info!(
            payment_intent = %intent.id,
            booking_id,
            amount_cents,
            "Created PaymentIntent"
        );
        self.payments_cache.invalidate().await;
        Ok(intent)
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, StripeError> {
        let resp = self
            .client
            .get(format!("{API_BASE}/{resource}"))
            .bearer_auth(&self.secret_key)
            .query(query)
            .send()
            .await
            .map_err(|e| StripeError::Request(e.to_string()))?;
        read_json(resp).await
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> Result<T, StripeError> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or_default();
        let message = body["error"]["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| body.to_string());
        return Err(StripeError::Api(format!("{status}: {message}")));
    }
    resp.json()
        .await
        .map_err(|e| StripeError::Parse(e.to_string()))
}

/// Charges routed to `account`, either as a destination charge or on its behalf.
pub fn tenant_charges<'a>(
    charges: &'a [Charge],
    account: &'a str,
) -> impl Iterator<Item = &'a Charge> + 'a {
    charges.iter().filter(move |c| {
        let destination = c
            .transfer_data
            .as_ref()
            .and_then(|t| t.destination.as_deref());
        destination == Some(account) || c.on_behalf_of.as_deref() == Some(account)
    })
}

impl From<&Charge> for Payment {
    fn from(c: &Charge) -> Self {
        let billing = c.billing_details.as_ref();
        let status = if c.refunded {
            "refunded".to_string()
        } else {
            c.status.clone()
        };
        Self {
            id: c.id.clone(),
            amount: c.amount,
            amount_formatted: format_usd(c.amount),
            amount_refunded: c.amount_refunded,
            currency: c.currency.clone(),
            status,
            created: c.created,
            customer_name: billing.and_then(|b| b.name.clone()),
            customer_email: c
                .receipt_email
                .clone()
                .or_else(|| billing.and_then(|b| b.email.clone())),
            description: c.description.clone(),
            booking_id: c
                .metadata
                .get("booking_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            payment_intent: c.payment_intent.clone(),
        }
    }
}

pub fn summarize(payments: &[Payment]) -> PaymentsSummary {
    let succeeded: Vec<&Payment> = payments
        .iter()
        .filter(|p| p.status == "succeeded" || p.status == "refunded")
        .collect();
    let total_volume: i64 = succeeded.iter().map(|p| p.amount).sum();
    let refunded_amount: i64 = succeeded.iter().map(|p| p.amount_refunded).sum();

    PaymentsSummary {
        count: payments.len(),
        succeeded_count: payments.iter().filter(|p| p.status == "succeeded").count(),
        total_volume,
        total_volume_formatted: format_usd(total_volume),
        refunded_amount,
        refunded_amount_formatted: format_usd(refunded_amount),
        net_amount_formatted: format_usd(total_volume - refunded_amount),
    }
}

/// Single-entry cache for the payments list.
struct PaymentsCache {
    ttl: Duration,
    entry: Mutex<Option<(Instant, Arc<[Payment]>)>>,
}

impl PaymentsCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    async fn get(&self) -> Option<Arc<[Payment]>> {
        let entry = self.entry.lock().await;
        match *entry {
            Some((stored, ref payments)) if stored.elapsed() < self.ttl => {
                Some(Arc::clone(payments))
            }
            _ => None,
        }
    }

    async fn put(&self, payments: Vec<Payment>) -> Arc<[Payment]> {
        let payments: Arc<[Payment]> = payments.into();
        *self.entry.lock().await = Some((Instant::now(), Arc::clone(&payments)));
        payments
    }

    async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Stripe API error: {0}")]
    Api(String),
    #[error("Unexpected Stripe response: {0}")]
    Parse(String),
}
