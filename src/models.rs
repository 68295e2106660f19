//! Records stored in Firestore and the coercions applied when reading them.
//!
//! Documents are written by more than one client over time, so numbers and
//! flags show up as strings, numbers or booleans. Everything read here is
//! normalised before it leaves the API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::firebase::firestore::Document;

pub const VEHICLES: &str = "vehicles";
pub const BOOKINGS: &str = "bookings";
pub const ACTIVITY: &str = "admin_activity";
pub const SMS_SETTINGS: &str = "admin_sms_settings";
pub const VOICE_SETTINGS: &str = "admin_voice_settings";
/// Id of the single document in each settings collection.
pub const SETTINGS_DOC: &str = "config";

/// Read a flag stored as a boolean, a string or a number.
pub fn coerce_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
        _ => None,
    }
}

pub fn coerce_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(doc: &Document, key: &str) -> String {
    match doc.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn optional_string(doc: &Document, key: &str) -> Option<String> {
    Some(string_field(doc, key)).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    pub year: Option<i64>,
    pub price_per_day: f64,
    #[serde(default)]
    pub category: String,
    pub seats: Option<i64>,
    #[serde(default)]
    pub transmission: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub available: bool,
}

impl Vehicle {
    pub fn from_document(doc: &Document) -> Self {
        let features = match doc.get("features") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        Self {
            id: string_field(doc, "id"),
            name: string_field(doc, "name"),
            make: string_field(doc, "make"),
            model: string_field(doc, "model"),
            year: coerce_i64(doc.get("year")),
            price_per_day: coerce_f64(doc.get("price_per_day").or_else(|| doc.get("price")))
                .unwrap_or(0.0),
            category: string_field(doc, "category"),
            seats: coerce_i64(doc.get("seats")),
            transmission: string_field(doc, "transmission"),
            image_url: string_field(doc, "image_url"),
            description: string_field(doc, "description"),
            features,
            // Older documents have no flag at all and were always listed.
            available: coerce_bool(doc.get("available")).unwrap_or(true),
        }
    }

    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        let parts: Vec<String> = [
            self.year.map(|y| y.to_string()),
            Some(self.make.clone()),
            Some(self.model.clone()),
        ]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();
        parts.join(" ")
    }
}

/// Vehicle fields as sent by the admin form. Numeric fields arrive as
/// strings from text inputs.
#[derive(Debug, Deserialize, Default)]
pub struct VehicleInput {
    pub name: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<Value>,
    #[serde(alias = "price")]
    pub price_per_day: Option<Value>,
    pub category: Option<String>,
    pub seats: Option<Value>,
    pub transmission: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub features: Option<Vec<String>>,
    pub available: Option<Value>,
}

impl VehicleInput {
    /// Fields to write. With `require_all`, `name` and `price_per_day` must be
    /// present (creation); otherwise only supplied fields are returned.
    pub fn into_fields(self, require_all: bool) -> Result<Document, String> {
        let mut out = Document::new();

        let name = self.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        match name {
            Some(n) => {
                out.insert("name".into(), Value::String(n));
            }
            None if require_all => return Err("name is required".into()),
            None => {}
        }

        match self.price_per_day {
            Some(raw) => {
                let price = coerce_f64(Some(&raw))
                    .filter(|p| p.is_finite() && *p >= 0.0)
                    .ok_or_else(|| format!("price must be a non-negative number, got {raw}"))?;
                out.insert("price_per_day".into(), Value::from(price));
            }
            None if require_all => return Err("price is required".into()),
            None => {}
        }

        if let Some(raw) = self.year {
            let year = coerce_i64(Some(&raw))
                .ok_or_else(|| format!("year must be a number, got {raw}"))?;
            out.insert("year".into(), Value::from(year));
        }
        if let Some(raw) = self.seats {
            let seats = coerce_i64(Some(&raw))
                .ok_or_else(|| format!("seats must be a number, got {raw}"))?;
            out.insert("seats".into(), Value::from(seats));
        }
        if let Some(raw) = self.available {
            let available = coerce_bool(Some(&raw))
                .ok_or_else(|| format!("available must be a boolean, got {raw}"))?;
            out.insert("available".into(), Value::Bool(available));
        } else if require_all {
            out.insert("available".into(), Value::Bool(true));
        }

        for (key, value) in [
            ("make", self.make),
            ("model", self.model),
            ("category", self.category),
            ("transmission", self.transmission),
            ("image_url", self.image_url),
            ("description", self.description),
        ] {
            if let Some(v) = value {
                out.insert(key.into(), Value::String(v.trim().to_string()));
            }
        }
        if let Some(features) = self.features {
            out.insert(
                "features".into(),
                Value::Array(features.into_iter().map(Value::String).collect()),
            );
        }

        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "active" => Some(BookingStatus::Active),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Active)
                | (Confirmed, Cancelled)
                | (Active, Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Booking {
    pub id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub pickup_date: String,
    pub return_date: String,
    pub total_price: f64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
}

impl Booking {
    pub fn from_document(doc: &Document) -> Self {
        let payment_status = match string_field(doc, "payment_status").as_str() {
            "paid" | "succeeded" => PaymentStatus::Paid,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Unpaid,
        };

        Self {
            id: string_field(doc, "id"),
            customer_name: string_field(doc, "customer_name"),
            customer_email: string_field(doc, "customer_email"),
            customer_phone: string_field(doc, "customer_phone"),
            vehicle_id: string_field(doc, "vehicle_id"),
            vehicle_name: string_field(doc, "vehicle_name"),
            pickup_date: string_field(doc, "pickup_date"),
            return_date: string_field(doc, "return_date"),
            total_price: coerce_f64(doc.get("total_price")).unwrap_or(0.0),
            status: BookingStatus::parse(&string_field(doc, "status"))
                .unwrap_or(BookingStatus::Pending),
            payment_status,
            payment_intent_id: optional_string(doc, "payment_intent_id"),
            notes: optional_string(doc, "notes"),
            created_at: optional_string(doc, "created_at"),
        }
    }

    /// Amount to charge, in the currency's minor unit.
    pub fn amount_cents(&self) -> i64 {
        (self.total_price * 100.0).round() as i64
    }
}

/// Number of billable days between pickup and return (`YYYY-MM-DD`).
/// Same-day rentals bill one day.
pub fn rental_days(pickup: &str, ret: &str) -> Result<i64, String> {
    let start = NaiveDate::parse_from_str(pickup.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid pickup_date {pickup:?}, expected YYYY-MM-DD"))?;
    let end = NaiveDate::parse_from_str(ret.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid return_date {ret:?}, expected YYYY-MM-DD"))?;
    let days = (end - start).num_days();
    if days < 0 {
        return Err("return_date is before pickup_date".into());
    }
    Ok(days.max(1))
}

/// Format an amount in cents as US currency, e.g. `$1,234.56`.
pub fn format_usd(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let dollars = (abs / 100).to_string();
    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, ch) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}${grouped}.{:02}", abs % 100)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn available_is_read_from_all_stored_shapes() {
        for (stored, expected) in [
            (json!(true), true),
            (json!(false), false),
            (json!("true"), true),
            (json!("false"), false),
            (json!("Yes"), true),
            (json!(1), true),
            (json!(0), false),
        ] {
            let v = Vehicle::from_document(&doc(json!({
                "id": "v1",
                "name": "Civic",
                "available": stored.clone(),
            })));
            assert_eq!(v.available, expected, "stored as {stored}");
        }
    }

    #[test]
    fn missing_or_unreadable_flag_means_available() {
        let v = Vehicle::from_document(&doc(json!({ "id": "v1", "name": "Civic" })));
        assert!(v.available);
        let v = Vehicle::from_document(&doc(json!({ "id": "v1", "available": "maybe" })));
        assert!(v.available);
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let v = Vehicle::from_document(&doc(json!({
            "id": "v2",
            "name": "Wrangler",
            "year": "2021",
            "price": "$1,089.50",
            "seats": 5.0,
            "features": "4x4, Roof rack"
        })));
        assert_eq!(v.year, Some(2021));
        assert_eq!(v.price_per_day, 1089.5);
        assert_eq!(v.seats, Some(5));
        assert_eq!(v.features, vec!["4x4", "Roof rack"]);
    }

    #[test]
    fn display_name_falls_back_to_year_make_model() {
        let v = Vehicle::from_document(&doc(json!({
            "id": "v",
            "make": "Toyota",
            "model": "RAV4",
            "year": 2023,
        })));
        assert_eq!(v.display_name(), "2023 Toyota RAV4");
    }

    #[test]
    fn vehicle_input_requires_name_and_price_on_create() {
        let input = VehicleInput {
            price_per_day: Some(json!("45")),
            ..Default::default()
        };
        assert_eq!(input.into_fields(true).unwrap_err(), "name is required");

        let input = VehicleInput {
            name: Some("Civic".into()),
            ..Default::default()
        };
        assert_eq!(input.into_fields(true).unwrap_err(), "price is required");
    }

    #[test]
    fn vehicle_input_casts_strings_and_defaults_availability() {
        let input: VehicleInput = serde_json::from_value(json!({
            "name": " Civic ",
            "price": "45.5",
            "year": "2020",
            "seats": "5"
        }))
        .unwrap();
        let fields = input.into_fields(true).unwrap();
        assert_eq!(fields["name"], "Civic");
        assert_eq!(fields["price_per_day"], 45.5);
        assert_eq!(fields["year"], 2020);
        assert_eq!(fields["seats"], 5);
        assert_eq!(fields["available"], true);
    }

    #[test]
    fn partial_update_only_writes_supplied_fields() {
        let input: VehicleInput = serde_json::from_value(json!({ "available": "false" })).unwrap();
        let fields = input.into_fields(false).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["available"], false);
    }

    #[test]
    fn bad_price_is_rejected() {
        let input: VehicleInput =
            serde_json::from_value(json!({ "name": "X", "price": "cheap" })).unwrap();
        assert!(input.into_fields(true).is_err());
        let input: VehicleInput =
            serde_json::from_value(json!({ "name": "X", "price": -3 })).unwrap();
        assert!(input.into_fields(true).is_err());
    }

    #[test]
    fn booking_transitions_follow_lifecycle() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Active));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn booking_status_accepts_both_spellings() {
        assert_eq!(BookingStatus::parse("Canceled"), Some(BookingStatus::Cancelled));
        assert_eq!(BookingStatus::parse("CONFIRMED"), Some(BookingStatus::Confirmed));
        assert_eq!(BookingStatus::parse("lost"), None);
    }

    #[test]
    fn booking_reads_loose_document() {
        let b = Booking::from_document(&doc(json!({
            "id": "b1",
            "customer_name": "Dana",
            "total_price": "240.10",
            "status": "confirmed",
            "payment_status": "succeeded"
        })));
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert_eq!(b.payment_status, PaymentStatus::Paid);
        assert_eq!(b.amount_cents(), 24010);
        assert_eq!(b.notes, None);
    }

    #[test]
    fn rental_days_counts_whole_days() {
        assert_eq!(rental_days("2025-06-01", "2025-06-04"), Ok(3));
        assert_eq!(rental_days("2025-06-01", "2025-06-01"), Ok(1));
        assert!(rental_days("2025-06-04", "2025-06-01").is_err());
        assert!(rental_days("06/01/2025", "2025-06-04").is_err());
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(format_usd(0), "$0.00");
        assert_eq!(format_usd(5), "$0.05");
        assert_eq!(format_usd(123456), "$1,234.56");
        assert_eq!(format_usd(100_000_000), "$1,000,000.00");
        assert_eq!(format_usd(99999), "$999.99");
        assert_eq!(format_usd(-1200), "-$12.00");
    }
}
