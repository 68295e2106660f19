//! Admin SMS notifications: Twilio first, carrier email-to-SMS gateway as a
//! fallback when Twilio refuses the message.

use std::sync::Arc;

use lettre::message::{header::ContentType, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SmtpConfig;
use crate::firebase::firestore::Document;
use crate::models::coerce_bool;
use crate::twilio::client::{TwilioClient, TwilioError};

/// Carrier id → email-to-SMS gateway domain.
const CARRIER_GATEWAYS: &[(&str, &str)] = &[
    ("att", "txt.att.net"),
    ("verizon", "vtext.com"),
    ("tmobile", "tmomail.net"),
    ("sprint", "messaging.sprintpcs.com"),
    ("uscellular", "email.uscc.net"),
    ("cricket", "sms.cricketwireless.net"),
    ("boost", "sms.myboostmobile.com"),
    ("metropcs", "mymetropcs.com"),
    ("googlefi", "msg.fi.google.com"),
];

/// Contents of `admin_sms_settings/config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SmsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub notify_on_booking: bool,
    #[serde(default)]
    pub notify_on_payment: bool,
    #[serde(default)]
    pub email_fallback: bool,
}

impl SmsSettings {
    pub fn from_document(doc: &Document) -> Self {
        let flag = |key: &str| coerce_bool(doc.get(key)).unwrap_or(false);
        Self {
            enabled: flag("enabled"),
            phone_number: doc
                .get("phone_number")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            carrier: doc
                .get("carrier")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(String::from),
            notify_on_booking: flag("notify_on_booking"),
            notify_on_payment: flag("notify_on_payment"),
            email_fallback: flag("email_fallback"),
        }
    }

    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }
}

/// Which channel delivered a notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Delivery {
    Sms { sid: String },
    EmailGateway { address: String },
}

pub struct Notifier {
    twilio: Arc<TwilioClient>,
    mailer: Option<Mailer>,
}

struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Notifier {
    pub fn new(twilio: Arc<TwilioClient>, smtp: Option<&SmtpConfig>) -> Result<Self, NotifyError> {
        let mailer = smtp.map(Mailer::new).transpose()?;
        Ok(Self { twilio, mailer })
    }

    /// Send `body` to `to`, falling back to the carrier's email gateway when
    /// Twilio fails and `settings` allow it.
    pub async fn send(
        &self,
        to: &str,
        body: &str,
        settings: &SmsSettings,
    ) -> Result<Delivery, NotifyError> {
        let err = match self.twilio.send_sms(to, body).await {
            Ok(sid) => return Ok(Delivery::Sms { sid }),
            Err(e) => e,
        };
        tracing::warn!(to, "Twilio SMS failed: {err}");

        if !settings.email_fallback {
            return Err(err.into());
        }
        let Some(ref mailer) = self.mailer else {
            return Err(err.into());
        };
        let Some(address) = settings
            .carrier
            .as_deref()
            .and_then(|c| gateway_address(to, c))
        else {
            return Err(err.into());
        };

        mailer.send(&address, body).await?;
        tracing::info!(address = %address, "Sent SMS via email gateway");
        Ok(Delivery::EmailGateway { address })
    }

    /// Notify the admin phone in `settings`, if notifications are enabled.
    /// Failures are logged, never returned.
    pub async fn notify_admin(&self, settings: &SmsSettings, body: &str) {
        if !settings.enabled || settings.phone_number.is_empty() {
            tracing::debug!("Admin SMS disabled, skipping notification");
            return;
        }
        if let Err(e) = self.send(&settings.phone_number, body, settings).await {
            tracing::warn!("Admin notification failed: {e}");
        }
    }
}

impl Mailer {
    fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| NotifyError::Config(format!("Invalid from address: {e}")))?;

        let tls = TlsParameters::builder(config.host.clone())
            .build()
            .map_err(|e| NotifyError::Config(format!("Failed to build TLS parameters: {e}")))?;
        let tls = if config.port == 465 {
            Tls::Wrapper(tls)
        } else {
            Tls::Required(tls)
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| NotifyError::Config(format!("Failed to create SMTP transport: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .tls(tls)
            .build();

        Ok(Self { transport, from })
    }

    async fn send(&self, address: &str, body: &str) -> Result<(), NotifyError> {
        let to: Mailbox = address
            .parse()
            .map_err(|e| NotifyError::Email(format!("Invalid gateway address {address}: {e}")))?;

        // Gateways drop the subject into the text, so leave it empty.
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("")
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Email(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Email(e.to_string()))?;
        Ok(())
    }
}

/// `<10-digit number>@<gateway>` for a known carrier. US numbers only.
pub fn gateway_address(phone: &str, carrier: &str) -> Option<String> {
    let key: String = carrier
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let domain = CARRIER_GATEWAYS
        .iter()
        .find(|(id, _)| *id == key)
        .map(|(_, d)| *d)?;

    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let local = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => return None,
    };
    Some(format!("{local}@{domain}"))
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMS failed: {0}")]
    Sms(#[from] TwilioError),
    #[error("Email gateway failed: {0}")]
    Email(String),
    #[error("SMTP configuration error: {0}")]
    Config(String),
}
