use bytes::Bytes;
use serde::Deserialize;

use crate::config::TwilioConfig;

const TWILIO_API_HOST: &str = "api.twilio.com";

/// Twilio REST API client for outbound SMS and call recordings.
pub struct TwilioClient {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

impl TwilioClient {
    pub fn new(client: reqwest::Client, twilio_config: &TwilioConfig) -> Self {
        Self {
            client,
            account_sid: twilio_config.account_sid.clone(),
            auth_token: twilio_config.auth_token.clone(),
            from_number: twilio_config.phone_number.clone(),
        }
    }

    /// Send an SMS from the configured number. Returns the message SID.
    pub async fn send_sms(&self, to: &str, body: &str) -> Result<String, TwilioError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let params = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TwilioError::Api(format!("{status}: {body}")));
        }

        let msg: MessageResponse = resp
            .json()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;

        tracing::info!(
            to,
            message_sid = %msg.sid,
            status = msg.status.as_deref().unwrap_or("unknown"),
            "SMS sent"
        );
        Ok(msg.sid)
    }

    /// Download a call recording. Twilio serves recordings behind account
    /// credentials; `.wav` is appended when the URL has no extension.
    ///
    /// Only `https://api.twilio.com` URLs are fetched, since the request
    /// carries the account credentials.
    pub async fn fetch_recording(
        &self,
        recording_url: &str,
    ) -> Result<(Bytes, String), TwilioError> {
        if !is_twilio_api_url(recording_url) {
            return Err(TwilioError::UntrustedUrl(recording_url.to_string()));
        }
        let url = recording_media_url(recording_url);

        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(TwilioError::Api(format!("recording fetch {status}")));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/wav")
            .to_string();
        let audio = resp
            .bytes()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;

        tracing::debug!(bytes = audio.len(), "Fetched call recording");
        Ok((audio, content_type))
    }
}

fn is_twilio_api_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(url) => {
            url.scheme() == "https"
                && url.host_str() == Some(TWILIO_API_HOST)
                && url.port().is_none()
                && url.username().is_empty()
        }
        Err(_) => false,
    }
}

fn recording_media_url(recording_url: &str) -> String {
    let last = recording_url.rsplit('/').next().unwrap_or_default();
    if last.contains('.') {
        recording_url.to_string()
    } else {
        format!("{recording_url}.wav")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TwilioError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Twilio API error: {0}")]
    Api(String),
    #[error("refusing to fetch recording from {0}")]
    UntrustedUrl(String),
}
