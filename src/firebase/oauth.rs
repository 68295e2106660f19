use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::FirebaseConfig;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Refresh this long before Google's stated expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth2 access tokens for a Google service account (JWT bearer grant).
pub struct ServiceAccountAuth {
    client: reqwest::Client,
    client_email: String,
    private_key: String,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl ServiceAccountAuth {
    pub fn new(client: reqwest::Client, config: &FirebaseConfig) -> Self {
        Self {
            client,
            client_email: config.client_email.clone(),
            private_key: normalize_private_key(&config.private_key),
            cached: Mutex::new(None),
        }
    }

    /// Return a valid access token, minting a new one when the cached one is
    /// missing or about to expire.
    pub async fn access_token(&self) -> Result<String, OAuthError> {
        {
            let cached = self.cached.lock().await;
            if let Some(ref t) = *cached {
                if Instant::now() < t.expires_at {
                    return Ok(t.token.clone());
                }
            }
        }

        let assertion = self.sign_assertion()?;
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let resp = self
            .client
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OAuthError::Api(format!("{status}: {body}")));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::debug!(expires_in = parsed.expires_in, "Minted Google access token");

        *self.cached.lock().await = Some(CachedToken {
            token: parsed.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(parsed.access_token)
    }

    fn sign_assertion(&self) -> Result<String, OAuthError> {
        if self.client_email.is_empty() || self.private_key.is_empty() {
            return Err(OAuthError::Credentials(
                "firebase.client_email and firebase.private_key must be set".into(),
            ));
        }

        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DATASTORE_SCOPE,
            aud: TOKEN_URL,
            iat: now,
            exp: now + 3600,
        };

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| OAuthError::Credentials(format!("Bad private key: {e}")))?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| OAuthError::Credentials(format!("Failed to sign assertion: {e}")))
    }
}

/// Keys pasted into env files usually carry escaped newlines.
fn normalize_private_key(raw: &str) -> String {
    raw.trim().trim_matches('"').replace("\\n", "\n")
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Service account credentials invalid: {0}")]
    Credentials(String),
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Token endpoint error: {0}")]
    Api(String),
}
