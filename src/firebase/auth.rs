use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::Mutex;

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Used when Google's response has no usable `Cache-Control: max-age`.
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

/// Claims we read from a verified Firebase ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

/// Verifies Firebase Auth ID tokens against Google's published signing keys.
pub struct IdTokenVerifier {
    client: reqwest::Client,
    project_id: String,
    keys: Mutex<Option<CachedKeys>>,
}

struct CachedKeys {
    set: JwkSet,
    expires_at: Instant,
}

impl IdTokenVerifier {
    pub fn new(client: reqwest::Client, project_id: &str) -> Self {
        Self {
            client,
            project_id: project_id.to_string(),
            keys: Mutex::new(None),
        }
    }

    /// Verify signature, audience, issuer and expiry; return the claims.
    pub async fn verify(&self, token: &str) -> Result<IdTokenClaims, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::Malformed(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Malformed("missing kid".into()))?;

        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!(
            "https://securetoken.google.com/{}",
            self.project_id
        )]);

        let data = jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::Invalid("empty subject".into()));
        }
        Ok(data.claims)
    }

    /// Find the key for `kid`, refreshing the key set once on a miss since
    /// Google rotates keys.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cached = self.keys.lock().await;
            if let Some(ref keys) = *cached {
                if Instant::now() < keys.expires_at {
                    if let Some(jwk) = keys.set.find(kid) {
                        return DecodingKey::from_jwk(jwk)
                            .map_err(|e| AuthError::Keys(e.to_string()));
                    }
                }
            }
        }

        let (set, ttl) = self.fetch_keys().await?;
        let key = set
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| AuthError::Keys(e.to_string()))?;

        *self.keys.lock().await = Some(CachedKeys {
            set,
            expires_at: Instant::now() + ttl,
        });

        key.ok_or_else(|| AuthError::Invalid(format!("unknown signing key {kid}")))
    }

    async fn fetch_keys(&self) -> Result<(JwkSet, Duration), AuthError> {
        let resp = self
            .client
            .get(JWKS_URL)
            .send()
            .await
            .map_err(|e| AuthError::Keys(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AuthError::Keys(format!("JWKS fetch returned {status}")));
        }

        let ttl = resp
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_KEY_TTL);

        let set: JwkSet = resp
            .json()
            .await
            .map_err(|e| AuthError::Keys(e.to_string()))?;

        tracing::debug!(
            keys = set.keys.len(),
            ttl_secs = ttl.as_secs(),
            "Refreshed Firebase signing keys"
        );
        Ok((set, ttl))
    }
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .filter_map(|d| d.trim().strip_prefix("max-age="))
        .find_map(|v| v.parse().ok())
}

/// `true` if `email` is on the allow-list (case-insensitive). An empty list
/// allows nobody.
pub fn is_allowed(email: Option<&str>, allow_list: &[String]) -> bool {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return false;
    };
    allow_list.iter().any(|a| a.trim().eq_ignore_ascii_case(email))
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Malformed ID token: {0}")]
    Malformed(String),
    #[error("Invalid ID token: {0}")]
    Invalid(String),
    #[error("Could not load signing keys: {0}")]
    Keys(String),
}
