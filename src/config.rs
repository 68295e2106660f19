use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub firebase: FirebaseConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    pub stripe: StripeConfig,
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub deepgram: DeepgramConfig,
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub external_url: String,
    /// Directory holding the built front-end bundle, served as a fallback.
    #[serde(default)]
    pub static_dir: Option<String>,
    /// Origins allowed to call the API from a browser when the front end is
    /// hosted elsewhere. Empty disables CORS.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FirebaseConfig {
    pub project_id: String,
    #[serde(default)]
    pub client_email: String,
    /// PEM private key of the service account. Literal `\n` sequences are accepted.
    #[serde(default)]
    pub private_key: String,
    /// Set from FIRESTORE_EMULATOR_HOST, never from the file.
    #[serde(skip)]
    pub emulator_host: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AdminConfig {
    /// Emails allowed to call /api/admin/*. If empty, all admin requests are rejected.
    #[serde(default)]
    pub emails: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    #[serde(default)]
    pub webhook_secret: String,
    /// Connected account (acct_...) representing this business.
    pub connected_account_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payments_cache")]
    pub payments_cache_secs: u64,
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_payments_cache() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Rental Desk".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeepgramConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_deepgram_model")]
    pub model: String,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_deepgram_model(),
        }
    }
}

fn default_deepgram_model() -> String {
    "nova-2-phonecall".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_elevenlabs_model")]
    pub model: String,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: default_voice_id(),
            model: default_elevenlabs_model(),
        }
    }
}

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_elevenlabs_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    200
}

/// Defaults for the voice line. Admin settings stored in Firestore take precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct VoiceConfig {
    #[serde(default = "default_business_name")]
    pub business_name: String,
    /// Fixed greeting. Empty means a time-of-day greeting is picked per call.
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub escalation_number: String,
    #[serde(default)]
    pub booking_url: String,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            business_name: default_business_name(),
            greeting: String::new(),
            escalation_number: String::new(),
            booking_url: String::new(),
            session_timeout_secs: default_session_timeout(),
        }
    }
}

fn default_business_name() -> String {
    "our rental desk".to_string()
}

fn default_session_timeout() -> u64 {
    900
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file from same directory as config.toml
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Run `rental-desk --setup` to create it",
                path.display(),
                e,
            )
        })?;

        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Allow env var overrides for secrets
    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 13] = [
            ("FIREBASE_PROJECT_ID", &mut self.firebase.project_id),
            ("FIREBASE_CLIENT_EMAIL", &mut self.firebase.client_email),
            ("FIREBASE_PRIVATE_KEY", &mut self.firebase.private_key),
            ("STRIPE_SECRET_KEY", &mut self.stripe.secret_key),
            ("STRIPE_WEBHOOK_SECRET", &mut self.stripe.webhook_secret),
            (
                "STRIPE_CONNECTED_ACCOUNT_ID",
                &mut self.stripe.connected_account_id,
            ),
            ("TWILIO_ACCOUNT_SID", &mut self.twilio.account_sid),
            ("TWILIO_AUTH_TOKEN", &mut self.twilio.auth_token),
            ("DEEPGRAM_API_KEY", &mut self.deepgram.api_key),
            ("ELEVENLABS_API_KEY", &mut self.elevenlabs.api_key),
            ("OPENAI_API_KEY", &mut self.openai.api_key),
            ("SERVER_EXTERNAL_URL", &mut self.server.external_url),
            ("VOICE_ESCALATION_NUMBER", &mut self.voice.escalation_number),
        ];
        for (var, slot) in overrides {
            if let Ok(v) = std::env::var(var) {
                *slot = v;
            }
        }

        if let (Ok(v), Some(smtp)) = (std::env::var("SMTP_PASSWORD"), self.smtp.as_mut()) {
            smtp.password = v;
        }
        if let Ok(v) = std::env::var("ADMIN_EMAILS") {
            self.admin.emails = parse_email_list(&v);
        }
        if let Ok(v) = std::env::var("FIRESTORE_EMULATOR_HOST") {
            if !v.is_empty() {
                self.firebase.emulator_host = Some(v);
            }
        }
    }
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

pub fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("RENTAL_DESK_CONFIG") {
        // If pointing to a file, use its parent directory
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".rental-desk")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("RENTAL_DESK_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}

#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 8080
external_url = "https://rentals.example.com"

[firebase]
project_id = "rental-test"

[admin]
emails = ["owner@example.com", "Ops@Example.com"]

[stripe]
secret_key = "sk_test_123"
webhook_secret = "whsec_test"
connected_account_id = "acct_123"

[twilio]
account_sid = "AC123"
auth_token = "secret"
phone_number = "+15550001111"

[openai]
api_key = "sk-openai"

[voice]
business_name = "Coastal Car Rentals"
escalation_number = "+15550002222"
booking_url = "https://rentals.example.com/book"
"#;
