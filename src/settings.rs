//! Admin-editable settings documents and their config fallbacks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::VoiceConfig;
use crate::firebase::firestore::{Document, FirestoreClient, FirestoreError};
use crate::models::{coerce_bool, SETTINGS_DOC, SMS_SETTINGS, VOICE_SETTINGS};
use crate::notify::SmsSettings;
use crate::pipeline::agent::AgentContext;
use crate::twilio::twiml::Listen;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transcription {
    #[default]
    Twilio,
    Deepgram,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngine {
    #[default]
    Twilio,
    ElevenLabs,
}

/// Contents of `admin_voice_settings/config`, merged over `[voice]` defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    pub enabled: bool,
    pub business_name: String,
    /// Empty means a time-of-day greeting.
    pub greeting: String,
    pub escalation_number: String,
    pub booking_url: String,
    pub instructions: String,
    pub transcription: Transcription,
    pub speech: SpeechEngine,
    /// ElevenLabs voice override; empty uses the configured voice.
    pub voice_id: String,
}

impl VoiceSettings {
    pub fn defaults(config: &VoiceConfig) -> Self {
        Self {
            enabled: true,
            business_name: config.business_name.clone(),
            greeting: config.greeting.clone(),
            escalation_number: config.escalation_number.clone(),
            booking_url: config.booking_url.clone(),
            instructions: String::new(),
            transcription: Transcription::default(),
            speech: SpeechEngine::default(),
            voice_id: String::new(),
        }
    }

    /// Overlay the stored document onto the defaults. Blank strings and
    /// unknown enum values keep the default.
    pub fn from_document(doc: &Document, config: &VoiceConfig) -> Self {
        let mut s = Self::defaults(config);
        let text = |key: &str| {
            doc.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        if let Some(enabled) = coerce_bool(doc.get("enabled")) {
            s.enabled = enabled;
        }
        for (key, slot) in [
            ("business_name", &mut s.business_name),
            ("greeting", &mut s.greeting),
            ("escalation_number", &mut s.escalation_number),
            ("booking_url", &mut s.booking_url),
            ("instructions", &mut s.instructions),
            ("voice_id", &mut s.voice_id),
        ] {
            if let Some(v) = text(key) {
                *slot = v;
            }
        }
        if let Some(t) = doc
            .get("transcription")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
        {
            s.transcription = t;
        }
        if let Some(e) = doc
            .get("speech")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
        {
            s.speech = e;
        }
        s
    }

    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }

    pub fn agent_context(&self) -> AgentContext {
        AgentContext {
            business_name: self.business_name.clone(),
            booking_url: self.booking_url.clone(),
            instructions: self.instructions.clone(),
        }
    }

    pub fn listen_mode(&self, deepgram_configured: bool) -> Listen {
        match self.transcription {
            Transcription::Deepgram if deepgram_configured => Listen::Record,
            _ => Listen::Gather,
        }
    }
}

pub async fn load_sms_settings(db: &FirestoreClient) -> Result<SmsSettings, FirestoreError> {
    Ok(db
        .get_optional(SMS_SETTINGS, SETTINGS_DOC)
        .await?
        .map(|doc| SmsSettings::from_document(&doc))
        .unwrap_or_default())
}

pub async fn load_voice_settings(
    db: &FirestoreClient,
    config: &VoiceConfig,
) -> Result<VoiceSettings, FirestoreError> {
    Ok(db
        .get_optional(VOICE_SETTINGS, SETTINGS_DOC)
        .await?
        .map(|doc| VoiceSettings::from_document(&doc, config))
        .unwrap_or_else(|| VoiceSettings::defaults(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> VoiceConfig {
        VoiceConfig {
            business_name: "Coastal Car Rentals".into(),
            greeting: String::new(),
            escalation_number: "+15550002222".into(),
            booking_url: "https://rentals.example.com/book".into(),
            session_timeout_secs: 900,
        }
    }

    #[test]
    fn stored_values_override_defaults() {
        let doc: Document = serde_json::from_value(json!({
            "enabled": "false",
            "greeting": "Thanks for calling Coastal!",
            "escalation_number": "   ",
            "transcription": "deepgram",
            "speech": "elevenlabs",
            "voice_id": "abc"
        }))
        .unwrap();
        let s = VoiceSettings::from_document(&doc, &config());
        assert!(!s.enabled);
        assert_eq!(s.greeting, "Thanks for calling Coastal!");
        assert_eq!(s.escalation_number, "+15550002222");
        assert_eq!(s.business_name, "Coastal Car Rentals");
        assert_eq!(s.transcription, Transcription::Deepgram);
        assert_eq!(s.speech, SpeechEngine::ElevenLabs);
        assert_eq!(s.voice_id, "abc");
    }

    #[test]
    fn unknown_engine_keeps_default() {
        let doc: Document = serde_json::from_value(json!({ "speech": "robot" })).unwrap();
        let s = VoiceSettings::from_document(&doc, &config());
        assert_eq!(s.speech, SpeechEngine::Twilio);
        assert!(s.enabled);
    }

    #[test]
    fn deepgram_mode_needs_an_api_key() {
        let mut s = VoiceSettings::defaults(&config());
        s.transcription = Transcription::Deepgram;
        assert_eq!(s.listen_mode(true), Listen::Record);
        assert_eq!(s.listen_mode(false), Listen::Gather);
    }

    #[test]
    fn settings_round_trip_through_document() {
        let s = VoiceSettings::defaults(&config());
        let doc = s.to_document();
        assert_eq!(doc["transcription"], "twilio");
        assert_eq!(VoiceSettings::from_document(&doc, &config()), s);
    }
}
