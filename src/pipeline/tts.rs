use bytes::Bytes;

/// ElevenLabs text-to-speech client.
///
/// Returns MP3 audio that Twilio can `<Play>` directly.
pub struct TtsClient {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model: String,
}

/// Keep requests well under ElevenLabs' per-request character limit.
const MAX_CHARS: usize = 2500;

const OUTPUT_FORMAT: &str = "mp3_22050_32";

impl TtsClient {
    pub fn new(client: reqwest::Client, api_key: String, voice_id: String, model: String) -> Self {
        Self {
            client,
            api_key,
            voice_id,
            model,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Convert text to MP3 audio using the default voice.
    pub async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError> {
        self.synthesize_with_voice(text, &self.voice_id).await
    }

    /// Convert text to MP3 audio using an explicit voice ID.
    pub async fn synthesize_with_voice(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<Bytes, TtsError> {
        let chunks = split_text(text, MAX_CHARS);
        let mut all_audio = Vec::new();

        // MP3 frames concatenate cleanly, so chunks can be joined as-is.
        for chunk in &chunks {
            let audio = self.synthesize_chunk(chunk, voice_id).await?;
            all_audio.extend_from_slice(&audio);
        }

        Ok(Bytes::from(all_audio))
    }

    /// Synthesize a single chunk (must be <= MAX_CHARS).
    async fn synthesize_chunk(&self, text: &str, voice_id: &str) -> Result<Bytes, TtsError> {
        let body = serde_json::json!({
            "text": text,
            "model_id": &self.model,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75
            }
        });

        let resp = self
            .client
            .post(format!(
                "https://api.elevenlabs.io/v1/text-to-speech/{voice_id}"
            ))
            .query(&[("output_format", OUTPUT_FORMAT)])
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TtsError::Api(format!("{status}: {body}")));
        }

        resp.bytes()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))
    }
}

/// Split text at sentence boundaries to stay under the character limit.
///
/// Splits on `. `, `! `, `? ` boundaries. If a single sentence exceeds the
/// limit, falls back to splitting at the limit (mid-word if necessary).
fn split_text(text: &str, max_chars: usize) -> Vec<&str> {
    if text.len() <= max_chars {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            chunks.push(remaining);
            break;
        }

        let mut limit = max_chars;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Find the last sentence boundary within the limit
        let search_slice = &remaining[..limit];
        let split_pos = search_slice
            .rmatch_indices(". ")
            .chain(search_slice.rmatch_indices("! "))
            .chain(search_slice.rmatch_indices("? "))
            .map(|(i, s)| i + s.len())
            .max();

        let pos = split_pos.unwrap_or(limit);
        chunks.push(&remaining[..pos]);
        remaining = remaining[pos..].trim_start();
    }

    chunks
}

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("ElevenLabs API error: {0}")]
    Api(String),
}
