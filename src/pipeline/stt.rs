use bytes::Bytes;
use serde::Deserialize;

/// Deepgram prerecorded speech-to-text client.
pub struct SttClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Deserialize)]
struct ListenResults {
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

impl SttClient {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Transcribe a complete audio file. Returns an empty string when
    /// Deepgram heard nothing.
    pub async fn transcribe(&self, audio: Bytes, content_type: &str) -> Result<String, SttError> {
        let resp = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&[
                ("model", self.model.as_str()),
                ("smart_format", "true"),
                ("punctuate", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", content_type)
            .body(audio)
            .send()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SttError::Api(format!("{status}: {body}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;
        let (transcript, confidence) = parse_transcript(&body)?;
        tracing::debug!(chars = transcript.len(), confidence, "Deepgram transcript");
        Ok(transcript)
    }
}

fn parse_transcript(body: &str) -> Result<(String, f64), SttError> {
    let parsed: ListenResponse =
        serde_json::from_str(body).map_err(|e| SttError::Parse(e.to_string()))?;
    Ok(parsed
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| (a.transcript.trim().to_string(), a.confidence))
        .unwrap_or_default())
}

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Deepgram API error: {0}")]
    Api(String),
    #[error("Unexpected Deepgram response: {0}")]
    Parse(String),
}
