use std::future::Future;

use serde::{Deserialize, Serialize};

/// One message of a chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Something that turns a chat transcript into the next assistant reply.
pub trait ChatModel: Send + Sync {
    fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

/// OpenAI chat-completions client.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client,
            api_key,
            model,
            max_tokens,
        }
    }
}

impl ChatModel for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": 0.4,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {body}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        parse_completion(&body)
    }
}

fn parse_completion(body: &str) -> Result<String, LlmError> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| LlmError::Parse("completion had no content".into()))
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("OpenAI API error: {0}")]
    Api(String),
    #[error("Unexpected completion response: {0}")]
    Parse(String),
}
