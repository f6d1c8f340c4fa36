use std::time::Duration;

use async_trait::async_trait;
use opsgate_core::config::{LlmConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::conversation::ChatMessage;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language backend is not configured")]
    Disabled,
    #[error("language backend request failed: {0}")]
    Http(String),
    #[error("language backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("language backend returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("language backend returned an empty response")]
    EmptyResponse,
    #[error("language backend timed out after {0} seconds")]
    Timeout(u64),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
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

/// `/v1/chat/completions` client. Ollama exposes the same route, so one client serves both
/// providers; only the default base URL and the need for an API key differ.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
            return Err(LlmError::Disabled);
        }

        let base_url = config.base_url.clone().unwrap_or_else(|| {
            match config.provider {
                LlmProvider::OpenAi => OPENAI_BASE_URL,
                LlmProvider::Ollama => OLLAMA_BASE_URL,
            }
            .to_string()
        });

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Http(error.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Http(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: truncate(&message, 300),
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        debug!(
            event_name = "llm.completion.received",
            model = %self.model,
            chars = content.len(),
            "completion received"
        );
        Ok(content)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use opsgate_core::config::{AppConfig, LlmProvider};

    use super::{
        truncate, ChatCompletionRequest, ChatCompletionResponse, LlmError, OpenAiCompatibleClient,
    };
    use crate::conversation::ChatMessage;

    #[test]
    fn openai_without_key_is_disabled() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::OpenAi;
        config.api_key = None;
        assert!(matches!(OpenAiCompatibleClient::from_config(&config), Err(LlmError::Disabled)));
    }

    #[test]
    fn ollama_defaults_to_local_endpoint() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Ollama;
        config.base_url = None;
        let client = OpenAiCompatibleClient::from_config(&config).expect("client");
        assert_eq!(client.endpoint(), "http://127.0.0.1:11434/v1/chat/completions");
    }

    #[test]
    fn request_body_uses_chat_completion_shape() {
        let messages = vec![ChatMessage::system("rules"), ChatMessage::user("aks status")];
        let body = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: 500,
            temperature: 0.7,
        };
        let rendered = serde_json::to_value(&body).expect("serialize");

        assert_eq!(rendered["messages"][0]["role"], "system");
        assert_eq!(rendered["messages"][1]["content"], "aks status");
        assert_eq!(rendered["max_tokens"], 500);
    }

    #[test]
    fn response_content_is_read_from_first_choice() {
        let payload = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"All nodes are ready."}}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(payload).expect("decode");
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("All nodes are ready.")
        );
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long, 300).len(), 303);
        assert_eq!(truncate("short", 300), "short");
    }
}
