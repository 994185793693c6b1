use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enrich::Enricher;
use crate::error::{AtlasError, Result};

const SUMMARY_SYSTEM_PROMPT: &str = "You are a code summarizer. Describe what the \
given code span does in at most two plain sentences. Mention inputs, outputs and \
side effects. Do not quote the code back.";

/// Runtime configuration for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct EnricherClientConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Summarizer backed by a chat-completions endpoint. A timed-out or failed
/// call only fails the span it was issued for; regenerating a summary for
/// unchanged text is always safe.
pub struct HttpEnricher {
    config: EnricherClientConfig,
    http: reqwest::Client,
}

impl HttpEnricher {
    pub fn new(config: EnricherClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AtlasError::Capability(format!("failed to build enricher http client: {e}")))?;

        Ok(Self { config, http })
    }

    fn chat_completions_url(&self) -> String {
        let endpoint = self.config.endpoint.trim().trim_end_matches('/');
        if endpoint.ends_with("/chat/completions") {
            endpoint.to_string()
        } else if endpoint.ends_with("/v1") {
            format!("{}/chat/completions", endpoint)
        } else {
            format!("{}/v1/chat/completions", endpoint)
        }
    }
}

#[async_trait::async_trait]
impl Enricher for HttpEnricher {
    async fn summarize(&self, span_text: &str) -> Result<String> {
        let payload = ChatCompletionsRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SUMMARY_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: span_text.to_string(),
                },
            ],
            temperature: Some(0.0),
            stream: Some(false),
        };

        let url = self.chat_completions_url();
        let mut request = self.http.post(&url).json(&payload);
        if let Some(api_key) = self.config.api_key.as_ref() {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AtlasError::Capability(format!(
                    "enricher request timed out after {:?} (model={})",
                    self.config.timeout, self.config.model
                ))
            } else {
                AtlasError::Capability(format!(
                    "enricher request failed (model={}): {e}",
                    self.config.model
                ))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AtlasError::Capability(format!("failed to read enricher response: {e}")))?;

        if !status.is_success() {
            return Err(AtlasError::Capability(format!(
                "enricher endpoint returned HTTP {status}: {}",
                truncate_for_error(&body)
            )));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&body).map_err(|e| {
            AtlasError::Capability(format!(
                "invalid JSON from enricher endpoint: {e} (body={})",
                truncate_for_error(&body)
            ))
        })?;

        let summary = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AtlasError::Capability("enricher response had no content".to_string()))?;

        Ok(summary)
    }
}

fn truncate_for_error(value: &str) -> String {
    const LIMIT: usize = 400;
    if value.len() <= LIMIT {
        return value.to_string();
    }
    let mut cut = LIMIT;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &value[..cut])
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: String,
}
