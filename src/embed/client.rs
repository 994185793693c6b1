use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embed::{Embedder, EmbeddingProfile};
use crate::error::{AtlasError, Result};

/// Runtime configuration for an OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone)]
pub struct EmbedderClientConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Embedder backed by an `/v1/embeddings` endpoint. The model is taken from
/// the profile, so one client serves every configured profile.
pub struct HttpEmbedder {
    config: EmbedderClientConfig,
    http: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: EmbedderClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AtlasError::Capability(format!("failed to build embedder http client: {e}")))?;

        Ok(Self { config, http })
    }

    fn embeddings_url(&self) -> String {
        let endpoint = self.config.endpoint.trim().trim_end_matches('/');
        if endpoint.ends_with("/embeddings") {
            endpoint.to_string()
        } else if endpoint.ends_with("/v1") {
            format!("{}/embeddings", endpoint)
        } else {
            format!("{}/v1/embeddings", endpoint)
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str, profile: &EmbeddingProfile) -> Result<Vec<f32>> {
        let payload = EmbeddingsRequest {
            model: profile.model.clone(),
            input: vec![text.to_string()],
            dimensions: Some(profile.dim),
        };

        let url = self.embeddings_url();
        let mut request = self.http.post(&url).json(&payload);
        if let Some(api_key) = self.config.api_key.as_ref() {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AtlasError::Capability(format!(
                    "embedder request timed out after {:?} (model={})",
                    self.config.timeout, profile.model
                ))
            } else {
                AtlasError::Capability(format!(
                    "embedder request failed (model={}): {e}",
                    profile.model
                ))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AtlasError::Capability(format!("failed to read embedder response: {e}")))?;

        if !status.is_success() {
            return Err(AtlasError::Capability(format!(
                "embedder endpoint returned HTTP {status}: {}",
                truncate_for_error(&body)
            )));
        }

        let parsed: EmbeddingsResponse = serde_json::from_str(&body).map_err(|e| {
            AtlasError::Capability(format!(
                "invalid JSON from embedder endpoint: {e} (body={})",
                truncate_for_error(&body)
            ))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AtlasError::Capability("embedder response had no vector".to_string()))
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
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> HttpEmbedder {
        HttpEmbedder::new(EmbedderClientConfig {
            endpoint: endpoint.to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_url_normalization() {
        assert_eq!(
            client("http://localhost:11434/v1").embeddings_url(),
            "http://localhost:11434/v1/embeddings"
        );
        assert_eq!(
            client("http://localhost:11434").embeddings_url(),
            "http://localhost:11434/v1/embeddings"
        );
        assert_eq!(
            client("http://localhost:11434/v1/embeddings/").embeddings_url(),
            "http://localhost:11434/v1/embeddings"
        );
    }

    #[test]
    fn test_truncate_keeps_char_boundaries() {
        let mut body = "x".repeat(399);
        body.push('€');
        let truncated = truncate_for_error(&body);
        assert_eq!(truncated, format!("{}...", "x".repeat(399)));
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"data":[{"embedding":[0.1,0.2,0.3],"index":0}],"model":"m"}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].embedding.len(), 3);
    }
}
