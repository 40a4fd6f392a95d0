//! OpenAI-compatible `chat/completions` client.

use super::provider::{GenerationProvider, GenerationRequest, GenerationResponse, Message, Usage};
use crate::config::GenerationConfig;
use crate::errors::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client for OpenAI-compatible endpoints (OpenAI, OpenRouter, LiteLLM).
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_base: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
    http_client: Client,
}

impl OpenAiProvider {
    /// Builds a client from configuration. An API key is required.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(GenerationError::MissingApiKey)?;
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GenerationError::Config(e.to_string()))?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            http_client,
        })
    }

    /// Get the API base URL.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        let model = if request.model.is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };
        let body = ApiRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature.or(self.temperature),
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        debug!(url = %url, model = %model, "generation request");

        let http_response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(GenerationError::RateLimited);
            }
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map_or(error_text, |e| e.error.message);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(format!("failed to parse API response: {e}")))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(GenerationResponse {
            model: api_response.model,
            content,
            usage: api_response.usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let err = OpenAiProvider::from_config(&GenerationConfig::default()).unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey));
    }

    #[test]
    fn test_trims_trailing_slash() {
        let config = GenerationConfig {
            api_base: "http://localhost:4000/".into(),
            api_key: Some("k".into()),
            ..GenerationConfig::default()
        };
        let provider = OpenAiProvider::from_config(&config).unwrap();
        assert_eq!(provider.api_base(), "http://localhost:4000");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_response_without_content_parses() {
        let raw = r#"{"model": "m", "choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
