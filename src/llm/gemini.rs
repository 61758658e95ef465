//! Gemini `generateContent` backend.
//!
//! Single-turn REST calls: the whole prompt travels as one user part, and
//! the first non-empty candidate part comes back as the completion.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::LlmError;
use crate::llm::{CompletionBackend, CompletionParams};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROVIDER: &str = "gemini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: Url,
    pub model: String,
    pub api_key: SecretString,
}

impl GeminiConfig {
    pub fn new(base_url: Url, model: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url,
            model: model.into(),
            api_key,
        }
    }
}

pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn endpoint(&self) -> Result<Url, LlmError> {
        let base = self.config.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!(
            "{}/models/{}:generateContent",
            base, self.config.model
        ))
        .map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("invalid endpoint: {e}"),
        })?;
        url.query_pairs_mut()
            .append_pair("key", self.config.api_key.expose_secret());
        Ok(url)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates?
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts.unwrap_or_default())
            .filter_map(|p| p.text)
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn complete(&self, prompt: &str, params: CompletionParams) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                // The full body may echo quota and key details.
                reason: format!("HTTP {}: {}", status, truncate(&body, 300)),
            });
        }

        let payload: GenerateResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        payload.first_text().ok_or_else(|| LlmError::EmptyCompletion {
            provider: PROVIDER.to_string(),
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_generate_content_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: "hello" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 500,
            },
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(value["generationConfig"]["temperature"], 0.1);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 500);
    }

    #[test]
    fn first_text_skips_empty_candidates() {
        let payload: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": "  " }] } },
                { "content": { "parts": [{ "text": " answer " }] } }
            ]
        }))
        .expect("deserialize");
        assert_eq!(payload.first_text().as_deref(), Some("answer"));
    }

    #[test]
    fn first_text_is_none_when_candidates_missing() {
        let payload: GenerateResponse =
            serde_json::from_value(serde_json::json!({})).expect("deserialize");
        assert!(payload.first_text().is_none());
    }

    #[test]
    fn endpoint_embeds_model_and_key() {
        let config = GeminiConfig::new(
            Url::parse(DEFAULT_BASE_URL).expect("url"),
            DEFAULT_MODEL,
            SecretString::from("k123"),
        );
        let client = GeminiClient::new(config);
        let url = client.endpoint().expect("endpoint");
        assert!(url
            .as_str()
            .contains("/models/gemini-2.5-flash:generateContent"));
        assert_eq!(url.query(), Some("key=k123"));
    }
}
