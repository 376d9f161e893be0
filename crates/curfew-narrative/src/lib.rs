//! HTTP backend for generated wording
//!
//! Talks to any OpenAI-compatible `chat/completions` endpoint. The caller
//! (`curfew_core::NarrativeClient`) owns the timeout budget, quota and
//! sanitization; this crate only moves text over the wire.

use async_trait::async_trait;
use curfew_config::NarrativeConfig;
use curfew_platform_api::{PlatformError, PlatformResult, TextGenerator};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Completions are one sentence; keep requests cheap
const MAX_TOKENS: u32 = 120;

#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("API key variable {0} is not set")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// `TextGenerator` backed by a chat-completions HTTP API
pub struct HttpTextGenerator {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NarrativeError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: resolve_chat_endpoint(endpoint),
            model: model.into(),
            api_key,
        })
    }

    /// Build from config, reading the API key from the configured variable.
    ///
    /// Returns `Ok(None)` when no endpoint is configured.
    pub fn from_config(config: &NarrativeConfig) -> Result<Option<Self>, NarrativeError> {
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| NarrativeError::MissingApiKey(config.api_key_env.clone()))?;

        let generator = Self::new(endpoint, config.model.clone(), Some(api_key), config.timeout)?;
        info!(url = %generator.url, model = %generator.model, "Text generation enabled");
        Ok(Some(generator))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> PlatformResult<String> {
        let payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Generation(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Generation(format!(
                "error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Generation(format!("invalid response: {}", e)))?;

        let choice = body
            .choices
            .first()
            .ok_or_else(|| PlatformError::Generation("response did not include choices".into()))?;

        let text = extract_text(&choice.message.content);
        debug!(chars = text.chars().count(), "Generated text received");
        Ok(text.trim().to_string())
    }
}

fn resolve_chat_endpoint(endpoint: &str) -> String {
    if endpoint.contains("/chat/completions") {
        endpoint.to_string()
    } else {
        format!("{}/chat/completions", endpoint.trim_end_matches('/'))
    }
}

fn extract_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}
