//! Anthropic Messages API caller

use super::{ModelCaller, PromptSpec};
use crate::error::{ModelError, TransientKind};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Single-shot HTTP caller. Retries belong to `RetryingCaller`.
pub struct AnthropicCaller {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AnthropicCaller {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Reads `ANTHROPIC_API_KEY`
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            return Err(anyhow::anyhow!(
                "ANTHROPIC_API_KEY not set. The pipeline requires model API access."
            ));
        }
        Ok(Self::new(api_key, model))
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn request_body(&self, spec: &PromptSpec) -> Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": spec.max_tokens,
            "temperature": spec.temperature,
            "messages": [
                {
                    "role": "user",
                    "content": spec.prompt
                }
            ]
        })
    }
}

#[async_trait]
impl ModelCaller for AnthropicCaller {
    async fn call(&self, spec: &PromptSpec) -> Result<String, ModelError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&self.request_body(spec))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ModelError::permanent(format!("unreadable response body: {}", e)))?;

        extract_text(&body)
    }
}

/// Only server-side failures are worth another attempt; every 4xx is permanent
fn classify_status(status: StatusCode, body: &str) -> ModelError {
    let snippet: String = body.chars().take(200).collect();
    if status.is_server_error() {
        ModelError::transient(TransientKind::Server, format!("{}: {}", status, snippet))
    } else {
        ModelError::permanent(format!("{}: {}", status, snippet))
    }
}

fn classify_transport(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::transient(TransientKind::Timeout, err.to_string())
    } else if err.is_connect() || err.is_request() {
        ModelError::transient(TransientKind::Network, err.to_string())
    } else {
        ModelError::permanent(err.to_string())
    }
}

fn extract_text(body: &Value) -> Result<String, ModelError> {
    match body["content"][0]["text"].as_str() {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(ModelError::permanent("response carried no text content")),
    }
}
