use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use zeroize::Zeroize;

use crate::providers::{build_http_client, ProviderError};
use crate::traits::TextGenerator;
use crate::utils::truncate_str;

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl Drop for OpenAiCompatibleProvider {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// Generators carry an API key, so only HTTPS is accepted for remote hosts.
/// Plain HTTP is allowed for a loopback server.
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;
    let loopback = matches!(
        parsed.host_str(),
        Some("localhost" | "127.0.0.1" | "[::1]" | "::1")
    );

    match (parsed.scheme(), loopback) {
        ("https", _) => Ok(()),
        ("http", true) => {
            warn!(base_url, "Generator uses plain HTTP on loopback");
            Ok(())
        }
        ("http", false) => Err(format!(
            "base_url '{}' must use https for a remote host",
            base_url
        )),
        (scheme, _) => Err(format!(
            "base_url '{}' has unsupported scheme '{}'",
            base_url, scheme
        )),
    }
}

/// Pull the first choice's text out of a chat-completions response body.
fn extract_content(data: &Value) -> Result<String, ProviderError> {
    let choice = data["choices"]
        .get(0)
        .ok_or_else(|| ProviderError::malformed("No choices in response"))?;
    match choice["message"]["content"].as_str() {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(ProviderError::malformed("Empty completion content")),
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, String> {
        validate_base_url(base_url)?;
        let client = build_http_client(timeout)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleProvider {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, url = %url, prompt_chars = prompt.chars().count(), "Calling LLM API");

        let resp = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("HTTP request failed: {}", e);
                return Err(ProviderError::network(&e).into());
            }
        };

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::network(&e))?;

        if !status.is_success() {
            error!(status = %status, "Provider API error: {}", truncate_str(&text, 500));
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        debug!("Provider response: {}", truncate_str(&text, 2000));

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed(&format!("Invalid JSON body: {}", e)))?;
        Ok(extract_content(&data)?)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
