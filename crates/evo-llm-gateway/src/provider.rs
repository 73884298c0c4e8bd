//! The remote text generator boundary. A concrete HTTP-backed
//! provider for real deployments, and a deterministic mock for tests
//! so the rest of the pipeline never needs live network access to
//! exercise the synthesis path.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};

/// Behavior the gateway needs from whatever text generator sits
/// behind it. Implementations should not retry internally — the
/// gateway and its callers own retry policy.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a chat exchange, returning the raw (unstripped) text.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;
}

/// Talks to an OpenAI-compatible chat completions endpoint over
/// `reqwest`. The API key never leaves [`Secret`] except for the one
/// moment it is placed in the `Authorization` header.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Secret<String>,
    temperature: f32,
}

impl HttpLlmProvider {
    /// Construct a provider pointed at `base_url` (an OpenAI-compatible
    /// `/chat/completions` endpoint) using `model` and `api_key`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Secret<String>, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            temperature,
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: serde_json::Value = resp.json().await?;
        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("unexpected provider response shape"))?;
        Ok(content.to_string())
    }
}

/// Deterministic mock used in tests and in bootstrap dry-runs. Picks
/// a canned example based on keywords in the system prompt so callers
/// exercising different categories see plausible (if fixed) code.
pub struct MockLlmProvider;

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, system_prompt: &str, _user_prompt: &str) -> anyhow::Result<String> {
        let code = if system_prompt.contains("fetches market data") {
            "pub fn get_stock_hist(symbol: String, start: String, end: String) -> std::collections::HashMap<String, f64> { std::collections::HashMap::new() }\npub fn self_test() -> bool { true }"
        } else if system_prompt.contains("combines the outputs") {
            "pub fn calc_volume_price_divergence(prices: Vec<f64>, volume: Vec<f64>) -> bool { prices.len() == volume.len() }\npub fn self_test() -> bool { true }"
        } else {
            "pub fn calc_rsi(prices: Vec<f64>, period: usize) -> f64 { 50.0 }\npub fn self_test() -> bool { true }"
        };
        Ok(format!("<think>deterministic mock response</think>\n```rust\n{code}\n```"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_returns_rust_fence_for_calculation_prompt() {
        let provider = MockLlmProvider;
        let raw = provider.complete(crate::prompts::system_prompt_for(evo_types::Category::Calculation), "calc rsi").await.unwrap();
        assert!(raw.contains("```rust"));
        assert!(raw.contains("fn calc_rsi"));
    }
}
