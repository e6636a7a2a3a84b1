use async_trait::async_trait;
use serde_json::Value;

use crate::core::config::LlmConfig;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        config: &Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAIClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAIClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or(defaults.url),
            model: defaults.model,
            max_tokens: defaults.max_tokens,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn generate(
        &self,
        prompt: &str,
        config: &Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let mut body = serde_json::json!({
            "model": config["model"].as_str().unwrap_or(&self.model),
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": config["max_tokens"].as_u64().unwrap_or(u64::from(self.max_tokens)),
        });
        if config["response_format"].as_str() == Some("json") {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let mut request = self.client.post(self.endpoint()).json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let result: Value = request.send().await?.error_for_status()?.json().await?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or("model response has no message content")?;

        Ok(content.to_string())
    }
}
