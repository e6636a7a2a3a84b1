use crate::core::config::AppConfig;
use crate::core::shared::state::AppState;
use crate::llm::LLMProvider;
use crate::store::MemoryStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct MockLLMProvider {
    pub response: String,
    pub delay: Option<Duration>,
}

impl MockLLMProvider {
    pub fn new() -> Self {
        Self {
            response: "Mock LLM response".to_string(),
            delay: None,
        }
    }

    pub fn with_response(response: &str) -> Self {
        Self {
            response: response.to_string(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Default for MockLLMProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _config: &Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.response.clone())
    }
}

/// In-memory state with default config and a canned model response.
pub fn create_test_state(llm_response: &str) -> (Arc<AppState>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let (state, _rx) = AppState::new(
        AppConfig::default(),
        store.clone(),
        Arc::new(MockLLMProvider::with_response(llm_response)),
    );
    (Arc::new(state), store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collection, DocumentStore};

    #[tokio::test]
    async fn test_state_shares_store_handle() {
        let (state, store) = create_test_state("ok");
        state
            .store
            .set(Collection::Roles, "R1", serde_json::json!({"name": "Lead"}), false)
            .await
            .unwrap();
        assert_eq!(store.len(Collection::Roles).await, 1);
        assert_eq!(state.config.server.port, 8080);
    }

    #[tokio::test]
    async fn test_mock_returns_canned_response() {
        let mock = MockLLMProvider::with_response("hello");
        assert_eq!(mock.generate("prompt", &Value::Null).await.unwrap(), "hello");
    }
}
