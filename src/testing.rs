//! Test infrastructure: MockGenerator and a temp-file backed store.
//!
//! The derivation paths call the generator concurrently, so responses are
//! routed by prompt content rather than by call order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::state::SqliteStateStore;
use crate::traits::TextGenerator;

#[derive(Debug, Clone)]
enum Scripted {
    Text(String),
    Fail(String),
}

/// Mock text generator with substring-routed scripted responses.
pub struct MockGenerator {
    rules: Vec<(String, Scripted)>,
    delay: Option<Duration>,
    pub call_log: Mutex<Vec<String>>,
}

impl MockGenerator {
    /// A generator that fails every call until rules are added.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            delay: None,
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `response` whenever the prompt contains `needle`.
    pub fn reply_when(mut self, needle: &str, response: &str) -> Self {
        self.rules
            .push((needle.to_string(), Scripted::Text(response.to_string())));
        self
    }

    /// Fail whenever the prompt contains `needle`.
    pub fn fail_when(mut self, needle: &str, error: &str) -> Self {
        self.rules
            .push((needle.to_string(), Scripted::Fail(error.to_string())));
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }

    /// Number of recorded prompts containing `needle`.
    pub async fn calls_containing(&self, needle: &str) -> usize {
        self.call_log
            .lock()
            .await
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.call_log.lock().await.push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, s)| s.clone());
        match scripted {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Fail(err)) => Err(anyhow::anyhow!(err)),
            None => Err(anyhow::anyhow!("MockGenerator: no scripted response")),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Prompt fragments that identify each default template.
pub const WEIGHT_PROMPT: &str = "WEIGHT_SCORE";
pub const AFFECTION_PROMPT: &str = "TYPE: friendly/neutral/negative";
pub const PROFILE_PROMPT: &str = "Write an impression of the user";

pub async fn test_store() -> (Arc<SqliteStateStore>, tempfile::NamedTempFile) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let store = SqliteStateStore::new(db_file.path().to_str().unwrap())
        .await
        .unwrap();
    (Arc::new(store), db_file)
}

pub fn test_config() -> AppConfig {
    let config = AppConfig::default();
    config.validate().unwrap();
    config
}
