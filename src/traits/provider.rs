use async_trait::async_trait;

/// Text generation backend: one prompt in, one completion out.
///
/// Implementations surface transport and decoding problems as errors; callers
/// in this crate treat any error as "no signal" and never retry.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;

    /// Identifier used in logs.
    fn model_name(&self) -> &str {
        "unknown"
    }
}
