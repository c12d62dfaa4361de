mod error;
mod openai_compatible;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::warn;

pub use error::{ProviderError, ProviderErrorKind};
pub use openai_compatible::OpenAiCompatibleProvider;

use crate::config::LlmConfig;
use crate::traits::TextGenerator;

/// Build an HTTP client with a panic-safe fallback when system proxy discovery
/// is unavailable in the runtime environment.
pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, String> {
    if cfg!(test)
        || matches!(
            std::env::var("RAPPORT_DISABLE_SYSTEM_PROXY_DISCOVERY").as_deref(),
            Ok("1") | Ok("true") | Ok("TRUE")
        )
    {
        return Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e));
    }

    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => return Ok(client),
        Ok(Err(e)) => {
            warn!(
                error = %e,
                "HTTP client build with system proxy support failed; retrying with proxy discovery disabled"
            );
        }
        Err(_) => {
            warn!(
                "HTTP client build panicked during system proxy discovery; retrying with proxy discovery disabled"
            );
        }
    }

    Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Build the generator described by an `[llm]`-shaped config section.
pub fn build_generator(config: &LlmConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    let provider = OpenAiCompatibleProvider::new(
        &config.base_url,
        &config.api_key,
        &config.model,
        Duration::from_secs(config.request_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!(e))?;
    Ok(Arc::new(provider))
}
