//! HTTP adapters for language-model and embedding backends.

pub mod ollama;
pub mod openai;

use anyhow::Result;

/// Extension trait for `reqwest::Response` to handle common error patterns.
#[async_trait::async_trait]
pub trait ResponseExt {
    /// Ensure the response status is successful, returning an error with details if not.
    ///
    /// # Errors
    ///
    /// Returns an error if the response status is not 2xx, including the
    /// status code and response body in the message.
    async fn ensure_success(self, api_name: &str) -> Result<Self>
    where
        Self: Sized;
}

#[async_trait::async_trait]
impl ResponseExt for reqwest::Response {
    async fn ensure_success(self, api_name: &str) -> Result<Self> {
        if !self.status().is_success() {
            let status = self.status();
            let error_text = self.text().await.unwrap_or_default();
            anyhow::bail!("{api_name} API error ({status}): {error_text}");
        }
        Ok(self)
    }
}

/// Pull a float vector out of a JSON array
pub(crate) fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| {
            // Embedding components are well within f32 range
            #[allow(clippy::cast_possible_truncation)]
            v.as_f64().map(|f| f as f32)
        })
        .collect()
}
