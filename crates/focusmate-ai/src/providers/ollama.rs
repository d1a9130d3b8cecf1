use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{parse_vector, ResponseExt};
use crate::ai_provider::AiProviderTrait;
use crate::embedding::EmbeddingProvider;

/// Local Ollama Provider
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: Option<&str>, model: &str, embedding_model: &str, timeout: Duration) -> Self {
        // A builder failure only happens on TLS backend init; fall back to defaults
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {e}");
                Client::new()
            });
        Self {
            client,
            base_url: base_url
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Ollama")?
            .ensure_success("Ollama")
            .await?;

        response
            .json()
            .await
            .context("Failed to parse Ollama response")
    }
}

#[async_trait]
impl AiProviderTrait for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "format": "json",
            "stream": false,
            "options": { "temperature": 0.2 }
        });

        let json = self.post("api/generate", body).await?;

        // Extract text from: response
        json["response"]
            .as_str()
            .map(ToString::to_string)
            .context("Failed to extract text from Ollama response")
    }

    async fn is_available(&self) -> bool {
        // Ollama answers /api/tags whenever the server is up
        let url = format!("{}/api/tags", self.base_url);
        self.client.get(&url).send().await.is_ok()
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.embedding_model,
            "prompt": text
        });

        let json = self.post("api/embeddings", body).await?;

        parse_vector(&json["embedding"]).context("Failed to extract embedding from Ollama response")
    }
}
