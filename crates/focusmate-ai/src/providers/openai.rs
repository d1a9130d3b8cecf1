use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{parse_vector, ResponseExt};
use crate::ai_provider::AiProviderTrait;
use crate::embedding::EmbeddingProvider;

/// `OpenAI` API provider (also compatible with other OpenAI-compatible APIs)
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        api_key: &str,
        model: &str,
        embedding_model: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI")?
            .ensure_success("OpenAI")
            .await?;

        response
            .json()
            .await
            .context("Failed to parse OpenAI response")
    }
}

#[async_trait]
impl AiProviderTrait for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": prompt
            }],
            "response_format": { "type": "json_object" },
            "temperature": 0.2,
            "max_tokens": 150
        });

        let json = self.post("chat/completions", body).await?;

        // Extract text from: choices[0].message.content
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .context("Failed to extract text from OpenAI response")
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.embedding_model,
            "input": text
        });

        let json = self.post("embeddings", body).await?;

        // Extract vector from: data[0].embedding
        parse_vector(&json["data"][0]["embedding"])
            .context("Failed to extract embedding from OpenAI response")
    }
}
