use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{AiConfig, AiProvider, EmbeddingBackend};
use crate::embedding::EmbeddingProvider;
use crate::providers::{ollama::OllamaProvider, openai::OpenAiProvider};

/// Trait for AI providers
#[async_trait]
pub trait AiProviderTrait: Send + Sync {
    /// Generate text response for a given prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Get the model name being used
    fn model_name(&self) -> &str;

    /// Check if the provider is available
    async fn is_available(&self) -> bool {
        true
    }
}

/// Create the judge backend from configuration
///
/// # Errors
///
/// Returns an error if the API key is missing for `OpenAI`
pub fn create_provider(config: &AiConfig) -> Result<Arc<dyn AiProviderTrait>> {
    match config.provider {
        AiProvider::OpenAi => Ok(Arc::new(openai(config)?)),
        AiProvider::Ollama => Ok(Arc::new(ollama(config))),
    }
}

/// Create the embedding backend from configuration
///
/// # Errors
///
/// Returns an error if the API key is missing for `OpenAI`, or if local
/// embeddings are requested from a build without them
pub fn create_embedding_provider(config: &AiConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match (config.embeddings, config.provider) {
        (EmbeddingBackend::Local, _) => local_embedding(),
        (EmbeddingBackend::Provider, AiProvider::OpenAi) => Ok(Arc::new(openai(config)?)),
        (EmbeddingBackend::Provider, AiProvider::Ollama) => Ok(Arc::new(ollama(config))),
    }
}

#[cfg(feature = "local-embeddings")]
fn local_embedding() -> Result<Arc<dyn EmbeddingProvider>> {
    let model = crate::embedding::LocalEmbedding::new()
        .context("Failed to load local embedding model")?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_embedding() -> Result<Arc<dyn EmbeddingProvider>> {
    anyhow::bail!("Local embeddings need a build with `--features local-embeddings`")
}

fn openai(config: &AiConfig) -> Result<OpenAiProvider> {
    let api_key = config
        .effective_api_key()
        .context("API Key required for OpenAI (set ai.api_key or OPENAI_API_KEY)")?;
    OpenAiProvider::new(
        &api_key,
        config.effective_model(),
        config.effective_embedding_model(),
        Some(config.effective_base_url()),
        config.timeout(),
    )
}

fn ollama(config: &AiConfig) -> OllamaProvider {
    OllamaProvider::new(
        Some(config.effective_base_url()),
        config.effective_model(),
        config.effective_embedding_model(),
        config.timeout(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_needs_no_key() {
        let config = AiConfig {
            provider: AiProvider::Ollama,
            ..AiConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "llama3.2");
        let embedder = create_embedding_provider(&config).unwrap();
        assert_eq!(embedder.model_name(), "nomic-embed-text");
    }

    #[test]
    fn test_openai_with_explicit_key() {
        let config = AiConfig {
            api_key: Some("sk-test".to_string()),
            ..AiConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_local_embeddings_need_feature() {
        let config = AiConfig {
            provider: AiProvider::Ollama,
            embeddings: EmbeddingBackend::Local,
            ..AiConfig::default()
        };
        let err = create_embedding_provider(&config).err().unwrap();
        assert!(err.to_string().contains("local-embeddings"));
        // The judge still uses the configured provider
        assert_eq!(create_provider(&config).unwrap().model_name(), "llama3.2");
    }
}
