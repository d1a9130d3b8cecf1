use serde::{Deserialize, Serialize};

/// Supported language-model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    OpenAi,
    Ollama,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// Where semantic-score embeddings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// The configured `provider`
    #[default]
    Provider,
    /// Offline fastembed model; needs the `local-embeddings` feature
    Local,
}

/// `[ai]` section of the application config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub embeddings: EmbeddingBackend,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// When disabled every escalation takes the fallback path
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            embeddings: EmbeddingBackend::default(),
            model: None,
            embedding_model: None,
            api_key: None,
            base_url: None,
            enabled: true,
            timeout_secs: 15,
        }
    }
}

impl AiConfig {
    #[must_use]
    pub fn effective_model(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, AiProvider::OpenAi) => "gpt-4o-mini",
            (None, AiProvider::Ollama) => "llama3.2",
        }
    }

    #[must_use]
    pub fn effective_embedding_model(&self) -> &str {
        match (&self.embedding_model, self.provider) {
            (Some(model), _) => model,
            (None, AiProvider::OpenAi) => "text-embedding-3-small",
            (None, AiProvider::Ollama) => "nomic-embed-text",
        }
    }

    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url,
            (None, AiProvider::OpenAi) => "https://api.openai.com/v1",
            (None, AiProvider::Ollama) => "http://localhost:11434",
        }
    }

    /// Configured key, falling back to `OPENAI_API_KEY`
    #[must_use]
    pub fn effective_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }

    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_per_provider() {
        let openai = AiConfig::default();
        assert_eq!(openai.effective_model(), "gpt-4o-mini");
        assert_eq!(openai.effective_embedding_model(), "text-embedding-3-small");
        assert_eq!(openai.effective_base_url(), "https://api.openai.com/v1");

        let ollama = AiConfig {
            provider: AiProvider::Ollama,
            ..AiConfig::default()
        };
        assert_eq!(ollama.effective_base_url(), "http://localhost:11434");
        assert_eq!(ollama.effective_embedding_model(), "nomic-embed-text");
    }

    #[test]
    fn test_explicit_values_win() {
        let config = AiConfig {
            model: Some("gpt-4.1".to_string()),
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://proxy.local/v1".to_string()),
            ..AiConfig::default()
        };
        assert_eq!(config.effective_model(), "gpt-4.1");
        assert_eq!(config.effective_api_key().as_deref(), Some("sk-test"));
        assert_eq!(config.effective_base_url(), "http://proxy.local/v1");
    }

    #[test]
    fn test_partial_toml() {
        let config: AiConfig = toml::from_str("provider = \"ollama\"\ntimeout_secs = 0").unwrap();
        assert_eq!(config.provider, AiProvider::Ollama);
        assert_eq!(config.embeddings, EmbeddingBackend::Provider);
        assert!(config.enabled);
        assert_eq!(config.timeout(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_local_embeddings_toml() {
        let config: AiConfig = toml::from_str("embeddings = \"local\"").unwrap();
        assert_eq!(config.embeddings, EmbeddingBackend::Local);
        assert_eq!(config.provider, AiProvider::OpenAi);
    }
}
