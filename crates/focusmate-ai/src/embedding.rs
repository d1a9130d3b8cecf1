use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Source of text embedding vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text; failure is reported as an error, never as an empty vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

const DEFAULT_MEMO_SIZE: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(v) => v,
    None => unreachable!(),
};

/// Calculate cosine similarity between two vectors
///
/// Returns a value in [-1.0, 1.0], or 0.0 for mismatched or zero vectors
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Similarity clamped to [0, 1] and scaled to an integer percentage
#[must_use]
pub fn similarity_score(a: &[f32], b: &[f32]) -> u8 {
    let similarity = cosine_similarity(a, b);
    let similarity = if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(0.0, 1.0)
    };
    // Bounded to 0..=100 by the clamp above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = (similarity * 100.0).round() as u8;
    score.min(100)
}

/// Text synthesized from the page for embedding
#[must_use]
pub fn page_text(title: &str, snippet: Option<&str>) -> String {
    match snippet.map(str::trim).filter(|s| !s.is_empty()) {
        Some(snippet) => format!("Title: {title}. Content: {snippet}"),
        None => format!("Title: {title}"),
    }
}

/// Embedding provider wrapper that memoizes vectors by input text
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    memo: Mutex<LruCache<String, Arc<Vec<f32>>>>,
}

impl EmbeddingService {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_capacity(provider, DEFAULT_MEMO_SIZE.get())
    }

    #[must_use]
    pub fn with_capacity(provider: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_MEMO_SIZE);
        Self {
            provider,
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `text`, reusing a memoized vector when available
    ///
    /// # Errors
    ///
    /// Returns the provider error; failed lookups are not memoized
    pub async fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(vector) = self.memo.lock().await.get(text) {
            log::debug!("Embedding memo hit ({} chars)", text.len());
            return Ok(Arc::clone(vector));
        }

        let vector = Arc::new(self.provider.embed(text).await?);
        if vector.is_empty() {
            anyhow::bail!("{} returned an empty embedding", self.provider.model_name());
        }
        self.memo
            .lock()
            .await
            .put(text.to_string(), Arc::clone(&vector));
        Ok(vector)
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedding;

#[cfg(feature = "local-embeddings")]
mod local {
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Arc, Mutex};

    use super::EmbeddingProvider;

    /// Offline embeddings with Multilingual-E5-Small, which handles Chinese
    /// focus keywords far better than English-only models
    pub struct LocalEmbedding {
        model: Arc<Mutex<TextEmbedding>>,
    }

    impl LocalEmbedding {
        /// Load the model, downloading it on first run (~100MB)
        ///
        /// # Errors
        ///
        /// Returns an error if the model fails to load or download
        pub fn new() -> Result<Self> {
            let model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::MultilingualE5Small)
                    .with_show_download_progress(true),
            )?;
            Ok(Self {
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let model = Arc::clone(&self.model);
            let text = text.to_string();
            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|e| anyhow::anyhow!("embedding model lock poisoned: {e}"))?;
                model
                    .embed(vec![text], None)?
                    .into_iter()
                    .next()
                    .context("Failed to generate embedding")
            })
            .await?
        }

        fn model_name(&self) -> &str {
            "multilingual-e5-small"
        }
    }
}
