pub mod ai_provider;
pub mod config;
pub mod embedding;
pub mod judge;
pub mod providers;
pub mod relevance;
pub mod rules;

pub use ai_provider::{create_embedding_provider, create_provider, AiProviderTrait};
pub use config::{AiConfig, AiProvider, EmbeddingBackend};
pub use embedding::{EmbeddingProvider, EmbeddingService};
pub use judge::{JudgeError, Judgment, RelevanceJudge};
pub use relevance::{
    Classification, ClassifyError, DecisionSource, PageRequest, RelevanceClassifier,
};
pub use rules::{extract_domain, Language, RuleSet};
