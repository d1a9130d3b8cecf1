//! Relevance classification pipeline.
//!
//! A page is scored by embedding similarity against the focus keywords,
//! adjusted by the rule set, then either settled on the spot (fast pass,
//! fast block, interference search) or escalated to the language-model
//! judge. Provider failures never surface to the caller: they degrade to
//! the semantic score.

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use focusmate_storage::{CacheEntry, Verdict};

use crate::embedding::{page_text, similarity_score, EmbeddingService};
use crate::judge::{JudgeRequest, RelevanceJudge};
use crate::rules::{Language, PageSignals, RuleSet};

/// Score used when the embedding backend fails or times out
const NEUTRAL_SEMANTIC_SCORE: u8 = 50;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// One page to classify
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub keywords: String,
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
}

impl PageRequest {
    #[must_use]
    pub fn new(keywords: &str, title: &str, url: &str) -> Self {
        Self {
            keywords: keywords.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            snippet: None,
        }
    }

    #[must_use]
    pub fn with_snippet(mut self, snippet: Option<String>) -> Self {
        self.snippet = snippet;
        self
    }
}

/// Which stage of the pipeline settled the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    InterferenceSearch,
    FastPass,
    FastBlock,
    Judge,
    Fallback,
    Cache,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InterferenceSearch => "interference-search",
            Self::FastPass => "fast-pass",
            Self::FastBlock => "fast-block",
            Self::Judge => "judge",
            Self::Fallback => "fallback",
            Self::Cache => "cache",
        };
        write!(f, "{name}")
    }
}

/// Result of classifying one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub score: u8,
    pub status: Verdict,
    pub reason: String,
    /// One-shot request for a grace period, never cached
    pub requires_grace_period: bool,
    pub source: DecisionSource,
}

impl Classification {
    fn new(score: u8, status: Verdict, reason: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            score,
            status,
            reason: reason.into(),
            requires_grace_period: false,
            source,
        }
    }

    /// Cacheable form, without the grace-period flag
    #[must_use]
    pub fn to_cache_entry(&self, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            score: self.score,
            status: self.status,
            reason: self.reason.clone(),
            timestamp: now,
        }
    }
}

impl From<&CacheEntry> for Classification {
    fn from(entry: &CacheEntry) -> Self {
        Self::new(entry.score, entry.status, entry.reason.clone(), DecisionSource::Cache)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Classifier combining embeddings, rules and the optional judge
pub struct RelevanceClassifier {
    rules: Arc<RuleSet>,
    embeddings: Arc<EmbeddingService>,
    judge: Option<RelevanceJudge>,
    timeout: Duration,
}

impl RelevanceClassifier {
    /// Without a judge every escalation takes the fallback path
    #[must_use]
    pub fn new(
        rules: Arc<RuleSet>,
        embeddings: Arc<EmbeddingService>,
        judge: Option<RelevanceJudge>,
    ) -> Self {
        Self {
            rules,
            embeddings,
            judge,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Upper bound for each embedding and judge call
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Reachability of the judge backend, `None` when no judge is wired in
    pub async fn judge_available(&self) -> Option<bool> {
        match &self.judge {
            Some(judge) => Some(judge.is_available().await),
            None => None,
        }
    }

    /// Classify a page
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError::MissingField` for blank keywords, title or URL,
    /// before any provider is contacted
    pub async fn classify(&self, request: &PageRequest) -> Result<Classification, ClassifyError> {
        validate(request)?;

        let semantic = self.semantic_score(request).await;
        let signals = self.rules.signals(
            &request.url,
            &request.title,
            request.snippet.as_deref(),
        );
        let language = Language::detect(&request.keywords);
        let messages = self.rules.messages(language);
        let t = &self.rules.thresholds;

        log::debug!(
            "Classifying {} (semantic={semantic}, domain={:?}, meta={}, toolchain_kw={})",
            request.url,
            signals.domain,
            signals.meta_task_keyword,
            signals.toolchain_keyword
        );

        if signals.meta_task_keyword && signals.interference_domain {
            log::debug!("Interference search on {:?}, granting grace period", signals.domain);
            let mut result = Classification::new(
                t.interference_score,
                Verdict::Stay,
                messages.interference_search.clone(),
                DecisionSource::InterferenceSearch,
            );
            result.requires_grace_period = true;
            return Ok(result);
        }

        let adjusted = self.adjust_score(semantic, &signals);

        if adjusted >= t.fast_pass {
            log::debug!("Fast pass at {adjusted}");
            return Ok(Classification::new(
                t.fast_pass_score,
                Verdict::Stay,
                messages.fast_pass.clone(),
                DecisionSource::FastPass,
            ));
        }

        if adjusted <= t.fast_block && !signals.toolchain_domain {
            log::debug!("Fast block at {adjusted}");
            return Ok(Classification::new(
                t.fast_block_score,
                Verdict::Block,
                messages.fast_block.clone(),
                DecisionSource::FastBlock,
            ));
        }

        Ok(self.escalate(request, adjusted, &signals).await)
    }

    /// Embedding similarity of keywords and page text, neutral on provider failure
    pub async fn semantic_score(&self, request: &PageRequest) -> u8 {
        let text = page_text(&request.title, request.snippet.as_deref());
        let (keywords, page) = tokio::join!(
            tokio::time::timeout(self.timeout, self.embeddings.embed(&request.keywords)),
            tokio::time::timeout(self.timeout, self.embeddings.embed(&text)),
        );

        match (keywords, page) {
            (Ok(Ok(a)), Ok(Ok(b))) => similarity_score(&a, &b),
            (Err(_), _) | (_, Err(_)) => {
                log::warn!(
                    "Embedding timed out after {:?}, using neutral score",
                    self.timeout
                );
                NEUTRAL_SEMANTIC_SCORE
            }
            (Ok(Err(e)), _) | (_, Ok(Err(e))) => {
                log::warn!("Embedding failed ({e:#}), using neutral score");
                NEUTRAL_SEMANTIC_SCORE
            }
        }
    }

    /// Meta-task override first, then the toolchain-keyword override
    fn adjust_score(&self, semantic: u8, signals: &PageSignals) -> u8 {
        let t = &self.rules.thresholds;
        if signals.interference_domain {
            return semantic;
        }
        if signals.meta_task_keyword && semantic < t.fast_pass {
            log::debug!("Meta-task override: {semantic} -> {}", t.meta_task_floor);
            return t.meta_task_floor;
        }
        if signals.toolchain_keyword && semantic <= t.toolchain_trigger {
            log::debug!("Toolchain override: {semantic} -> {}", t.toolchain_floor);
            return t.toolchain_floor;
        }
        semantic
    }

    async fn escalate(
        &self,
        request: &PageRequest,
        semantic: u8,
        signals: &PageSignals,
    ) -> Classification {
        let t = &self.rules.thresholds;
        let fallback = || {
            Classification::new(
                semantic,
                Verdict::from_score(semantic, t.stay_threshold),
                self.rules.messages(Language::English).fallback.clone(),
                DecisionSource::Fallback,
            )
        };

        let Some(judge) = &self.judge else {
            log::debug!("No judge configured, falling back to semantic score {semantic}");
            return fallback();
        };

        let judge_request = JudgeRequest {
            keywords: &request.keywords,
            title: &request.title,
            url: &request.url,
            snippet: request.snippet.as_deref(),
            semantic_score: semantic,
        };

        let judgment = match tokio::time::timeout(self.timeout, judge.judge(&judge_request)).await {
            Ok(Ok(judgment)) => judgment,
            Ok(Err(e)) => {
                log::warn!("Judge unavailable ({e}), falling back to semantic score {semantic}");
                return fallback();
            }
            Err(_) => {
                log::warn!("Judge timed out after {:?}, falling back", self.timeout);
                return fallback();
            }
        };

        let score = if signals.documentation_page {
            let clamped = judgment
                .score
                .clamp(t.documentation_min, t.documentation_max);
            if clamped != judgment.score {
                log::debug!(
                    "Documentation rule: judge score {} -> {clamped}",
                    judgment.score
                );
            }
            clamped
        } else {
            judgment.score
        };

        log::debug!("Judge scored {} at {score} (semantic {semantic})", request.url);
        Classification::new(
            score,
            Verdict::from_score(score, t.stay_threshold),
            judgment.reason,
            DecisionSource::Judge,
        )
    }
}

fn validate(request: &PageRequest) -> Result<(), ClassifyError> {
    if request.keywords.trim().is_empty() {
        return Err(ClassifyError::MissingField("keywords"));
    }
    if request.title.trim().is_empty() {
        return Err(ClassifyError::MissingField("title"));
    }
    if request.url.trim().is_empty() {
        return Err(ClassifyError::MissingField("url"));
    }
    Ok(())
}
