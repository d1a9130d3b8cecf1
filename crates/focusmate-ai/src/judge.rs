//! Language-model relevance judge for pages the semantic score cannot settle.

use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::ai_provider::AiProviderTrait;
use crate::rules::RuleSet;

const PROMPT_HEADER: &str = "\
You are FocusMate, a focus assistant deciding whether a web page helps the user \
with their current task.

Replace the initial semantic similarity score with your own corrected relevance \
score from 0 to 100. Do not average the two.

Reasoning order:
1. Read the page content first, then the title, then the URL.
2. Pages that are necessary to get the task done count as relevant even when \
their wording differs: API usage and billing pages, official documentation, \
account or authentication pages, environment setup, version control.
3. Documentation rule (highest priority): if the URL or title contains a \
documentation marker AND the domain belongs to a developer tool chain, the \
score MUST be between 70 and 90, whatever the similarity score says.
";

const PROMPT_FOOTER: &str = "
Respond with a JSON object only, no markdown:
{\"relevance_score_percent\": <integer 0-100>, \"reason\": \"<one short sentence>\"}";

/// Everything the judge sees about one page
#[derive(Debug, Clone)]
pub struct JudgeRequest<'a> {
    pub keywords: &'a str,
    pub title: &'a str,
    pub url: &'a str,
    pub snippet: Option<&'a str>,
    pub semantic_score: u8,
}

/// Corrected score and explanation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub score: u8,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge provider failed: {0}")]
    Provider(#[source] anyhow::Error),

    #[error("judge returned malformed output: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    relevance_score_percent: Option<f64>,
    reason: Option<String>,
}

/// Prompt builder and response parser around an [`AiProviderTrait`]
pub struct RelevanceJudge {
    provider: Arc<dyn AiProviderTrait>,
    rules: Arc<RuleSet>,
}

impl RelevanceJudge {
    #[must_use]
    pub fn new(provider: Arc<dyn AiProviderTrait>, rules: Arc<RuleSet>) -> Self {
        Self { provider, rules }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Whether the backend answers at all
    pub async fn is_available(&self) -> bool {
        self.provider.is_available().await
    }

    /// Ask the model for a corrected score
    ///
    /// # Errors
    ///
    /// `Provider` when the backend call fails, `Malformed` when the answer
    /// lacks a numeric score or a reason
    pub async fn judge(&self, request: &JudgeRequest<'_>) -> Result<Judgment, JudgeError> {
        let prompt = self.build_prompt(request);
        let response = self
            .provider
            .generate(&prompt)
            .await
            .map_err(JudgeError::Provider)?;
        parse_judgment(&response)
    }

    fn build_prompt(&self, request: &JudgeRequest<'_>) -> String {
        let mut prompt = String::from(PROMPT_HEADER);
        prompt.push_str(&format!(
            "\nDocumentation markers: {}\n",
            self.rules.keywords.documentation_markers.join(", ")
        ));
        prompt.push_str(&format!(
            "Developer tool chain domains (and their subdomains): {}\n",
            self.rules.domains.toolchain.join(", ")
        ));
        prompt.push_str(&format!(
            "\n<TASK_KEYWORDS>{}</TASK_KEYWORDS>\n\
             <WEBPAGE_TITLE>{}</WEBPAGE_TITLE>\n\
             <WEBPAGE_URL>{}</WEBPAGE_URL>\n\
             <WEBPAGE_CONTENT>{}</WEBPAGE_CONTENT>\n\
             <SEMANTIC_SIMILARITY_SCORE>{}</SEMANTIC_SIMILARITY_SCORE>\n",
            request.keywords,
            request.title,
            request.url,
            request.snippet.unwrap_or_default(),
            request.semantic_score
        ));
        prompt.push_str(PROMPT_FOOTER);
        prompt
    }
}

/// Parse the model answer, tolerating markdown code fences
///
/// # Errors
///
/// Returns `JudgeError::Malformed` when the JSON is invalid or incomplete
pub fn parse_judgment(response: &str) -> Result<Judgment, JudgeError> {
    let clean = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let raw: RawJudgment = serde_json::from_str(clean)
        .map_err(|e| JudgeError::Malformed(format!("{e}: {response}")))?;

    let score = raw
        .relevance_score_percent
        .filter(|s| s.is_finite())
        .ok_or_else(|| JudgeError::Malformed("missing relevance_score_percent".to_string()))?;
    let reason = raw
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| JudgeError::Malformed("missing reason".to_string()))?;

    // Clamped to 0..=100 before the cast
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = score.round().clamp(0.0, 100.0) as u8;

    Ok(Judgment { score, reason })
}
