use super::*;
use crate::ai_provider::AiProviderTrait;
use crate::embedding::EmbeddingProvider;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Embeds the focus keywords as a unit vector and every other text at a
/// fixed angle, so the semantic score is exactly `percent`
struct FixedSimilarity {
    keywords: String,
    percent: u8,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FixedSimilarity {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text == self.keywords {
            return Ok(vec![1.0, 0.0]);
        }
        let cos = f32::from(self.percent) / 100.0;
        Ok(vec![cos, (1.0 - cos * cos).sqrt()])
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

struct FailingEmbedding;

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding backend down")
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

enum Script {
    Answer(&'static str),
    Fail,
    Hang,
}

struct ScriptedJudge {
    script: Script,
    calls: AtomicUsize,
}

#[async_trait]
impl AiProviderTrait for ScriptedJudge {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Answer(text) => Ok(text.to_string()),
            Script::Fail => anyhow::bail!("judge backend down"),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                anyhow::bail!("unreachable in practice")
            }
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        !matches!(self.script, Script::Fail)
    }
}

struct Harness {
    classifier: RelevanceClassifier,
    embedder: Arc<FixedSimilarity>,
    judge: Arc<ScriptedJudge>,
}

fn harness(keywords: &str, percent: u8, script: Script) -> Harness {
    let rules = Arc::new(RuleSet::builtin().unwrap());
    let embedder = Arc::new(FixedSimilarity {
        keywords: keywords.to_string(),
        percent,
        calls: AtomicUsize::new(0),
    });
    let judge = Arc::new(ScriptedJudge {
        script,
        calls: AtomicUsize::new(0),
    });
    let classifier = RelevanceClassifier::new(
        Arc::clone(&rules),
        Arc::new(EmbeddingService::new(embedder.clone())),
        Some(RelevanceJudge::new(judge.clone(), rules)),
    );
    Harness {
        classifier,
        embedder,
        judge,
    }
}

fn judge_calls(h: &Harness) -> usize {
    h.judge.calls.load(Ordering::SeqCst)
}

const JUDGE_30: Script = Script::Answer(r#"{"relevance_score_percent": 30, "reason": "Weak match"}"#);
const JUDGE_95: Script = Script::Answer(r#"{"relevance_score_percent": 95, "reason": "Core docs"}"#);
const JUDGE_60: Script = Script::Answer(r#"{"relevance_score_percent": 60, "reason": "Useful"}"#);

// ============================================================================
// Input validation tests
// ============================================================================

#[tokio::test]
async fn test_missing_fields_rejected_before_providers() {
    let h = harness("rust", 90, JUDGE_60);

    let cases = [
        (PageRequest::new("  ", "Title", "https://example.org"), "keywords"),
        (PageRequest::new("rust", "", "https://example.org"), "title"),
        (PageRequest::new("rust", "Title", " "), "url"),
    ];
    for (request, field) in cases {
        assert_eq!(
            h.classifier.classify(&request).await,
            Err(ClassifyError::MissingField(field))
        );
    }
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(judge_calls(&h), 0);
}

// ============================================================================
// Semantic score tests
// ============================================================================

#[tokio::test]
async fn test_semantic_score_is_deterministic() {
    let h = harness("rust ownership", 63, JUDGE_60);
    let request = PageRequest::new("rust ownership", "The Book", "https://example.org/book")
        .with_snippet(Some("Ownership rules".to_string()));

    let first = h.classifier.semantic_score(&request).await;
    let second = h.classifier.semantic_score(&request).await;
    assert_eq!(first, 63);
    assert_eq!(first, second);
    // Second call is served from the embedding memo
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_embedding_failure_is_neutral() {
    let rules = Arc::new(RuleSet::builtin().unwrap());
    let classifier = RelevanceClassifier::new(
        rules,
        Arc::new(EmbeddingService::new(Arc::new(FailingEmbedding))),
        None,
    );
    let request = PageRequest::new("rust", "Cute cats", "https://example.org/cats");

    assert_eq!(classifier.semantic_score(&request).await, NEUTRAL_SEMANTIC_SCORE);
    let result = classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Fallback);
    assert_eq!(result.score, 50);
    assert_eq!(result.status, Verdict::Stay);
}

// ============================================================================
// Interference search tests
// ============================================================================

#[tokio::test]
async fn test_interference_search_grants_grace_period() {
    let h = harness("vercel billing", 5, JUDGE_30);
    let request = PageRequest::new("vercel billing", "Weibo search", "https://weibo.com/search?q=vercel");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.score, 50);
    assert_eq!(result.status, Verdict::Stay);
    assert!(result.requires_grace_period);
    assert_eq!(result.source, DecisionSource::InterferenceSearch);
    assert_eq!(judge_calls(&h), 0);
}

#[tokio::test]
async fn test_interference_search_ignores_high_semantic_score() {
    let h = harness("vercel billing", 99, JUDGE_30);
    let request = PageRequest::new("vercel billing", "Weibo", "https://s.weibo.com/weibo?q=billing");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.score, 50);
    assert!(result.requires_grace_period);
}

#[tokio::test]
async fn test_interference_reason_localized() {
    let rules = RuleSet::builtin().unwrap();
    let chinese_keywords = rules.keywords.meta_task.chinese[1].clone();
    let h = harness(&chinese_keywords, 10, JUDGE_30);
    let url = format!("https://weibo.com/search?q={chinese_keywords}");
    let request = PageRequest::new(&chinese_keywords, "Weibo", &url);

    let result = h.classifier.classify(&request).await.unwrap();
    assert!(result.requires_grace_period);
    assert_eq!(result.reason, rules.messages.zh.interference_search);
}

#[tokio::test]
async fn test_interference_domain_without_meta_keyword_is_not_grace() {
    let h = harness("rust", 10, JUDGE_30);
    let request = PageRequest::new("rust", "Funny clips", "https://www.youtube.com/watch?v=1");

    let result = h.classifier.classify(&request).await.unwrap();
    assert!(!result.requires_grace_period);
    assert_eq!(result.source, DecisionSource::FastBlock);
    assert_eq!(result.score, 15);
    assert_eq!(result.status, Verdict::Block);
}

// ============================================================================
// Tier boundary tests
// ============================================================================

#[tokio::test]
async fn test_fast_pass_at_75() {
    let h = harness("rust ownership", 75, JUDGE_30);
    let request = PageRequest::new("rust ownership", "Ownership in depth", "https://example.org/x");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::FastPass);
    assert_eq!(result.score, 90);
    assert_eq!(result.status, Verdict::Stay);
    assert!(!result.requires_grace_period);
    assert_eq!(judge_calls(&h), 0);
}

#[tokio::test]
async fn test_74_escalates() {
    let h = harness("rust ownership", 74, JUDGE_60);
    let request = PageRequest::new("rust ownership", "Ownership in depth", "https://example.org/x");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Judge);
    assert_eq!(result.score, 60);
    assert_eq!(result.reason, "Useful");
    assert_eq!(judge_calls(&h), 1);
}

#[tokio::test]
async fn test_fast_block_at_20_on_plain_domain() {
    let h = harness("rust ownership", 20, JUDGE_60);
    let request = PageRequest::new("rust ownership", "Cute cats", "https://example.org/cats");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::FastBlock);
    assert_eq!(result.score, 15);
    assert_eq!(result.status, Verdict::Block);
    assert_eq!(judge_calls(&h), 0);
}

#[tokio::test]
async fn test_21_on_plain_domain_escalates() {
    let h = harness("rust ownership", 21, JUDGE_30);
    let request = PageRequest::new("rust ownership", "Cute cats", "https://example.org/cats");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Judge);
    assert_eq!(result.status, Verdict::Block);
}

#[tokio::test]
async fn test_20_on_toolchain_domain_escalates() {
    let h = harness("rust ownership", 20, JUDGE_60);
    let request = PageRequest::new("rust ownership", "Company update", "https://anthropic.com/news/x");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Judge);
    assert_eq!(result.score, 60);
    assert_eq!(judge_calls(&h), 1);
}

// ============================================================================
// Override tests
// ============================================================================

#[tokio::test]
async fn test_meta_task_override_lifts_into_band() {
    let h = harness("rust ownership", 5, Script::Fail);
    let request = PageRequest::new("rust ownership", "Account settings", "https://example.org/settings");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Fallback);
    assert_eq!(result.score, 50);
    assert_eq!(result.status, Verdict::Stay);
    assert_eq!(result.reason, "fallback");
}

#[tokio::test]
async fn test_meta_task_override_applies_before_toolchain_override() {
    // "settings" is meta-task, "react" is a toolchain keyword
    let h = harness("rust ownership", 10, Script::Fail);
    let request = PageRequest::new("rust ownership", "React settings", "https://example.org/a");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.score, 50);
}

#[tokio::test]
async fn test_toolchain_keyword_override() {
    let h = harness("rust ownership", 30, Script::Fail);
    let request = PageRequest::new("rust ownership", "React hooks reference", "https://example.org/hooks");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Fallback);
    assert_eq!(result.score, 40);
    assert_eq!(result.status, Verdict::Block);
}

#[tokio::test]
async fn test_toolchain_keyword_override_trigger_boundary() {
    let h = harness("rust ownership", 36, Script::Fail);
    let request = PageRequest::new("rust ownership", "React hooks reference", "https://example.org/hooks");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.score, 36);
}

#[tokio::test]
async fn test_meta_task_does_not_lower_fast_pass() {
    let h = harness("rust ownership", 80, Script::Fail);
    let request = PageRequest::new("rust ownership", "Account settings", "https://example.org/settings");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::FastPass);
}

// ============================================================================
// Judge path tests
// ============================================================================

#[tokio::test]
async fn test_documentation_rule_lifts_low_judgment() {
    let h = harness("rust ownership", 15, JUDGE_30);
    let request = PageRequest::new("rust ownership", "Errors", "https://vercel.com/docs/errors/x");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Judge);
    assert!((70..=90).contains(&result.score));
    assert_eq!(result.score, 70);
    assert_eq!(result.status, Verdict::Stay);
}

#[tokio::test]
async fn test_documentation_rule_caps_high_judgment() {
    let h = harness("rust ownership", 15, JUDGE_95);
    let request = PageRequest::new("rust ownership", "Docs", "https://vercel.com/docs");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.score, 90);
}

#[tokio::test]
async fn test_judge_malformed_output_falls_back() {
    let h = harness("rust ownership", 45, Script::Answer("I think it's fine"));
    let request = PageRequest::new("rust ownership", "Something", "https://example.org/x");

    let result = h.classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Fallback);
    assert_eq!(result.score, 45);
    assert_eq!(result.status, Verdict::Block);
    assert_eq!(result.reason, "fallback");
}

#[tokio::test(start_paused = true)]
async fn test_judge_timeout_falls_back() {
    let h = harness("rust ownership", 55, Script::Hang);
    let classifier = h.classifier.with_timeout(Duration::from_secs(5));
    let request = PageRequest::new("rust ownership", "Something", "https://example.org/x");

    let result = classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Fallback);
    assert_eq!(result.score, 55);
    assert_eq!(result.status, Verdict::Stay);
}

#[tokio::test]
async fn test_no_judge_configured() {
    let rules = Arc::new(RuleSet::builtin().unwrap());
    let embedder = Arc::new(FixedSimilarity {
        keywords: "rust".to_string(),
        percent: 40,
        calls: AtomicUsize::new(0),
    });
    let classifier =
        RelevanceClassifier::new(rules, Arc::new(EmbeddingService::new(embedder)), None);
    let request = PageRequest::new("rust", "Something", "https://example.org/x");

    let result = classifier.classify(&request).await.unwrap();
    assert_eq!(result.source, DecisionSource::Fallback);
    assert_eq!(result.score, 40);
    assert_eq!(result.status, Verdict::Block);
}

// ============================================================================
// Cache conversion tests
// ============================================================================

#[test]
fn test_cache_entry_drops_grace_flag() {
    let result = Classification {
        score: 50,
        status: Verdict::Stay,
        reason: "search".to_string(),
        requires_grace_period: true,
        source: DecisionSource::InterferenceSearch,
    };
    let now = Utc::now();
    let entry = result.to_cache_entry(now);
    let restored = Classification::from(&entry);

    assert_eq!(restored.score, 50);
    assert_eq!(restored.reason, "search");
    assert!(!restored.requires_grace_period);
    assert_eq!(restored.source, DecisionSource::Cache);
}

// ============================================================================
// Judge availability tests
// ============================================================================

#[tokio::test]
async fn test_judge_availability_reported() {
    let up = harness("rust", 50, JUDGE_60);
    assert_eq!(up.classifier.judge_available().await, Some(true));

    let down = harness("rust", 50, Script::Fail);
    assert_eq!(down.classifier.judge_available().await, Some(false));

    let rules = Arc::new(RuleSet::builtin().unwrap());
    let embedder = Arc::new(FixedSimilarity {
        keywords: "rust".to_string(),
        percent: 50,
        calls: AtomicUsize::new(0),
    });
    let without = RelevanceClassifier::new(rules, Arc::new(EmbeddingService::new(embedder)), None);
    assert_eq!(without.judge_available().await, None);
    assert_eq!(judge_calls(&up), 0);
}
