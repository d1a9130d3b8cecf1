use super::*;
use crate::clock::ManualClock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use focusmate_ai::{EmbeddingProvider, EmbeddingService, RuleSet};
use focusmate_storage::{MemoryStore, Phase};

const BOOK: &str = "https://doc.rust-lang.org/book/ch04-01-what-is-ownership.html";
const GOSSIP: &str = "https://gossip.example.com/celebrities";
const WEIBO: &str = "https://weibo.com/search?q=vercel";

/// Scores pages by their title: ownership pages match, gossip does not
struct TitleSimilarity;

#[async_trait]
impl EmbeddingProvider for TitleSimilarity {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if !text.starts_with("Title:") {
            // Focus keywords
            return Ok(vec![1.0, 0.0]);
        }
        let cos: f32 = if text.contains("Ownership") {
            0.9
        } else if text.contains("gossip") {
            0.1
        } else {
            0.6
        };
        Ok(vec![cos, (1.0 - cos * cos).sqrt()])
    }

    fn model_name(&self) -> &str {
        "title-similarity"
    }
}

enum Extraction {
    Page(PageContent),
    Fail,
    Hang,
}

struct FakeExtractor(Extraction);

#[async_trait]
impl ContentExtractor for FakeExtractor {
    async fn extract(&self, _url: &str) -> anyhow::Result<PageContent> {
        match &self.0 {
            Extraction::Page(content) => Ok(content.clone()),
            Extraction::Fail => anyhow::bail!("tab is gone"),
            Extraction::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                anyhow::bail!("unreachable in practice")
            }
        }
    }
}

struct Harness {
    assistant: FocusAssistant,
    sources: EventSources,
    events: broadcast::Receiver<FocusEvent>,
    clock: Arc<ManualClock>,
}

fn start() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn harness_with(extraction: Extraction) -> Harness {
    let rules = Arc::new(RuleSet::builtin().unwrap());
    let embeddings = Arc::new(EmbeddingService::new(Arc::new(TitleSimilarity)));
    let classifier = Arc::new(RelevanceClassifier::new(rules, embeddings, None));
    let clock = Arc::new(ManualClock::new(start()));

    let (assistant, sources) = FocusAssistant::new(
        &AppConfig::default(),
        Arc::new(MemoryStore::new()),
        classifier,
        Arc::new(FakeExtractor(extraction)),
        clock.clone(),
    );
    let events = assistant.subscribe();
    Harness {
        assistant,
        sources,
        events,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(Extraction::Fail)
}

impl Harness {
    async fn focus_on(&mut self, keywords: &str) {
        self.assistant
            .dispatch(Command::InitFocus {
                keywords: keywords.to_string(),
            })
            .await
            .unwrap();
        self.drain();
    }

    async fn check(&self, tab: TabId, url: &str, title: &str) -> Response {
        self.assistant
            .dispatch(Command::CheckRelevance {
                tab,
                url: url.to_string(),
                title: title.to_string(),
                content: None,
            })
            .await
            .unwrap()
    }

    async fn blocked_count(&self) -> u64 {
        match self.assistant.dispatch(Command::GetStatistics).await.unwrap() {
            Response::Statistics(stats) => stats.blocked_count,
            other => panic!("unexpected response {other:?}"),
        }
    }

    fn drain(&mut self) -> Vec<FocusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn relevance(response: Response) -> (Classification, bool) {
    match response {
        Response::Relevance { result, cached } => (result, cached),
        other => panic!("expected a relevance result, got {other:?}"),
    }
}

// ============================================================================
// Skipping
// ============================================================================

#[test]
fn test_internal_pages() {
    assert!(is_internal_page("chrome://settings"));
    assert!(is_internal_page("  about:blank"));
    assert!(is_internal_page("MOZ-EXTENSION://abc/popup.html"));
    assert!(!is_internal_page(BOOK));
    assert!(!is_internal_page("about"));
}

#[tokio::test]
async fn test_check_without_session_is_skipped() {
    let mut h = harness();
    let response = h.check(1, BOOK, "Ownership").await;
    assert_eq!(response, Response::Skipped(SkipReason::NoSession));
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn test_internal_page_is_skipped() {
    let mut h = harness();
    h.focus_on("rust ownership").await;
    let response = h.check(1, "chrome-extension://abc/options.html", "Options").await;
    assert_eq!(response, Response::Skipped(SkipReason::InternalPage));
    assert!(h.drain().is_empty());
}

// ============================================================================
// Outcomes
// ============================================================================

#[tokio::test]
async fn test_relevant_page_clears_ui() {
    let mut h = harness();
    h.focus_on("rust ownership").await;

    let (result, cached) = relevance(h.check(1, BOOK, "What is Ownership?").await);
    assert!(!cached);
    assert_eq!(result.status, Verdict::Stay);
    assert_eq!(result.source, DecisionSource::FastPass);

    let events = h.drain();
    assert!(matches!(events[0], FocusEvent::Classified { tab: 1, .. }));
    assert_eq!(events[1], FocusEvent::ClearUi { tab: 1 });
}

#[tokio::test]
async fn test_block_counts_and_shows() {
    let mut h = harness();
    h.focus_on("rust ownership").await;

    let (result, _) = relevance(h.check(3, GOSSIP, "Celebrity gossip roundup").await);
    assert_eq!(result.status, Verdict::Block);
    assert_eq!(h.blocked_count().await, 1);

    let events = h.drain();
    assert!(events.contains(&FocusEvent::ShowBlock {
        tab: 3,
        reason: result.reason.clone(),
        score: 15,
    }));
}

#[tokio::test]
async fn test_cache_hit_sends_no_ui_signal() {
    let mut h = harness();
    h.focus_on("rust ownership").await;

    h.check(3, GOSSIP, "Celebrity gossip roundup").await;
    h.drain();

    let (result, cached) = relevance(h.check(3, GOSSIP, "Celebrity gossip roundup").await);
    assert!(cached);
    assert_eq!(result.source, DecisionSource::Cache);
    assert!(h.drain().is_empty());
    // Only the first visit counted
    assert_eq!(h.blocked_count().await, 1);
}

#[tokio::test]
async fn test_fragment_shares_cache_entry() {
    let mut h = harness();
    h.focus_on("rust ownership").await;

    h.check(1, BOOK, "What is Ownership?").await;
    let (_, cached) = relevance(
        h.check(1, &format!("{BOOK}#the-stack-and-the-heap"), "What is Ownership?")
            .await,
    );
    assert!(cached);
}

// ============================================================================
// Content extraction
// ============================================================================

#[tokio::test]
async fn test_failed_extraction_uses_tab_title() {
    let mut h = harness_with(Extraction::Fail);
    h.focus_on("rust ownership").await;

    let (result, _) = relevance(h.check(1, BOOK, "Ownership basics").await);
    assert_eq!(result.source, DecisionSource::FastPass);
}

#[tokio::test(start_paused = true)]
async fn test_hung_extraction_times_out() {
    let mut h = harness_with(Extraction::Hang);
    h.focus_on("rust ownership").await;

    let (result, _) = relevance(h.check(1, BOOK, "Ownership basics").await);
    assert_eq!(result.source, DecisionSource::FastPass);
}

#[tokio::test]
async fn test_extracted_heading_used_as_title() {
    let content = PageContent {
        title: String::new(),
        content_snippet: String::new(),
        h1: Some("Understanding Ownership".to_string()),
        description: None,
    };
    let mut h = harness_with(Extraction::Page(content));
    h.focus_on("rust ownership").await;

    let (result, _) = relevance(h.check(1, BOOK, "Loading...").await);
    assert_eq!(result.source, DecisionSource::FastPass);
}

#[tokio::test]
async fn test_blank_title_rejected() {
    let mut h = harness();
    h.focus_on("rust ownership").await;

    let err = h
        .assistant
        .dispatch(Command::CheckRelevance {
            tab: 1,
            url: BOOK.to_string(),
            title: "  ".to_string(),
            content: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AssistantError::Classify(ClassifyError::MissingField("title"))
    ));
    assert!(h.drain().is_empty());
}

// ============================================================================
// Grace period
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_interference_search_forced_block_after_grace() {
    let mut h = harness();
    h.focus_on("vercel billing").await;

    let (result, _) = relevance(h.check(5, WEIBO, "vercel - Weibo search").await);
    assert_eq!(result.score, 50);
    assert_eq!(result.status, Verdict::Stay);
    assert!(result.requires_grace_period);

    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        FocusEvent::GraceStarted {
            tab: 5,
            seconds: 30,
            ..
        }
    )));
    assert_eq!(h.blocked_count().await, 0);

    let expired = h.sources.grace.recv().await.unwrap();
    h.assistant.handle_grace_expiry(&expired).await;

    assert_eq!(h.blocked_count().await, 1);
    assert!(h
        .drain()
        .iter()
        .any(|e| matches!(e, FocusEvent::ForcedBlock { tab: 5, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_navigation_cancels_grace() {
    let mut h = harness();
    h.focus_on("vercel billing").await;
    h.check(5, WEIBO, "vercel - Weibo search").await;

    h.assistant
        .dispatch(Command::PageNavigated {
            tab: 5,
            url: BOOK.to_string(),
            title: "What is Ownership?".to_string(),
            content: None,
        })
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(60)).await;
    tokio::task::yield_now().await;
    assert!(h.sources.grace.try_recv().is_err());
    assert_eq!(h.blocked_count().await, 0);
    assert!(!h
        .drain()
        .iter()
        .any(|e| matches!(e, FocusEvent::ForcedBlock { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_expiry_on_other_page_does_not_block() {
    let mut h = harness();
    h.focus_on("vercel billing").await;
    h.check(5, WEIBO, "vercel - Weibo search").await;
    // The tab moved on without a navigation notice
    h.check(5, BOOK, "What is Ownership?").await;

    let expired = h.sources.grace.recv().await.unwrap();
    h.assistant.handle_grace_expiry(&expired).await;
    assert_eq!(h.blocked_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_tab_close_cancels_grace() {
    let mut h = harness();
    h.focus_on("vercel billing").await;
    h.check(5, WEIBO, "vercel - Weibo search").await;

    let response = h
        .assistant
        .dispatch(Command::TabClosed { tab: 5 })
        .await
        .unwrap();
    assert_eq!(response, Response::Ok);

    tokio::time::advance(Duration::from_secs(60)).await;
    tokio::task::yield_now().await;
    assert!(h.sources.grace.try_recv().is_err());
}

// ============================================================================
// Cache management
// ============================================================================

#[tokio::test]
async fn test_clear_cache_forgets_and_clears_ui() {
    let mut h = harness();
    h.focus_on("rust ownership").await;
    h.check(2, BOOK, "What is Ownership?").await;
    h.drain();

    let response = h.assistant.dispatch(Command::ClearCache).await.unwrap();
    assert_eq!(response, Response::CacheCleared);
    assert_eq!(h.drain(), vec![FocusEvent::ClearUi { tab: 2 }]);

    let (_, cached) = relevance(h.check(2, BOOK, "What is Ownership?").await);
    assert!(!cached);
}

#[tokio::test]
async fn test_keyword_change_invalidates_cache() {
    let mut h = harness();
    h.focus_on("rust ownership").await;
    h.check(2, BOOK, "What is Ownership?").await;

    h.assistant
        .dispatch(Command::SetKeywords {
            keywords: "rust lifetimes".to_string(),
        })
        .await
        .unwrap();

    let (_, cached) = relevance(h.check(2, BOOK, "What is Ownership?").await);
    assert!(!cached);
}

#[tokio::test]
async fn test_cache_stats_reported() {
    let mut h = harness();
    h.focus_on("rust ownership").await;
    h.check(1, BOOK, "What is Ownership?").await;
    h.check(2, GOSSIP, "Celebrity gossip roundup").await;

    match h.assistant.dispatch(Command::CacheStats).await.unwrap() {
        Response::CacheStats(stats) => {
            assert_eq!(stats.total, 2);
            assert_eq!(stats.valid, 2);
            assert_eq!(stats.expired, 0);
        }
        other => panic!("unexpected response {other:?}"),
    }
}

// ============================================================================
// Session commands
// ============================================================================

#[tokio::test]
async fn test_session_commands_publish_state() {
    let mut h = harness();
    h.focus_on("rust ownership").await;
    h.clock.advance(chrono::Duration::minutes(5));

    let paused = h.assistant.dispatch(Command::PauseFocus).await.unwrap();
    assert!(matches!(paused, Response::State(ref s) if s.phase == Phase::Paused));
    let events = h.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, FocusEvent::StateChanged(s) if s.phase == Phase::Paused)));
    assert!(events.iter().any(|e| matches!(
        e,
        FocusEvent::StatisticsChanged(stats) if stats.total_focused_time_ms == 300_000
    )));

    let stopped = h.assistant.dispatch(Command::StopFocus).await.unwrap();
    assert!(matches!(
        stopped,
        Response::Statistics(stats) if stats.total_focused_time_ms == 300_000
    ));
    match h.assistant.dispatch(Command::GetState).await.unwrap() {
        Response::State(state) => assert_eq!(state.phase, Phase::Idle),
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn test_precondition_errors_surface() {
    let h = harness();
    let err = h.assistant.dispatch(Command::PauseFocus).await.unwrap_err();
    assert!(matches!(
        err,
        AssistantError::Scheduler(SchedulerError::NoSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_phase_alarm_starts_break() {
    let mut h = harness();
    h.focus_on("rust ownership").await;

    let fired = h.sources.alarms.recv().await.unwrap();
    h.clock.advance(chrono::Duration::minutes(25));
    h.assistant.handle_alarm(&fired).await;

    let events = h.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, FocusEvent::StateChanged(s) if s.phase == Phase::Break)));
    assert_eq!(h.blocked_count().await, 0);

    h.assistant.shutdown();
    match h.assistant.dispatch(Command::GetState).await.unwrap() {
        Response::State(state) => assert_eq!(state.phase, Phase::Break),
        other => panic!("unexpected response {other:?}"),
    }
}
