//! The focus assistant service.
//!
//! Owns the scheduler, classifier, cache and grace timers, maps each
//! [`Command`] onto them and turns the results into [`FocusEvent`]s.
//! The daemon drives one instance from a single event loop, so handlers
//! never interleave.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use focusmate_ai::{
    Classification, ClassifyError, DecisionSource, Language, PageRequest, RelevanceClassifier,
};
use focusmate_storage::{KeyValueStore, Statistics, StorageError, Verdict};

use crate::alarm::{AlarmFired, TokioAlarms};
use crate::cache::{normalize_page_key, CacheStats, CacheStore};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::content::{ContentExtractor, PageContent};
use crate::events::FocusEvent;
use crate::grace::{GraceExpired, GracePeriodController, TabId};
use crate::scheduler::{SchedulerError, SessionScheduler, SessionSnapshot};

/// URL schemes that belong to the browser itself
const INTERNAL_SCHEMES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "moz-extension://",
    "about:",
];

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_CAPACITY: usize = 64;

#[must_use]
pub fn is_internal_page(url: &str) -> bool {
    let url = url.trim_start();
    INTERNAL_SCHEMES.iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Everything the assistant can be asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    InitFocus {
        keywords: String,
    },
    PauseFocus,
    ResumeFocus,
    StopFocus,
    EndFocus,
    EndBreak,
    SkipBreak,
    MarkTaskComplete,
    SetKeywords {
        keywords: String,
    },
    /// Check the page a tab currently shows; `content` is what the
    /// browser already extracted, if anything
    CheckRelevance {
        tab: TabId,
        url: String,
        title: String,
        content: Option<PageContent>,
    },
    PageNavigated {
        tab: TabId,
        url: String,
        title: String,
        content: Option<PageContent>,
    },
    TabClosed {
        tab: TabId,
    },
    ClearCache,
    CacheStats,
    GetState,
    GetStatistics,
}

/// Why a relevance check did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoSession,
    InternalPage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    State(SessionSnapshot),
    Statistics(Statistics),
    Relevance {
        result: Classification,
        cached: bool,
    },
    Skipped(SkipReason),
    CacheCleared,
    CacheStats(CacheStats),
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Receivers the event loop has to drain
pub struct EventSources {
    pub alarms: mpsc::UnboundedReceiver<AlarmFired>,
    pub grace: mpsc::UnboundedReceiver<GraceExpired>,
}

pub struct FocusAssistant {
    scheduler: SessionScheduler,
    classifier: Arc<RelevanceClassifier>,
    cache: CacheStore,
    grace: GracePeriodController,
    extractor: Arc<dyn ContentExtractor>,
    extract_timeout: Duration,
    // Page each tab is known to show, by cache key
    active_pages: Mutex<HashMap<TabId, String>>,
    events: broadcast::Sender<FocusEvent>,
}

impl FocusAssistant {
    #[must_use]
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
        classifier: Arc<RelevanceClassifier>,
        extractor: Arc<dyn ContentExtractor>,
        clock: Arc<dyn Clock>,
    ) -> (Self, EventSources) {
        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (grace_tx, grace_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let alarms = Arc::new(TokioAlarms::new(Arc::clone(&clock), alarm_tx));
        let scheduler = SessionScheduler::new(
            Arc::clone(&store),
            alarms,
            Arc::clone(&clock),
            config.timer.scheduler_config(),
        );
        let cache = CacheStore::new(store, clock)
            .with_limits(config.cache.ttl(), config.cache.max_bytes);

        let assistant = Self {
            scheduler,
            classifier,
            cache,
            grace: GracePeriodController::new(config.grace.period(), grace_tx),
            extractor,
            extract_timeout: EXTRACT_TIMEOUT,
            active_pages: Mutex::new(HashMap::new()),
            events,
        };
        let sources = EventSources {
            alarms: alarm_rx,
            grace: grace_rx,
        };
        (assistant, sources)
    }

    #[must_use]
    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FocusEvent> {
        self.events.subscribe()
    }

    /// Handle for serving subscriptions outside the event loop
    #[must_use]
    pub fn event_sender(&self) -> broadcast::Sender<FocusEvent> {
        self.events.clone()
    }

    /// Whether the configured judge answers, `None` without one
    pub async fn judge_available(&self) -> Option<bool> {
        self.classifier.judge_available().await
    }

    fn emit(&self, event: FocusEvent) {
        // Nobody listening is fine
        if self.events.send(event).is_err() {
            log::trace!("No event subscribers");
        }
    }

    fn with_pages<R>(&self, f: impl FnOnce(&mut HashMap<TabId, String>) -> R) -> R {
        match self.active_pages.lock() {
            Ok(mut pages) => f(&mut pages),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn active_page(&self, tab: TabId) -> Option<String> {
        self.with_pages(|pages| pages.get(&tab).cloned())
    }

    async fn publish_statistics(&self) {
        match self.scheduler.statistics().await {
            Ok(stats) => self.emit(FocusEvent::StatisticsChanged(stats)),
            Err(e) => log::warn!("Failed to read statistics: {e}"),
        }
    }

    /// Drop judgments made for the previous keywords
    async fn invalidate_cache(&self) {
        match self.cache.clear().await {
            Ok(()) => log::debug!("Relevance cache invalidated"),
            Err(e) => log::warn!("Failed to invalidate relevance cache: {e}"),
        }
    }

    /// Run one command
    ///
    /// # Errors
    ///
    /// Returns an error for rejected input, a scheduler precondition
    /// violation or a storage failure; no state changes in that case
    pub async fn dispatch(&self, command: Command) -> Result<Response, AssistantError> {
        match command {
            Command::InitFocus { keywords } => {
                let snapshot = self.scheduler.init(&keywords).await?;
                self.invalidate_cache().await;
                self.emit(FocusEvent::StateChanged(snapshot.clone()));
                self.publish_statistics().await;
                Ok(Response::State(snapshot))
            }
            Command::PauseFocus => {
                let snapshot = self.scheduler.pause().await?;
                self.emit(FocusEvent::StateChanged(snapshot.clone()));
                self.publish_statistics().await;
                Ok(Response::State(snapshot))
            }
            Command::ResumeFocus => Ok(self.transitioned(self.scheduler.resume().await?)),
            Command::StopFocus => {
                let stats = self.scheduler.stop().await?;
                self.grace.cancel_all();
                self.emit(FocusEvent::StateChanged(SessionSnapshot::idle()));
                self.emit(FocusEvent::StatisticsChanged(stats));
                Ok(Response::Statistics(stats))
            }
            Command::EndFocus => {
                let snapshot = self.scheduler.end_focus().await?;
                self.emit(FocusEvent::StateChanged(snapshot.clone()));
                self.publish_statistics().await;
                Ok(Response::State(snapshot))
            }
            Command::EndBreak => Ok(self.transitioned(self.scheduler.end_break().await?)),
            Command::SkipBreak => Ok(self.transitioned(self.scheduler.skip_break().await?)),
            Command::MarkTaskComplete => {
                Ok(self.transitioned(self.scheduler.mark_task_complete().await?))
            }
            Command::SetKeywords { keywords } => {
                let snapshot = self.scheduler.set_keywords(&keywords).await?;
                self.invalidate_cache().await;
                Ok(self.transitioned(snapshot))
            }
            Command::CheckRelevance {
                tab,
                url,
                title,
                content,
            } => self.check_relevance(tab, &url, &title, content).await,
            Command::PageNavigated {
                tab,
                url,
                title,
                content,
            } => {
                if self.grace.cancel(tab) {
                    log::debug!("Tab {tab} navigated during its grace period");
                }
                self.emit(FocusEvent::ClearUi { tab });
                self.check_relevance(tab, &url, &title, content).await
            }
            Command::TabClosed { tab } => {
                self.grace.cancel(tab);
                self.with_pages(|pages| pages.remove(&tab));
                Ok(Response::Ok)
            }
            Command::ClearCache => {
                self.cache.clear().await?;
                log::info!("Relevance cache cleared");
                self.grace.cancel_all();
                let tabs: Vec<TabId> = self.with_pages(|pages| pages.keys().copied().collect());
                for tab in tabs {
                    self.emit(FocusEvent::ClearUi { tab });
                }
                Ok(Response::CacheCleared)
            }
            Command::CacheStats => Ok(Response::CacheStats(self.cache.stats().await?)),
            Command::GetState => Ok(Response::State(self.scheduler.snapshot().await?)),
            Command::GetStatistics => Ok(Response::Statistics(self.scheduler.statistics().await?)),
        }
    }

    fn transitioned(&self, snapshot: SessionSnapshot) -> Response {
        self.emit(FocusEvent::StateChanged(snapshot.clone()));
        Response::State(snapshot)
    }

    async fn check_relevance(
        &self,
        tab: TabId,
        url: &str,
        title: &str,
        content: Option<PageContent>,
    ) -> Result<Response, AssistantError> {
        if is_internal_page(url) {
            log::debug!("Skipping internal page {url}");
            return Ok(Response::Skipped(SkipReason::InternalPage));
        }
        let Some(keywords) = self.scheduler.keywords().await? else {
            log::debug!("No focus session, skipping {url}");
            return Ok(Response::Skipped(SkipReason::NoSession));
        };

        let page_key = normalize_page_key(url);
        self.with_pages(|pages| pages.insert(tab, page_key.clone()));

        if let Some(result) = self.cache.get(url).await {
            return Ok(Response::Relevance {
                result,
                cached: true,
            });
        }

        let content = match content {
            Some(content) => content,
            None => self.extract(url, title).await,
        };
        let request = PageRequest::new(&keywords, content.best_title(title), url)
            .with_snippet(content.snippet().map(str::to_string));

        let result = self.classifier.classify(&request).await?;
        log::info!(
            "{url}: {} ({}%, {})",
            result.status,
            result.score,
            result.source
        );

        self.emit(FocusEvent::Classified {
            tab,
            url: url.to_string(),
            result: result.clone(),
        });
        self.apply_outcome(tab, &page_key, &keywords, &result).await;
        self.cache.put(url, &result).await;

        Ok(Response::Relevance {
            result,
            cached: false,
        })
    }

    async fn extract(&self, url: &str, title: &str) -> PageContent {
        match tokio::time::timeout(self.extract_timeout, self.extractor.extract(url)).await {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                log::warn!("Content extraction failed for {url}: {e:#}");
                PageContent::bare(title)
            }
            Err(_) => {
                log::warn!("Content extraction timed out for {url}");
                PageContent::bare(title)
            }
        }
    }

    async fn apply_outcome(
        &self,
        tab: TabId,
        page_key: &str,
        keywords: &str,
        result: &Classification,
    ) {
        if result.requires_grace_period {
            let seconds = self.grace.period().as_secs();
            let messages = self.classifier.rules().messages(Language::detect(keywords));
            self.grace.start(tab, page_key);
            self.emit(FocusEvent::GraceStarted {
                tab,
                reason: messages.grace_started(seconds),
                seconds,
            });
            return;
        }

        match result.status {
            Verdict::Block => {
                match self.scheduler.record_block().await {
                    Ok(stats) => self.emit(FocusEvent::StatisticsChanged(stats)),
                    Err(e) => log::warn!("Failed to count block: {e}"),
                }
                // The fallback reason is a marker, not something to show
                let reason = if result.source == DecisionSource::Fallback {
                    self.classifier
                        .rules()
                        .messages(Language::detect(keywords))
                        .blocked
                        .clone()
                } else {
                    result.reason.clone()
                };
                self.emit(FocusEvent::ShowBlock {
                    tab,
                    reason,
                    score: result.score,
                });
            }
            Verdict::Stay => self.emit(FocusEvent::ClearUi { tab }),
        }
    }

    /// Apply a scheduler alarm
    pub async fn handle_alarm(&self, fired: &AlarmFired) {
        match self.scheduler.on_alarm(fired).await {
            Ok(Some(snapshot)) => {
                self.emit(FocusEvent::StateChanged(snapshot));
                self.publish_statistics().await;
            }
            Ok(None) => {}
            Err(e) => log::error!("Failed to apply phase alarm: {e}"),
        }
    }

    /// Apply a grace expiry; blocks only if the tab never left the page
    pub async fn handle_grace_expiry(&self, expired: &GraceExpired) {
        let active = self.active_page(expired.tab);
        if !self.grace.confirm(expired, active.as_deref()) {
            return;
        }

        let keywords = match self.scheduler.keywords().await {
            Ok(Some(keywords)) => keywords,
            Ok(None) => {
                log::debug!("Grace period ended after the session stopped");
                return;
            }
            Err(e) => {
                log::warn!("Failed to read session on grace expiry: {e}");
                return;
            }
        };

        match self.scheduler.record_block().await {
            Ok(stats) => self.emit(FocusEvent::StatisticsChanged(stats)),
            Err(e) => log::warn!("Failed to count forced block: {e}"),
        }
        let messages = self.classifier.rules().messages(Language::detect(&keywords));
        log::info!(
            "Grace period over for tab {} on {}, blocking",
            expired.tab,
            expired.page_key
        );
        self.emit(FocusEvent::ForcedBlock {
            tab: expired.tab,
            reason: messages.grace_expired.clone(),
        });
    }

    /// Drop expired cache entries
    pub async fn sweep_cache(&self) {
        match self.cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => log::info!("Purged {purged} expired cache entries"),
            Err(e) => log::warn!("Cache sweep failed: {e}"),
        }
    }

    /// Re-arm timers for a session persisted by a previous run
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be read
    pub async fn restore(&self) -> Result<SessionSnapshot, AssistantError> {
        Ok(self.scheduler.restore().await?)
    }

    /// Cancel every timer; persisted state is left as is
    pub fn shutdown(&self) {
        self.grace.cancel_all();
        self.scheduler.shutdown();
        log::info!("Focus assistant stopped");
    }
}
