//! Per-tab grace timers for pages that need a second look before blocking.
//!
//! Expiry is delivered as a message into the event loop. The loop confirms
//! it against the controller, so a timer cancelled after its task woke up
//! still has no effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Browser tab identifier
pub type TabId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraceExpired {
    pub tab: TabId,
    pub page_key: String,
    pub generation: u64,
}

struct GraceTimer {
    page_key: String,
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct GracePeriodController {
    period: Duration,
    tx: UnboundedSender<GraceExpired>,
    timers: Mutex<HashMap<TabId, GraceTimer>>,
    next_generation: AtomicU64,
}

impl GracePeriodController {
    #[must_use]
    pub fn new(period: Duration, tx: UnboundedSender<GraceExpired>) -> Self {
        Self {
            period,
            tx,
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    fn with_timers<R>(&self, f: impl FnOnce(&mut HashMap<TabId, GraceTimer>) -> R) -> R {
        match self.timers.lock() {
            Ok(mut timers) => f(&mut timers),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Arm the tab's grace timer for `page_key`, replacing any running one
    pub fn start(&self, tab: TabId, page_key: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let period = self.period;
        let tx = self.tx.clone();
        let expired = GraceExpired {
            tab,
            page_key: page_key.to_string(),
            generation,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(period).await;
            if tx.send(expired).is_err() {
                log::debug!("Grace timer expired after the event loop stopped");
            }
        });

        let previous = self.with_timers(|timers| {
            timers.insert(
                tab,
                GraceTimer {
                    page_key: page_key.to_string(),
                    generation,
                    handle,
                },
            )
        });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        log::debug!(
            "Grace period of {}s started for tab {tab} on {page_key}",
            period.as_secs()
        );
    }

    /// Returns true when a timer was running
    pub fn cancel(&self, tab: TabId) -> bool {
        match self.with_timers(|timers| timers.remove(&tab)) {
            Some(timer) => {
                timer.handle.abort();
                log::debug!("Grace period cancelled for tab {tab} on {}", timer.page_key);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let cancelled = self.with_timers(|timers| {
            let count = timers.len();
            for (_, timer) in timers.drain() {
                timer.handle.abort();
            }
            count
        });
        if cancelled > 0 {
            log::debug!("Cancelled {cancelled} grace timers");
        }
    }

    #[must_use]
    pub fn is_pending(&self, tab: TabId) -> bool {
        self.with_timers(|timers| timers.contains_key(&tab))
    }

    /// Consume an expiry; true only if it belongs to the tab's live timer
    /// and the tab still shows the page the timer was started for
    pub fn confirm(&self, expired: &GraceExpired, active_page: Option<&str>) -> bool {
        let live = self.with_timers(|timers| match timers.get(&expired.tab) {
            Some(timer) if timer.generation == expired.generation => {
                timers.remove(&expired.tab);
                true
            }
            _ => false,
        });

        if !live {
            log::debug!("Ignoring stale grace expiry for tab {}", expired.tab);
            return false;
        }
        if active_page != Some(expired.page_key.as_str()) {
            log::debug!(
                "Tab {} left {} during its grace period",
                expired.tab,
                expired.page_key
            );
            return false;
        }
        true
    }
}

impl Drop for GracePeriodController {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
