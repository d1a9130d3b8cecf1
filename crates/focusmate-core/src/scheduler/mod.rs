//! Pomodoro session state machine.
//!
//! `IDLE -> FOCUS <-> PAUSED`, `FOCUS -> BREAK -> FOCUS`, any active phase
//! back to `IDLE` on stop. Every transition runs under one lock and
//! persists the session together with the statistics in a single atomic
//! `set`, so a failed write leaves both documents as they were.


use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use focusmate_storage::store::{entry, load};
use focusmate_storage::{
    keys, BreakKind, FocusSession, KeyValueStore, Phase, Statistics, StorageError,
};

use crate::alarm::{AlarmFacility, AlarmFired, FOCUS_ALARM};
use crate::clock::Clock;
use crate::stats::StatisticsStore;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("no active focus session")]
    NoSession,

    #[error("expected {expected:?} phase, session is {actual:?}")]
    InvalidPhase { expected: Phase, actual: Phase },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Phase lengths and the long-break rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub focus: Duration,
    pub short_break: Duration,
    pub long_break: Duration,
    /// Focus sessions per long break
    pub long_break_every: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            focus: Duration::minutes(25),
            short_break: Duration::minutes(5),
            long_break: Duration::minutes(15),
            long_break_every: 4,
        }
    }
}

impl SchedulerConfig {
    fn break_duration(&self, kind: BreakKind) -> Duration {
        match kind {
            BreakKind::Short => self.short_break,
            BreakKind::Long => self.long_break,
        }
    }
}

/// Outward view of the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub keywords: Option<String>,
    pub current_cycle: u8,
    pub cycle_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub target_end_time: Option<DateTime<Utc>>,
    pub time_left_ms: Option<i64>,
    pub remaining_ms: i64,
    pub break_kind: Option<BreakKind>,
    pub task_completed: bool,
}

impl SessionSnapshot {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            keywords: None,
            current_cycle: 0,
            cycle_count: 0,
            start_time: None,
            target_end_time: None,
            time_left_ms: None,
            remaining_ms: 0,
            break_kind: None,
            task_completed: false,
        }
    }

    fn of(session: &FocusSession, now: DateTime<Utc>) -> Self {
        Self {
            phase: session.phase,
            keywords: Some(session.keywords.clone()),
            current_cycle: session.current_cycle,
            cycle_count: session.cycle_count,
            start_time: Some(session.start_time),
            target_end_time: Some(session.target_end_time),
            time_left_ms: session.time_left_ms,
            remaining_ms: session.remaining_ms(now),
            break_kind: session.break_kind,
            task_completed: session.task_completed,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }
}

/// Break that follows a completed focus phase, and the rotation position after it
#[must_use]
pub fn next_break(current_cycle: u8, long_break_every: u8) -> (BreakKind, u8) {
    let next = current_cycle.saturating_add(1);
    if next >= long_break_every.max(1) {
        (BreakKind::Long, 0)
    } else {
        (BreakKind::Short, next)
    }
}

/// Focus time of the running window, capped at its target end
fn focused_ms(session: &FocusSession, now: DateTime<Utc>) -> u64 {
    session.elapsed_ms(now.min(session.target_end_time))
}

pub struct SessionScheduler {
    store: Arc<dyn KeyValueStore>,
    stats: StatisticsStore,
    alarms: Arc<dyn AlarmFacility>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    // Serializes transitions so no handler observes a half-applied one
    transition: Mutex<()>,
}

impl SessionScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        alarms: Arc<dyn AlarmFacility>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            stats: StatisticsStore::new(Arc::clone(&store)),
            store,
            alarms,
            clock,
            config,
            transition: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    async fn load_session(&self) -> Result<Option<FocusSession>, StorageError> {
        // A stopped session is stored as null
        Ok(load::<Option<FocusSession>>(self.store.as_ref(), keys::SESSION)
            .await?
            .flatten())
    }

    async fn require_session(&self) -> Result<FocusSession, SchedulerError> {
        self.load_session().await?.ok_or(SchedulerError::NoSession)
    }

    async fn require_phase(&self, expected: Phase) -> Result<FocusSession, SchedulerError> {
        let session = self.require_session().await?;
        if session.phase != expected {
            return Err(SchedulerError::InvalidPhase {
                expected,
                actual: session.phase,
            });
        }
        Ok(session)
    }

    /// Persist the session (or its absence) and optionally the statistics in one write
    async fn commit(
        &self,
        session: Option<&FocusSession>,
        stats: Option<Statistics>,
    ) -> Result<(), StorageError> {
        let mut items = HashMap::new();
        let (key, value) = entry(keys::SESSION, &session)?;
        items.insert(key, value);
        if let Some(stats) = stats {
            let (key, value) = entry(keys::STATISTICS, &stats)?;
            items.insert(key, value);
        }
        self.store.set(items).await
    }

    fn arm(&self, session: &FocusSession) {
        self.alarms.schedule(FOCUS_ALARM, session.target_end_time);
    }

    /// Start a new session in the focus phase
    ///
    /// A session that is already running is replaced; its running focus
    /// time is flushed first.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for blank keywords, `Storage` if the write fails
    pub async fn init(&self, keywords: &str) -> Result<SessionSnapshot, SchedulerError> {
        let keywords = keywords.trim();
        if keywords.is_empty() {
            return Err(SchedulerError::InvalidInput("keywords must not be empty"));
        }

        let _guard = self.transition.lock().await;
        let now = self.clock.now();

        let stats = match self.load_session().await? {
            Some(previous) if previous.is_running_focus() => {
                log::info!("Replacing running session '{}'", previous.keywords);
                Some(self.stats.load().await?.with_focused(focused_ms(&previous, now)))
            }
            _ => None,
        };

        let session = FocusSession::new(keywords.to_string(), now, self.config.focus);
        self.commit(Some(&session), stats).await?;
        self.arm(&session);

        log::info!(
            "Focus session started: '{keywords}' until {}",
            session.target_end_time
        );
        Ok(SessionSnapshot::of(&session, now))
    }

    /// # Errors
    ///
    /// `NoSession`, `InvalidPhase` unless running focus, or `Storage`
    pub async fn pause(&self) -> Result<SessionSnapshot, SchedulerError> {
        let _guard = self.transition.lock().await;
        let now = self.clock.now();
        let mut session = self.require_phase(Phase::Focus).await?;

        let stats = self.stats.load().await?.with_focused(focused_ms(&session, now));
        session.phase = Phase::Paused;
        session.time_left_ms = Some((session.target_end_time - now).num_milliseconds().max(0));

        self.commit(Some(&session), Some(stats)).await?;
        self.alarms.cancel(FOCUS_ALARM);

        log::info!(
            "Focus paused with {}ms left",
            session.time_left_ms.unwrap_or_default()
        );
        Ok(SessionSnapshot::of(&session, now))
    }

    /// # Errors
    ///
    /// `NoSession`, `InvalidPhase` unless paused, or `Storage`
    pub async fn resume(&self) -> Result<SessionSnapshot, SchedulerError> {
        let _guard = self.transition.lock().await;
        let now = self.clock.now();
        let mut session = self.require_phase(Phase::Paused).await?;

        let time_left = session.time_left_ms.take().unwrap_or_default().max(0);
        session.phase = Phase::Focus;
        session.start_time = now;
        session.target_end_time = now + Duration::milliseconds(time_left);

        self.commit(Some(&session), None).await?;
        self.arm(&session);

        log::info!("Focus resumed until {}", session.target_end_time);
        Ok(SessionSnapshot::of(&session, now))
    }

    /// End the session, flushing running focus time; statistics survive
    ///
    /// # Errors
    ///
    /// `NoSession` when idle, or `Storage`
    pub async fn stop(&self) -> Result<Statistics, SchedulerError> {
        let _guard = self.transition.lock().await;
        let now = self.clock.now();
        let session = self.require_session().await?;

        let stats = self.stats.load().await?;
        let stats = if session.is_running_focus() {
            stats.with_focused(focused_ms(&session, now))
        } else {
            stats
        };

        self.commit(None, Some(stats)).await?;
        self.alarms.cancel(FOCUS_ALARM);

        log::info!(
            "Focus session stopped after {} completed cycles",
            session.cycle_count
        );
        Ok(stats)
    }

    /// # Errors
    ///
    /// `NoSession`, `InvalidPhase` unless running focus, or `Storage`
    pub async fn end_focus(&self) -> Result<SessionSnapshot, SchedulerError> {
        let _guard = self.transition.lock().await;
        let session = self.require_phase(Phase::Focus).await?;
        self.end_focus_locked(session).await
    }

    async fn end_focus_locked(
        &self,
        mut session: FocusSession,
    ) -> Result<SessionSnapshot, SchedulerError> {
        let now = self.clock.now();
        let stats = self.stats.load().await?.with_focused(focused_ms(&session, now));

        let (kind, next_cycle) = next_break(session.current_cycle, self.config.long_break_every);
        session.phase = Phase::Break;
        session.current_cycle = next_cycle;
        session.break_kind = Some(kind);
        session.start_time = now;
        session.target_end_time = now + self.config.break_duration(kind);

        self.commit(Some(&session), Some(stats)).await?;
        self.arm(&session);

        log::info!(
            "Focus phase complete, {kind:?} break until {}",
            session.target_end_time
        );
        Ok(SessionSnapshot::of(&session, now))
    }

    /// # Errors
    ///
    /// `NoSession`, `InvalidPhase` unless on a break, or `Storage`
    pub async fn end_break(&self) -> Result<SessionSnapshot, SchedulerError> {
        let _guard = self.transition.lock().await;
        let session = self.require_phase(Phase::Break).await?;
        self.end_break_locked(session).await
    }

    /// User-initiated early end of a break
    ///
    /// # Errors
    ///
    /// `NoSession`, `InvalidPhase` unless on a break, or `Storage`
    pub async fn skip_break(&self) -> Result<SessionSnapshot, SchedulerError> {
        let _guard = self.transition.lock().await;
        let session = self.require_phase(Phase::Break).await?;
        log::info!("Break skipped");
        self.end_break_locked(session).await
    }

    async fn end_break_locked(
        &self,
        mut session: FocusSession,
    ) -> Result<SessionSnapshot, SchedulerError> {
        let now = self.clock.now();
        session.phase = Phase::Focus;
        session.cycle_count = session.cycle_count.saturating_add(1);
        if session.current_cycle >= self.config.long_break_every {
            session.current_cycle = 0;
        }
        session.break_kind = None;
        session.start_time = now;
        session.target_end_time = now + self.config.focus;

        self.commit(Some(&session), None).await?;
        self.arm(&session);

        log::info!(
            "Break over, focus cycle {} until {}",
            session.cycle_count,
            session.target_end_time
        );
        Ok(SessionSnapshot::of(&session, now))
    }

    /// # Errors
    ///
    /// `NoSession` when idle, or `Storage`
    pub async fn mark_task_complete(&self) -> Result<SessionSnapshot, SchedulerError> {
        let _guard = self.transition.lock().await;
        let mut session = self.require_session().await?;
        session.task_completed = true;
        self.commit(Some(&session), None).await?;
        log::info!("Task '{}' marked complete", session.keywords);
        Ok(SessionSnapshot::of(&session, self.clock.now()))
    }

    /// Replace the focus keywords; callers must invalidate cached judgments
    ///
    /// # Errors
    ///
    /// `InvalidInput` for blank keywords, `NoSession` when idle, or `Storage`
    pub async fn set_keywords(&self, keywords: &str) -> Result<SessionSnapshot, SchedulerError> {
        let keywords = keywords.trim();
        if keywords.is_empty() {
            return Err(SchedulerError::InvalidInput("keywords must not be empty"));
        }

        let _guard = self.transition.lock().await;
        let mut session = self.require_session().await?;
        session.keywords = keywords.to_string();
        self.commit(Some(&session), None).await?;
        log::info!("Focus keywords changed to '{keywords}'");
        Ok(SessionSnapshot::of(&session, self.clock.now()))
    }

    /// # Errors
    ///
    /// Returns an error if the session cannot be read
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SchedulerError> {
        let session = self.load_session().await?;
        Ok(session.map_or_else(SessionSnapshot::idle, |s| {
            SessionSnapshot::of(&s, self.clock.now())
        }))
    }

    /// Keywords of the active session, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be read
    pub async fn keywords(&self) -> Result<Option<String>, SchedulerError> {
        Ok(self.load_session().await?.map(|s| s.keywords))
    }

    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read
    pub async fn statistics(&self) -> Result<Statistics, SchedulerError> {
        Ok(self.stats.load().await?)
    }

    /// Count one block event
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be written
    pub async fn record_block(&self) -> Result<Statistics, SchedulerError> {
        let _guard = self.transition.lock().await;
        Ok(self.stats.record_block().await?)
    }

    /// Apply a phase-end alarm; stale or mismatched fires are ignored
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting transition cannot be persisted
    pub async fn on_alarm(
        &self,
        fired: &AlarmFired,
    ) -> Result<Option<SessionSnapshot>, SchedulerError> {
        let _guard = self.transition.lock().await;
        if fired.name != FOCUS_ALARM || !self.alarms.acknowledge(fired) {
            log::debug!("Ignoring stale alarm {fired:?}");
            return Ok(None);
        }

        let Some(session) = self.load_session().await? else {
            log::debug!("Alarm fired without a session, ignoring");
            return Ok(None);
        };

        match session.phase {
            Phase::Focus => self.end_focus_locked(session).await.map(Some),
            Phase::Break => self.end_break_locked(session).await.map(Some),
            Phase::Paused | Phase::Idle => {
                log::debug!("Alarm fired in {:?} phase, ignoring", session.phase);
                Ok(None)
            }
        }
    }

    /// Re-arm the phase alarm for a persisted session after a restart
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be read
    pub async fn restore(&self) -> Result<SessionSnapshot, SchedulerError> {
        let _guard = self.transition.lock().await;
        let Some(session) = self.load_session().await? else {
            return Ok(SessionSnapshot::idle());
        };

        if session.phase.is_timed() {
            self.arm(&session);
            log::info!(
                "Restored {} session '{}' ending {}",
                session.phase.description(),
                session.keywords,
                session.target_end_time
            );
        }
        Ok(SessionSnapshot::of(&session, self.clock.now()))
    }

    /// Disarm the phase alarm without touching the persisted session
    pub fn shutdown(&self) {
        self.alarms.cancel(FOCUS_ALARM);
    }
}
