use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of the focus session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Focus,
    Break,
    Paused,
    Idle,
}

impl Phase {
    /// Phases that own a scheduled alarm
    #[must_use]
    pub const fn is_timed(&self) -> bool {
        matches!(self, Self::Focus | Self::Break)
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Focus => "Focusing",
            Self::Break => "On break",
            Self::Paused => "Paused",
            Self::Idle => "Idle",
        }
    }
}

/// Kind of break that follows a completed focus phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    Short,
    Long,
}

/// Stay/Block verdict for a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Stay,
    Block,
}

impl Verdict {
    /// Scores at or above the threshold are kept, everything else is blocked
    #[must_use]
    pub fn from_score(score: u8, stay_threshold: u8) -> Self {
        if score >= stay_threshold {
            Self::Stay
        } else {
            Self::Block
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stay => write!(f, "Stay"),
            Self::Block => write!(f, "Block"),
        }
    }
}

/// Active focus session - one per process, persisted under a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSession {
    pub keywords: String,
    pub phase: Phase,
    /// Focus phases completed since the session started
    pub cycle_count: u32,
    /// Position within the focus/long-break rotation
    pub current_cycle: u8,
    pub start_time: DateTime<Utc>,
    pub target_end_time: DateTime<Utc>,
    /// Remaining focus time, only present while paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left_ms: Option<i64>,
    /// Kind of the running break, only present during a break
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_kind: Option<BreakKind>,
    pub task_completed: bool,
}

impl FocusSession {
    /// Start a fresh session in the focus phase
    #[must_use]
    pub fn new(keywords: String, now: DateTime<Utc>, focus_duration: Duration) -> Self {
        Self {
            keywords,
            phase: Phase::Focus,
            cycle_count: 0,
            current_cycle: 0,
            start_time: now,
            target_end_time: now + focus_duration,
            time_left_ms: None,
            break_kind: None,
            task_completed: false,
        }
    }

    /// Focus phase that is currently counting down (not paused)
    #[must_use]
    pub fn is_running_focus(&self) -> bool {
        self.phase == Phase::Focus
    }

    /// Milliseconds spent in the current phase window, never negative
    #[must_use]
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.start_time).num_milliseconds()).unwrap_or(0)
    }

    /// Milliseconds until the phase ends; paused sessions report the snapshot
    #[must_use]
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        match self.phase {
            Phase::Paused => self.time_left_ms.unwrap_or(0).max(0),
            Phase::Idle => 0,
            Phase::Focus | Phase::Break => (self.target_end_time - now).num_milliseconds().max(0),
        }
    }
}

/// Process-wide statistics, stored apart from the session so they survive a stop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_focused_time_ms: u64,
    pub blocked_count: u64,
}

impl Statistics {
    #[must_use]
    pub fn with_focused(self, elapsed_ms: u64) -> Self {
        Self {
            total_focused_time_ms: self.total_focused_time_ms.saturating_add(elapsed_ms),
            ..self
        }
    }

    #[must_use]
    pub fn with_block(self) -> Self {
        Self {
            blocked_count: self.blocked_count.saturating_add(1),
            ..self
        }
    }
}

/// Cached relevance judgment for one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub score: u8,
    pub status: Verdict,
    pub reason: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.timestamp > ttl
    }

    /// Serialized size in bytes, used by the eviction heuristic
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}
