//! One-shot named alarms at absolute times.
//!
//! An alarm task only delivers an [`AlarmFired`] message into the event
//! loop. The loop acknowledges it against the facility, and a fire whose
//! generation was cancelled or superseded is dropped there, so a cancelled
//! alarm never takes effect even if its task already woke up.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::clock::Clock;

/// Name of the scheduler's phase-end alarm
pub const FOCUS_ALARM: &str = "focusTimer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmFired {
    pub name: String,
    pub generation: u64,
}

/// Wall-clock alarm facility
pub trait AlarmFacility: Send + Sync {
    /// Arm `name` for `at`, replacing any alarm with the same name
    fn schedule(&self, name: &str, at: DateTime<Utc>);

    fn cancel(&self, name: &str);

    /// Consume a fire; false when it was cancelled or superseded
    fn acknowledge(&self, fired: &AlarmFired) -> bool;

    fn is_scheduled(&self, name: &str) -> bool;
}

struct ArmedAlarm {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Alarms backed by tokio sleep tasks
pub struct TokioAlarms {
    clock: Arc<dyn Clock>,
    tx: UnboundedSender<AlarmFired>,
    armed: Mutex<HashMap<String, ArmedAlarm>>,
    next_generation: AtomicU64,
}

impl TokioAlarms {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, tx: UnboundedSender<AlarmFired>) -> Self {
        Self {
            clock,
            tx,
            armed: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn with_armed<R>(&self, f: impl FnOnce(&mut HashMap<String, ArmedAlarm>) -> R) -> R {
        match self.armed.lock() {
            Ok(mut armed) => f(&mut armed),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl AlarmFacility for TokioAlarms {
    fn schedule(&self, name: &str, at: DateTime<Utc>) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        // Overdue alarms fire right away
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        let tx = self.tx.clone();
        let fired = AlarmFired {
            name: name.to_string(),
            generation,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(fired).is_err() {
                log::debug!("Alarm fired after the event loop stopped");
            }
        });

        log::debug!("Alarm '{name}' armed for {at} (generation {generation})");
        let previous = self.with_armed(|armed| {
            armed.insert(name.to_string(), ArmedAlarm { generation, handle })
        });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    fn cancel(&self, name: &str) {
        if let Some(previous) = self.with_armed(|armed| armed.remove(name)) {
            previous.handle.abort();
            log::debug!("Alarm '{name}' cancelled (generation {})", previous.generation);
        }
    }

    fn acknowledge(&self, fired: &AlarmFired) -> bool {
        self.with_armed(|armed| match armed.get(&fired.name) {
            Some(current) if current.generation == fired.generation => {
                armed.remove(&fired.name);
                true
            }
            _ => false,
        })
    }

    fn is_scheduled(&self, name: &str) -> bool {
        self.with_armed(|armed| armed.contains_key(name))
    }
}

impl Drop for TokioAlarms {
    fn drop(&mut self) {
        self.with_armed(|armed| {
            for (_, alarm) in armed.drain() {
                alarm.handle.abort();
            }
        });
    }
}

/// Alarm facility that records what was asked of it
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingAlarms {
    armed: Mutex<HashMap<String, (u64, DateTime<Utc>)>>,
    next_generation: AtomicU64,
}

#[cfg(test)]
impl RecordingAlarms {
    pub(crate) fn scheduled_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.armed.lock().unwrap().get(name).map(|(_, at)| *at)
    }

    /// Fire message for the currently armed alarm
    pub(crate) fn fire(&self, name: &str) -> Option<AlarmFired> {
        self.armed.lock().unwrap().get(name).map(|(generation, _)| AlarmFired {
            name: name.to_string(),
            generation: *generation,
        })
    }
}

#[cfg(test)]
impl AlarmFacility for RecordingAlarms {
    fn schedule(&self, name: &str, at: DateTime<Utc>) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.armed
            .lock()
            .unwrap()
            .insert(name.to_string(), (generation, at));
    }

    fn cancel(&self, name: &str) {
        self.armed.lock().unwrap().remove(name);
    }

    fn acknowledge(&self, fired: &AlarmFired) -> bool {
        let mut armed = self.armed.lock().unwrap();
        match armed.get(&fired.name) {
            Some((generation, _)) if *generation == fired.generation => {
                armed.remove(&fired.name);
                true
            }
            _ => false,
        }
    }

    fn is_scheduled(&self, name: &str) -> bool {
        self.armed.lock().unwrap().contains_key(name)
    }
}
