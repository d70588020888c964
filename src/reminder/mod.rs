//! Daily reminder scheduling.
//!
//! The scheduler owns one [`RecurringTask`] per note that carries a reminder
//! time. Any change to the note collection triggers a full rearm: every task
//! is cancelled and a fresh set is armed from the new collection.

mod task;

pub use task::RecurringTask;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, TimeDelta};

use crate::clock::Clock;
use crate::entity::{Note, NoteId, ReminderTime};
use crate::notify::{Notification, Notifier, Permission, PermissionGate};

/// The next time `at` occurs strictly after `now`: today if still ahead, else tomorrow.
pub fn next_occurrence(now: NaiveDateTime, at: ReminderTime) -> NaiveDateTime {
    let today = now.date().and_time(at.as_naive_time());
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

pub struct ReminderScheduler {
    clock: Arc<dyn Clock>,
    gate: Arc<PermissionGate>,
    notifier: Arc<dyn Notifier>,
    timers: Mutex<HashMap<NoteId, RecurringTask>>,
}

impl ReminderScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        gate: Arc<PermissionGate>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            clock,
            gate,
            notifier,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Cancel every armed reminder, then arm one per note with a reminder time.
    pub fn rearm(&self, notes: &[Note]) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in timers.drain() {
            task.cancel();
        }

        for note in notes {
            if let Some(at) = note.notification_time {
                timers.insert(note.id.clone(), self.arm(note, at));
            }
        }
        tracing::debug!(armed = timers.len(), notes = notes.len(), "reminders rearmed");
    }

    /// Cancel everything. Used when the host context is going away.
    pub fn teardown(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let count = timers.len();
        for (_, task) in timers.drain() {
            task.cancel();
        }
        tracing::debug!(cancelled = count, "reminder scheduler torn down");
    }

    pub fn armed_count(&self) -> usize {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Ids with an armed reminder, sorted.
    pub fn armed_ids(&self) -> Vec<NoteId> {
        let timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<NoteId> = timers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn arm(&self, note: &Note, at: ReminderTime) -> RecurringTask {
        let clock = Arc::clone(&self.clock);
        let mut last_target: Option<NaiveDateTime> = None;
        let next_delay = move || {
            let now = clock.now();
            // Never aim at a target that already fired, even if the timer woke early.
            let reference = match last_target {
                Some(target) if target > now => target,
                _ => now,
            };
            let target = next_occurrence(reference, at);
            last_target = Some(target);
            clock.delay_until(target)
        };

        let gate = Arc::clone(&self.gate);
        let notifier = Arc::clone(&self.notifier);
        let note = note.clone();
        let on_fire = move || {
            if gate.current_permission() == Permission::Granted {
                notifier.show(Notification::reminder(&note));
            } else {
                tracing::debug!(note = %note.id, "reminder due but notifications are not permitted");
            }
        };

        RecurringTask::spawn(next_delay, on_fire)
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}
