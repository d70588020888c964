//! The note collection and its lifecycle.
//!
//! [`NoteStore`] is the single owner of the in-memory collection. Every
//! mutation writes the whole collection back through [`Persisted`] and then
//! rearms the attached [`ReminderScheduler`], both while holding the store's
//! lock, so mutations and their rearms never interleave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::Clock;
use crate::entity::{generate_id, Note, ReminderTime};
use crate::reminder::ReminderScheduler;
use crate::storage::{Persisted, Subscription};

struct Inner {
    notes: Mutex<Vec<Note>>,
    persisted: Persisted<Vec<Note>>,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<ReminderScheduler>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<Note>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rearm(&self, notes: &[Note]) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.rearm(notes);
        }
    }

    fn commit(&self, notes: &[Note]) {
        self.persisted.write(&notes.to_vec());
        self.rearm(notes);
    }
}

#[derive(Clone)]
pub struct NoteStore {
    inner: Arc<Inner>,
}

impl NoteStore {
    /// Load the collection from storage (empty if missing or unreadable).
    pub fn open(persisted: Persisted<Vec<Note>>, clock: Arc<dyn Clock>) -> Self {
        Self::build(persisted, clock, None)
    }

    /// Load the collection and arm reminders for it.
    pub fn with_scheduler(
        persisted: Persisted<Vec<Note>>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<ReminderScheduler>,
    ) -> Self {
        Self::build(persisted, clock, Some(scheduler))
    }

    fn build(
        persisted: Persisted<Vec<Note>>,
        clock: Arc<dyn Clock>,
        scheduler: Option<Arc<ReminderScheduler>>,
    ) -> Self {
        let notes = persisted.read(Vec::new());
        tracing::debug!(count = notes.len(), key = persisted.key(), "note collection loaded");

        let inner = Inner {
            notes: Mutex::new(notes),
            persisted,
            clock,
            scheduler,
        };
        {
            let notes = inner.lock();
            inner.rearm(&notes);
        }
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Append a new note. Blank content is ignored and yields `None`.
    pub fn create(&self, content: &str, notification_time: Option<ReminderTime>) -> Option<Note> {
        let now = self.inner.clock.now_millis();
        let mut note = Note::new(content, notification_time, now)?;

        let mut notes = self.inner.lock();
        while notes.iter().any(|n| n.id == note.id) {
            note.id = generate_id(now);
        }
        notes.push(note.clone());
        self.inner.commit(&notes);

        tracing::info!(id = %note.id, reminder = ?note.notification_time.map(|t| t.to_string()), "note created");
        Some(note)
    }

    /// Remove the note with `id`. Unknown ids are ignored and return `false`.
    pub fn delete(&self, id: &str) -> bool {
        let mut notes = self.inner.lock();
        let Some(index) = notes.iter().position(|n| n.id == id) else {
            tracing::debug!(id, "delete ignored: no such note");
            return false;
        };
        notes.remove(index);
        self.inner.commit(&notes);

        tracing::info!(id, "note deleted");
        true
    }

    /// Remove every note.
    pub fn clear(&self) {
        let mut notes = self.inner.lock();
        notes.clear();
        self.inner.commit(&notes);
        tracing::info!("all notes cleared");
    }

    /// The collection in insertion order.
    pub fn list(&self) -> Vec<Note> {
        self.inner.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Note> {
        self.inner.lock().iter().find(|n| n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Wait for queued storage writes.
    pub async fn flush(&self) {
        self.inner.persisted.flush().await;
    }

    /// Adopt collections written by other contexts. The newest write replaces
    /// the in-memory collection wholesale and reminders are rearmed.
    pub fn watch_external(&self) -> Subscription {
        let inner = Arc::downgrade(&self.inner);
        self.inner.persisted.subscribe(move |incoming: Vec<Note>| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut notes = inner.lock();
            *notes = incoming;
            inner.rearm(&notes);
            tracing::info!(count = notes.len(), "note collection replaced by another context");
        })
    }
}
