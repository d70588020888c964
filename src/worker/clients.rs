use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientWindow {
    pub id: u64,
    pub url: String,
    pub focused: bool,
    /// Whether the active worker controls this window.
    pub controlled: bool,
}

/// What a notification click did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "client", rename_all = "lowercase")]
pub enum ClickOutcome {
    Focused(u64),
    Opened(u64),
}

#[derive(Default)]
struct Windows {
    open: Vec<ClientWindow>,
    next_id: u64,
}

/// The windows open on this origin.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    windows: Arc<Mutex<Windows>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly loaded window. It starts uncontrolled until claimed.
    pub fn connect(&self, url: &str) -> u64 {
        self.add(url, false, false)
    }

    pub fn disconnect(&self, id: u64) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.open.len();
        windows.open.retain(|w| w.id != id);
        windows.open.len() != before
    }

    pub fn list(&self) -> Vec<ClientWindow> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .clone()
    }

    /// Take control of every open window.
    pub fn claim(&self) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        for window in &mut windows.open {
            window.controlled = true;
        }
        windows.open.len()
    }

    /// Focus the first open window, or open a new one at `url`.
    pub fn focus_or_open(&self, url: &str) -> ClickOutcome {
        {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(first) = windows.open.first().map(|w| w.id) {
                for window in &mut windows.open {
                    window.focused = window.id == first;
                }
                return ClickOutcome::Focused(first);
            }
        }
        ClickOutcome::Opened(self.add(url, true, true))
    }

    fn add(&self, url: &str, focused: bool, controlled: bool) -> u64 {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.next_id += 1;
        let id = windows.next_id;
        windows.open.push(ClientWindow {
            id,
            url: url.to_string(),
            focused,
            controlled,
        });
        id
    }
}
