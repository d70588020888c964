//! Notification display and the permission gate guarding it.

pub mod permission;

pub use permission::{FixedPrompt, Permission, PermissionGate, PermissionPrompt, TerminalPrompt};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::entity::Note;

pub const REMINDER_TITLE: &str = "Note reminder";
pub const DEFAULT_ICON: &str = "/icon-192.png";

/// A host-displayed alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    pub require_interaction: bool,
    pub silent: bool,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_ICON.to_string(),
            tag: tag.into(),
            require_interaction: false,
            silent: false,
        }
    }

    /// The daily reminder for `note`, tagged with its id.
    pub fn reminder(note: &Note) -> Self {
        Self::new(REMINDER_TITLE, note.content.clone(), note.id.clone())
    }
}

/// Somewhere notifications are displayed.
pub trait Notifier: Send + Sync {
    fn show(&self, notification: Notification);
}

/// Prints notifications to stdout.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show(&self, notification: Notification) {
        tracing::info!(tag = %notification.tag, title = %notification.title, "showing notification");
        println!("[{}] {}", notification.title, notification.body);
    }
}

/// Forwards notifications to a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn show(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}
