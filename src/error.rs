use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoteminderError {
    #[error("Note ID '{prefix}' is ambiguous: {count} notes match")]
    AmbiguousNoteId { prefix: String, count: usize },

    #[error("Invalid reminder time '{0}'. Expected HH:MM (24-hour)")]
    InvalidReminderTime(String),

    #[error("Note ID must not be empty")]
    EmptyNoteId,

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage quota exceeded: {needed} bytes (max {max})")]
    QuotaExceeded { needed: usize, max: usize },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Worker install failed: {0}")]
    Install(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NoteminderError>;
