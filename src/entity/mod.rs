mod note;
mod reminder_time;
mod settings;

pub use note::{generate_id, Note, NoteId};
pub use reminder_time::{ReminderTime, REMINDER_PRESETS};
pub use settings::{AppSettings, SortBy, Theme};

/// Storage key holding the serialized note collection.
pub const NOTES_KEY: &str = "notes-app-data";

/// Storage key reserved for [`AppSettings`].
pub const SETTINGS_KEY: &str = "notes-app-settings";

/// Storage key remembering the user's notification decision between runs.
pub const PERMISSION_KEY: &str = "notes-app-permission";
