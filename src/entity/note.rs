// src/entity/note.rs
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::ReminderTime;

/// Opaque note identifier: `<epoch-millis>-<random suffix>`.
pub type NoteId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_reminder"
    )]
    pub notification_time: Option<ReminderTime>,
}

impl Note {
    /// Build a note stamped at `now_ms`. Returns `None` when `content` is blank.
    pub fn new(
        content: &str,
        notification_time: Option<ReminderTime>,
        now_ms: i64,
    ) -> Option<Self> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        Some(Self {
            id: generate_id(now_ms),
            content: content.to_string(),
            created_at: now_ms,
            updated_at: now_ms,
            notification_time,
        })
    }

    pub fn has_reminder(&self) -> bool {
        self.notification_time.is_some()
    }
}

/// Timestamp plus the first nine hex digits of a v4 UUID.
pub fn generate_id(now_ms: i64) -> NoteId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now_ms, &suffix[..9])
}

// "" means no reminder. An unreadable time drops the reminder, not the note.
fn deserialize_reminder<'de, D>(deserializer: D) -> Result<Option<ReminderTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let parsed = match raw.as_str().map(str::trim) {
        Some("") => return Ok(None),
        Some(value) => value.parse::<ReminderTime>().ok(),
        None => None,
    };
    if parsed.is_none() {
        tracing::warn!(value = %raw, "ignoring unreadable reminder time");
    }
    Ok(parsed)
}
