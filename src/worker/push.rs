use serde::Deserialize;

use crate::notify::{Notification, REMINDER_TITLE};

pub const DEFAULT_PUSH_BODY: &str = "You have a pending note";
pub const DEFAULT_PUSH_TAG: &str = "note-reminder";

/// Optional JSON body of a background message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tag: Option<String>,
}

impl PushPayload {
    /// Parse raw message data. Missing or malformed data yields an empty payload.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return Self::default();
        };
        serde_json::from_slice(data).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "malformed push payload, using defaults");
            Self::default()
        })
    }

    pub fn into_notification(self) -> Notification {
        Notification::new(
            self.title.unwrap_or_else(|| REMINDER_TITLE.to_string()),
            self.body.unwrap_or_else(|| DEFAULT_PUSH_BODY.to_string()),
            self.tag.unwrap_or_else(|| DEFAULT_PUSH_TAG.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::DEFAULT_ICON;

    #[test]
    fn test_defaults_without_data() {
        let n = PushPayload::parse(None).into_notification();
        assert_eq!(n.title, REMINDER_TITLE);
        assert_eq!(n.body, DEFAULT_PUSH_BODY);
        assert_eq!(n.tag, DEFAULT_PUSH_TAG);
        assert_eq!(n.icon, DEFAULT_ICON);
        assert_eq!(n.badge, DEFAULT_ICON);
    }

    #[test]
    fn test_partial_payload() {
        let n = PushPayload::parse(Some(br#"{"body":"Call mum"}"#)).into_notification();
        assert_eq!(n.title, REMINDER_TITLE);
        assert_eq!(n.body, "Call mum");
        assert_eq!(n.tag, DEFAULT_PUSH_TAG);
    }

    #[test]
    fn test_full_payload() {
        let n = PushPayload::parse(Some(br#"{"title":"T","body":"B","tag":"note-1"}"#))
            .into_notification();
        assert_eq!((n.title.as_str(), n.body.as_str(), n.tag.as_str()), ("T", "B", "note-1"));
    }

    #[test]
    fn test_malformed_payload_uses_defaults() {
        assert_eq!(PushPayload::parse(Some(b"not json")), PushPayload::default());
        assert_eq!(PushPayload::parse(Some(b"")), PushPayload::default());
    }
}
