use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::NoteminderError;

/// Preset reminder choices offered when adding a note. `None` means "no reminder".
pub const REMINDER_PRESETS: [(Option<&str>, &str); 4] = [
    (Some("09:00"), "9:00 AM"),
    (Some("10:00"), "10:00 AM"),
    (Some("11:00"), "11:00 AM"),
    (None, "No reminder"),
];

/// A daily local wall-clock time, stored as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReminderTime {
    hour: u8,
    minute: u8,
}

impl ReminderTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour.into(), self.minute.into(), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// 12-hour display form, e.g. `9:00 AM` or `12:30 PM`.
    pub fn display_12h(&self) -> String {
        let period = if self.hour >= 12 { "PM" } else { "AM" };
        let hour = match self.hour {
            0 => 12,
            h if h > 12 => h - 12,
            h => h,
        };
        format!("{}:{:02} {}", hour, self.minute, period)
    }
}

impl fmt::Display for ReminderTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ReminderTime {
    type Err = NoteminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NoteminderError::InvalidReminderTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for ReminderTime {
    type Error = NoteminderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReminderTime> for String {
    fn from(value: ReminderTime) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let t: ReminderTime = "09:00".parse().unwrap();
        assert_eq!((t.hour(), t.minute()), (9, 0));
        let t: ReminderTime = "23:59".parse().unwrap();
        assert_eq!((t.hour(), t.minute()), (23, 59));
        let t: ReminderTime = "7:05".parse().unwrap();
        assert_eq!(t.to_string(), "07:05");
    }

    #[test]
    fn test_parse_invalid() {
        for raw in ["", "9", "24:00", "12:60", "ab:cd", "12:5", "123:00", "-1:00"] {
            assert!(raw.parse::<ReminderTime>().is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_display_12h() {
        let cases = [
            ("09:00", "9:00 AM"),
            ("00:05", "12:05 AM"),
            ("12:30", "12:30 PM"),
            ("13:00", "1:00 PM"),
            ("23:45", "11:45 PM"),
        ];
        for (raw, expected) in cases {
            let t: ReminderTime = raw.parse().unwrap();
            assert_eq!(t.display_12h(), expected);
        }
    }

    #[test]
    fn test_presets_are_valid() {
        for (value, label) in REMINDER_PRESETS {
            if let Some(value) = value {
                let t: ReminderTime = value.parse().unwrap();
                assert_eq!(t.display_12h(), label);
            }
        }
    }
}
