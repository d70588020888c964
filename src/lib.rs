pub mod cli;
pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod logging;
pub mod notes;
pub mod notify;
pub mod reminder;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use error::{NoteminderError, Result};
pub use notes::NoteStore;
pub use reminder::ReminderScheduler;
pub use worker::{OfflineWorker, Registration};
