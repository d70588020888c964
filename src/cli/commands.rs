use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "noteminder")]
#[command(version, about = "Local-first notes with daily reminders")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to the nearest .noteminder/)
    #[arg(long, global = true, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a note
    Add {
        /// Note content
        #[arg(required_unless_present = "stdin")]
        content: Option<String>,

        /// Daily reminder time (HH:MM, 24-hour)
        #[arg(long, value_name = "HH:MM")]
        at: Option<String>,

        /// Read content from stdin
        #[arg(long)]
        stdin: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List notes
    List {
        /// Sort order (date, alphabetical); defaults to the saved preference
        #[arg(long)]
        sort: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a note
    Delete {
        /// Note ID (full or unique prefix)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Delete every note
    Clear {
        /// Also forget saved settings and the notification decision
        #[arg(long)]
        all: bool,

        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Show the reminder time presets
    Times,

    /// Keep running and show reminders as they come due
    Run {
        /// Notification permission to use instead of asking (granted, denied, default)
        #[arg(long)]
        permission: Option<String>,
    },

    /// Serve the app through the offline cache worker
    Serve {
        /// Origin to fetch from while online
        #[arg(long)]
        upstream: Option<String>,

        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
}
