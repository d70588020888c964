use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{find_data_dir, Config, ConfigFileSource};
use crate::entity::{
    AppSettings, Note, ReminderTime, SortBy, NOTES_KEY, PERMISSION_KEY, REMINDER_PRESETS,
    SETTINGS_KEY,
};
use crate::error::{NoteminderError, Result};
use crate::notes::NoteStore;
use crate::notify::{ConsoleNotifier, FixedPrompt, Permission, PermissionGate, PermissionPrompt, TerminalPrompt};
use crate::reminder::ReminderScheduler;
use crate::storage::{clear_keys, FileStore, KeyValueStore, Persisted};
use crate::worker::{http, CacheStorage, HttpFetcher, Registration, WorkerContext};

const CACHE_DIR: &str = "cache";

/// Everything a command needs from the data directory.
struct Session {
    data_dir: PathBuf,
    config: Config,
    kv: Arc<FileStore>,
}

impl Session {
    fn open(dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = dir.unwrap_or_else(find_data_dir);
        let config = Config::load(&data_dir)?;
        let kv = Arc::new(FileStore::open_with_quota(&data_dir, config.storage_quota_bytes)?);
        tracing::debug!(path = %kv.path().display(), "storage opened");
        Ok(Self { data_dir, config, kv })
    }

    fn store(&self) -> Arc<dyn KeyValueStore> {
        self.kv.clone()
    }

    fn notes(&self) -> NoteStore {
        NoteStore::open(Persisted::new(self.store(), NOTES_KEY), Arc::new(SystemClock))
    }

    fn permission(&self) -> Persisted<Permission> {
        Persisted::new(self.store(), PERMISSION_KEY)
    }

    /// Gate backed by the stored decision, asking on the terminal if there is one.
    /// An explicit override is used as is and never stored.
    fn gate(&self, override_with: Option<Permission>) -> PermissionGate {
        let prompt: Arc<dyn PermissionPrompt> = if atty::is(atty::Stream::Stdin) {
            Arc::new(TerminalPrompt)
        } else {
            // Nobody to ask: leave the decision open for a later interactive run.
            Arc::new(FixedPrompt(Permission::Default))
        };
        match override_with {
            Some(permission) => PermissionGate::new(permission, prompt),
            None => PermissionGate::shared(self.permission(), self.config.permission, prompt),
        }
    }
}

fn confirm(question: &str) -> Result<bool> {
    eprintln!("{} [y/N] ", question);
    if !atty::is(atty::Stream::Stdin) {
        return Err(NoteminderError::ConfirmationRequired(
            "use --force to delete in non-interactive mode".to_string(),
        ));
    }
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn describe(note: &Note) -> String {
    match note.notification_time {
        Some(at) => format!("{}  {}  (daily at {})", note.id, note.content, at.display_12h()),
        None => format!("{}  {}", note.id, note.content),
    }
}

pub async fn handle_add(
    dir: Option<PathBuf>,
    content: Option<String>,
    at: Option<String>,
    stdin: bool,
    json: bool,
) -> Result<()> {
    let notification_time = at
        .as_deref()
        .map(|raw| {
            raw.parse::<ReminderTime>()
                .map_err(|_| NoteminderError::InvalidReminderTime(raw.to_string()))
        })
        .transpose()?;

    let content = if stdin {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        content.unwrap_or_default()
    };

    let session = Session::open(dir)?;
    let notes = session.notes();

    let Some(note) = notes.create(&content, notification_time) else {
        eprintln!("Nothing to add: the note is empty.");
        return Ok(());
    };
    notes.flush().await;

    let mut reminders_off = false;
    if note.has_reminder() {
        let gate = session.gate(None);
        reminders_off = !gate.ensure_granted().await;
        gate.flush().await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&note)?);
    } else {
        println!("Created note {}", describe(&note));
    }
    if reminders_off {
        eprintln!("Reminders are off: notifications are not allowed. The note was saved anyway.");
    }
    Ok(())
}

pub async fn handle_list(dir: Option<PathBuf>, sort: Option<String>, json: bool) -> Result<()> {
    let session = Session::open(dir)?;
    let sort_by = match sort {
        Some(raw) => raw.parse::<SortBy>().map_err(NoteminderError::Config)?,
        None => Persisted::new(session.store(), SETTINGS_KEY)
            .read(AppSettings::default())
            .sort_by
            .unwrap_or_default(),
    };

    let mut notes = session.notes().list();
    match sort_by {
        SortBy::Date => notes.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortBy::Alphabetical => {
            notes.sort_by(|a, b| a.content.to_lowercase().cmp(&b.content.to_lowercase()))
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
    } else if notes.is_empty() {
        println!("No notes yet. Add your first note!");
    } else {
        println!("Notes:\n");
        for note in &notes {
            println!("  {}", describe(note));
        }
    }
    Ok(())
}

pub async fn handle_delete(dir: Option<PathBuf>, id: String, force: bool) -> Result<()> {
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(NoteminderError::EmptyNoteId);
    }

    let session = Session::open(dir)?;
    let notes = session.notes();

    let matches: Vec<Note> = notes
        .list()
        .into_iter()
        .filter(|n| n.id == id || n.id.starts_with(&id))
        .collect();
    let note = match matches.as_slice() {
        [] => {
            eprintln!("No note matches '{}'; nothing deleted.", id);
            return Ok(());
        }
        [note] => note.clone(),
        _ => {
            return Err(NoteminderError::AmbiguousNoteId {
                prefix: id,
                count: matches.len(),
            })
        }
    };

    if !force && !confirm(&format!("Delete note {} - {}?", note.id, note.content))? {
        println!("Cancelled.");
        return Ok(());
    }

    notes.delete(&note.id);
    notes.flush().await;
    println!("Deleted note {}", note.id);
    Ok(())
}

pub async fn handle_clear(dir: Option<PathBuf>, all: bool, force: bool) -> Result<()> {
    let session = Session::open(dir)?;
    let notes = session.notes();
    let count = notes.len();

    if count == 0 && !all {
        println!("No notes to delete.");
        return Ok(());
    }
    let question = if all {
        format!("Delete all {} notes and forget saved settings?", count)
    } else {
        format!("Delete all {} notes?", count)
    };
    if !force && !confirm(&question)? {
        println!("Cancelled.");
        return Ok(());
    }

    notes.clear();
    notes.flush().await;
    if all {
        clear_keys(session.kv.as_ref(), &[NOTES_KEY, SETTINGS_KEY, PERMISSION_KEY]);
    }
    println!("Deleted {} notes.", count);
    Ok(())
}

pub async fn handle_times() -> Result<()> {
    for (value, label) in REMINDER_PRESETS {
        println!("  {:<6} {}", value.unwrap_or("-"), label);
    }
    Ok(())
}

pub async fn handle_run(dir: Option<PathBuf>, permission: Option<String>) -> Result<()> {
    let session = Session::open(dir)?;
    let permission_override = permission.map(|p| p.parse::<Permission>()).transpose()?;

    session
        .kv
        .watch(Duration::from_millis(session.config.watch_interval_ms));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gate = Arc::new(session.gate(permission_override));
    let scheduler = Arc::new(ReminderScheduler::new(
        Arc::clone(&clock),
        Arc::clone(&gate),
        Arc::new(ConsoleNotifier),
    ));
    let notes = NoteStore::with_scheduler(
        Persisted::new(session.store(), NOTES_KEY),
        clock,
        Arc::clone(&scheduler),
    );
    let external = notes.watch_external();

    if notes.list().iter().any(Note::has_reminder) {
        gate.ensure_granted().await;
    }

    println!(
        "Watching {} notes, {} reminders armed (notifications {}). Press Ctrl-C to stop.",
        notes.len(),
        scheduler.armed_count(),
        gate.current_permission()
    );
    tracing::info!(dir = %session.data_dir.display(), "reminder loop started");

    tokio::signal::ctrl_c().await?;

    external.cancel();
    scheduler.teardown();
    notes.flush().await;
    gate.flush().await;
    tracing::info!("reminder loop stopped");
    Ok(())
}

pub async fn handle_serve(
    dir: Option<PathBuf>,
    upstream: Option<String>,
    bind: Option<String>,
) -> Result<()> {
    let session = Session::open(dir)?;
    let upstream = upstream.unwrap_or_else(|| session.config.upstream.clone());
    let bind = bind.unwrap_or_else(|| session.config.bind.clone());

    let caches = CacheStorage::persistent(&session.data_dir.join(CACHE_DIR))?;
    let ctx = WorkerContext::with_caches(
        caches,
        Arc::new(HttpFetcher::new(&upstream)),
        Arc::new(ConsoleNotifier),
    );
    let registration = Arc::new(
        Registration::start(session.config.worker.clone(), ctx, session.config.skip_waiting).await,
    );

    let shutdown = CancellationToken::new();
    let poller = Arc::clone(&registration).poll_updates(
        Arc::new(ConfigFileSource::new(&session.data_dir)),
        Duration::from_secs(session.config.update_interval_secs),
        shutdown.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, %upstream, "serving through offline cache worker");
    println!("Serving {} on http://{}", upstream, bind);

    let stop = shutdown.clone();
    axum::serve(listener, http::router(registration))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            stop.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = poller.await;
    Ok(())
}
