// Database file watching: one OS watcher (fsevents on macOS, inotify on
// Linux) per distinct database file, refcounted by subscriber interest.
//
// SQLite issues several write syscalls per transaction; the observable unit
// here is "at least one change since the last signal". All signals from all
// watched files funnel into a single channel consumed by the debounced
// broadcast loop — nothing is ever broadcast from inside the OS callback.

pub mod debounce;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Logical "this database changed" signal, stripped of event detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSignal {
    pub db_path: String,
}

/// Capacity for the shared change-signal channel.
const SIGNAL_CHANNEL_CAPACITY: usize = 512;

struct WatchEntry {
    /// None when the file could not be watched yet (e.g. not created);
    /// retried on the next subscribe for this database.
    watcher: Option<RecommendedWatcher>,
    subscribers: usize,
}

/// Refcounted notify watchers keyed by database id.
pub struct WatchMultiplexer {
    entries: Mutex<HashMap<String, WatchEntry>>,
    signal_tx: mpsc::Sender<ChangeSignal>,
}

impl WatchMultiplexer {
    /// Returns the multiplexer and the receiver the broadcast loop drains.
    pub fn new() -> (Self, mpsc::Receiver<ChangeSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        (Self { entries: Mutex::new(HashMap::new()), signal_tx }, signal_rx)
    }

    /// Register interest in `db_path`, starting a watcher on `file` on the
    /// first call. Safe to call concurrently: the entry map is guarded by
    /// one mutex, so exactly one watcher is created per file. A file that
    /// cannot be watched yet is skipped and retried on the next subscribe.
    pub fn ensure_watch(&self, db_path: &str, file: &Path) {
        let mut entries = self.entries.lock().expect("watch table lock poisoned");
        let entry = entries
            .entry(db_path.to_string())
            .or_insert(WatchEntry { watcher: None, subscribers: 0 });
        entry.subscribers += 1;

        if entry.watcher.is_none() {
            match start_watcher(&self.signal_tx, db_path, file) {
                Ok(watcher) => {
                    debug!(db = db_path, path = %file.display(), "database watcher started");
                    entry.watcher = Some(watcher);
                }
                Err(err) => {
                    warn!(
                        db = db_path,
                        error = %err,
                        "cannot watch database file yet; will retry on next subscribe"
                    );
                }
            }
        }
    }

    /// Drop one unit of interest. The last release tears the watcher down
    /// immediately, freeing the OS watch handle.
    pub fn release_watch(&self, db_path: &str) {
        let mut entries = self.entries.lock().expect("watch table lock poisoned");
        let Some(entry) = entries.get_mut(db_path) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers == 0 {
            entries.remove(db_path);
            debug!(db = db_path, "last subscriber gone, watcher released");
        }
    }

    /// Number of databases with any registered interest.
    pub fn watched_databases(&self) -> usize {
        self.entries.lock().expect("watch table lock poisoned").len()
    }

    /// Subscriber count for one database id (0 when unknown).
    pub fn subscriber_count(&self, db_path: &str) -> usize {
        self.entries
            .lock()
            .expect("watch table lock poisoned")
            .get(db_path)
            .map_or(0, |entry| entry.subscribers)
    }

    /// True when a live OS watcher exists for this database id.
    pub fn is_watching(&self, db_path: &str) -> bool {
        self.entries
            .lock()
            .expect("watch table lock poisoned")
            .get(db_path)
            .is_some_and(|entry| entry.watcher.is_some())
    }
}

fn start_watcher(
    signal_tx: &mpsc::Sender<ChangeSignal>,
    db_path: &str,
    file: &Path,
) -> Result<RecommendedWatcher> {
    let tx = signal_tx.clone();
    let db = db_path.to_string();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !is_content_event(&event.kind) {
                trace!(db = %db, kind = ?event.kind, "skipping non-content event");
                return;
            }
            // Hand the signal to the broadcast loop; the callback itself
            // never re-queries or broadcasts.
            if tx.blocking_send(ChangeSignal { db_path: db.clone() }).is_err() {
                debug!("change signal channel closed, stopping event dispatch");
            }
        }
        Err(err) => {
            error!(db = %db, error = %err, "database watcher error");
        }
    })
    .context("failed to create database watcher")?;

    watcher
        .watch(file, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch `{}`", file.display()))?;

    Ok(watcher)
}

/// Write-shaped events count as changes; metadata-only and access events
/// do not.
fn is_content_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(modify_kind) => {
            !matches!(modify_kind, notify::event::ModifyKind::Metadata(_))
        }
        EventKind::Access(_) => false,
        _ => true,
    }
}
