// Change-signal debouncer.
//
// SQLite write bursts produce a stream of filesystem events per transaction;
// this coalesces signals for the same database id within a configurable
// window (default 100ms, range 50–500ms) so a burst costs one broadcast
// cycle, not one per syscall.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default debounce window.
const DEFAULT_DEBOUNCE_MS: u64 = 100;
/// Minimum allowed debounce window.
const MIN_DEBOUNCE_MS: u64 = 50;
/// Maximum allowed debounce window.
const MAX_DEBOUNCE_MS: u64 = 500;

/// Configuration for the debouncer.
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    pub window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_DEBOUNCE_MS) }
    }
}

impl DebounceConfig {
    /// Create a config with the given window in milliseconds, clamped to [50, 500].
    pub fn with_millis(ms: u64) -> Self {
        let clamped = ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        Self { window: Duration::from_millis(clamped) }
    }
}

/// Debounces change signals per database id.
///
/// Call `push()` for each incoming signal, then `drain_ready()` periodically
/// to collect database ids whose window has elapsed.
pub struct Debouncer {
    config: DebounceConfig,
    pending: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self { config, pending: HashMap::new() }
    }

    /// Record a change signal. A signal already pending for this database
    /// is coalesced and its timer reset.
    pub fn push(&mut self, db_path: &str) {
        self.push_at(db_path, Instant::now());
    }

    /// Like `push` but with a specific timestamp (for testing).
    fn push_at(&mut self, db_path: &str, now: Instant) {
        self.pending.insert(db_path.to_string(), now);
    }

    /// Drain all database ids whose debounce window has elapsed.
    pub fn drain_ready(&mut self) -> Vec<String> {
        self.drain_ready_at(Instant::now())
    }

    /// Like `drain_ready` but with a specific timestamp (for testing).
    fn drain_ready_at(&mut self, now: Instant) -> Vec<String> {
        let window = self.config.window;
        let mut ready = Vec::new();

        self.pending.retain(|db_path, last_seen| {
            if now.duration_since(*last_seen) >= window {
                ready.push(db_path.clone());
                false
            } else {
                true
            }
        });

        ready
    }

    /// Number of databases still waiting in the debounce window.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Time until the next pending signal becomes ready, or None if empty.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|last_seen| *last_seen + self.config.window).min()
    }
}
