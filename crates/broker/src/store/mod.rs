// Store adapter: the read/write seam over the embedded databases.
//
// The broadcast engine only reads through this trait, which keeps it
// testable with a fake and keeps SQLite out of the broker's hot path types.
// Writes happen through `run` (or external processes entirely) and are
// observed indirectly via filesystem events.

pub mod sqlite;

use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;

use tablecast_common::protocol::ws::Row;

pub trait StoreAdapter: Send + Sync {
    /// Execute a read query against a database id and return its rows as
    /// opaque JSON objects, in executor order.
    fn query(&self, db_path: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute one or more statements (writes) against a database id.
    fn run(&self, db_path: &str, sql: &str) -> Result<()>;

    /// The filesystem path the watcher observes for this database id.
    fn watch_path(&self, db_path: &str) -> Result<PathBuf>;

    /// Read a text file on the same volume (patched sources live next to
    /// the databases).
    fn read_file(&self, file_path: &str) -> Result<String>;

    /// Write a text file on the volume. The broker never writes databases
    /// directly; this is the persistence path for patched file content.
    fn write_file(&self, file_path: &str, content: &str) -> Result<()>;
}
