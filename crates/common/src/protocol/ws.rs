// WebSocket message types for the tablecast realtime protocol.
//
// Framing is one JSON object per message. The client sends subscribe
// descriptors; the server pushes snapshots and updates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One result row, mirrored straight from the query's result columns.
/// The broker never interprets row shape.
pub type Row = Map<String, Value>;

/// Client -> Server: subscribe to the result set of a table or query.
///
/// Exactly one of `table`/`query` is meaningful; an explicit `query` wins.
/// Sending another subscribe on an already-subscribed connection replaces
/// the prior subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Logical database id: a file path relative to the volume root,
    /// e.g. `my-app/db.sqlite`.
    pub db_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Full SQL override for subscriptions more specific than a whole table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl SubscribeRequest {
    /// Resolve to the SQL this subscription re-executes on every change
    /// signal. `table` is sugar for `SELECT * FROM <table>`.
    pub fn resolved_query(&self) -> Result<String, SubscribeError> {
        if let Some(query) = self.query.as_deref() {
            let query = query.trim();
            if !query.is_empty() {
                return Ok(query.to_string());
            }
        }
        match self.table.as_deref().map(str::trim) {
            Some(table) if !table.is_empty() => {
                if !is_bare_identifier(table) {
                    return Err(SubscribeError::InvalidTableName { table: table.to_string() });
                }
                Ok(format!("SELECT * FROM {table}"))
            }
            _ => Err(SubscribeError::MissingSource),
        }
    }
}

/// Only bare identifiers may be spliced into the `SELECT * FROM` sugar.
fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A subscribe descriptor the registry refuses to record.
///
/// Rejection leaves any prior subscription for the connection untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("subscribe request must name a table or a query")]
    MissingSource,
    #[error("table name `{table}` is not a bare identifier")]
    InvalidTableName { table: String },
}

/// Server -> Client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the socket opens.
    Connected,
    /// Snapshot sent exactly once per subscribe, always before any update
    /// for that subscription.
    Initial { data: Vec<Row> },
    /// Re-queried rows after the database file changed.
    Update { data: Vec<Row> },
    /// Per-subscription failure. Other subscriptions on the same database
    /// are unaffected.
    Error { message: String },
}
