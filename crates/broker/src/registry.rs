// Subscription registry: maps each live connection to its one subscription.
//
// Owned by the broker runtime and injected into the connection handler —
// never ambient global state. Contents are in-memory only and do not
// survive a process restart.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use tablecast_common::protocol::ws::{SubscribeError, SubscribeRequest};

/// Identity of one live websocket connection.
pub type ConnectionId = Uuid;

/// A connection's standing interest in one query's result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub connection_id: ConnectionId,
    /// Logical database id the watcher keys off of.
    pub db_path: String,
    /// Resolved SQL, re-executed on every change signal.
    pub query: String,
}

impl Subscription {
    /// Validate a wire descriptor into a subscription.
    pub fn from_request(
        connection_id: ConnectionId,
        request: &SubscribeRequest,
    ) -> Result<Self, SubscribeError> {
        Ok(Self {
            connection_id,
            db_path: request.db_path.clone(),
            query: request.resolved_query()?,
        })
    }
}

/// Connection → subscription map. A connection has at most one active
/// subscription; a later subscribe replaces it.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<HashMap<ConnectionId, Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the subscription, atomically replacing any prior one for the
    /// same connection. Returns the replaced subscription so the caller can
    /// release its watcher interest.
    pub fn subscribe(&self, subscription: Subscription) -> Option<Subscription> {
        let mut map = self.inner.lock().expect("subscription registry lock poisoned");
        map.insert(subscription.connection_id, subscription)
    }

    /// Idempotent removal. Returns the subscription if one existed.
    pub fn unsubscribe(&self, connection_id: ConnectionId) -> Option<Subscription> {
        let mut map = self.inner.lock().expect("subscription registry lock poisoned");
        map.remove(&connection_id)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Subscription> {
        let map = self.inner.lock().expect("subscription registry lock poisoned");
        map.get(&connection_id).cloned()
    }

    /// Consistent snapshot of every subscription on `db_path`, taken under
    /// a single lock acquisition so one broadcast cycle sees one state.
    pub fn subscriptions_for(&self, db_path: &str) -> Vec<Subscription> {
        let map = self.inner.lock().expect("subscription registry lock poisoned");
        map.values().filter(|s| s.db_path == db_path).cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        let map = self.inner.lock().expect("subscription registry lock poisoned");
        map.len()
    }
}
