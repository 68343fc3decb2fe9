// Broadcast engine: on a change signal, re-execute each distinct subscribed
// query exactly once and fan the rows out to every connection in that query
// group. Query groups are derived per cycle from the registry snapshot and
// never stored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use tablecast_common::protocol::ws::ServerMessage;

use crate::registry::{ConnectionId, Subscription, SubscriptionRegistry};
use crate::store::StoreAdapter;

pub struct BroadcastEngine {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<dyn StoreAdapter>,
    /// Outbound sink per live connection. Each websocket task drains its
    /// own receiver, so a slow client never blocks a broadcast cycle.
    sinks: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<SubscriptionRegistry>, store: Arc<dyn StoreAdapter>) -> Self {
        Self { registry, store, sinks: Mutex::new(HashMap::new()) }
    }

    /// Register the outbound sink for a connection, called on socket open.
    pub fn register_sink(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let mut sinks = self.sinks.lock().expect("sink table lock poisoned");
        sinks.insert(connection_id, sender);
    }

    /// Drop a connection's sink, called on disconnect. Idempotent.
    pub fn remove_sink(&self, connection_id: ConnectionId) {
        let mut sinks = self.sinks.lock().expect("sink table lock poisoned");
        sinks.remove(&connection_id);
    }

    /// Queue a message for one connection. Closed sinks are tolerated; the
    /// disconnect path removes them shortly after.
    pub fn push(&self, connection_id: ConnectionId, message: ServerMessage) {
        let sinks = self.sinks.lock().expect("sink table lock poisoned");
        if let Some(sink) = sinks.get(&connection_id) {
            if sink.send(message).is_err() {
                debug!(connection = %connection_id, "sink closed, dropping message");
            }
        }
    }

    /// Run the subscription's query and push its one-time initial snapshot.
    /// A failing query becomes an error message on that connection only.
    pub fn send_initial(&self, subscription: &Subscription) {
        match self.store.query(&subscription.db_path, &subscription.query, &[]) {
            Ok(rows) => {
                self.push(subscription.connection_id, ServerMessage::Initial { data: rows });
            }
            Err(err) => {
                warn!(
                    db = %subscription.db_path,
                    query = %subscription.query,
                    error = %err,
                    "initial query failed"
                );
                self.push(
                    subscription.connection_id,
                    ServerMessage::Error { message: err.to_string() },
                );
            }
        }
    }

    /// One broadcast cycle for `db_path`: group the current subscriptions by
    /// resolved query string, execute each distinct query once, and deliver
    /// the rows to every member of the group. A failing query sends an error
    /// to its group and never blocks delivery to healthy groups.
    pub fn broadcast_change(&self, db_path: &str) {
        let subscriptions = self.registry.subscriptions_for(db_path);
        if subscriptions.is_empty() {
            return;
        }

        let mut groups: HashMap<&str, Vec<ConnectionId>> = HashMap::new();
        for subscription in &subscriptions {
            groups.entry(subscription.query.as_str()).or_default().push(subscription.connection_id);
        }

        debug!(
            db = db_path,
            subscriptions = subscriptions.len(),
            queries = groups.len(),
            "broadcast cycle"
        );

        for (query, members) in groups {
            match self.store.query(db_path, query, &[]) {
                Ok(rows) => {
                    for connection_id in members {
                        self.push(connection_id, ServerMessage::Update { data: rows.clone() });
                    }
                }
                Err(err) => {
                    warn!(db = db_path, query, error = %err, "broadcast query failed");
                    let message = err.to_string();
                    for connection_id in members {
                        self.push(
                            connection_id,
                            ServerMessage::Error { message: message.clone() },
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{bail, Result};
    use serde_json::{json, Value};
    use uuid::Uuid;

    use tablecast_common::protocol::ws::Row;

    use super::*;

    /// In-memory store: canned rows per query, plus an execution counter.
    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<HashMap<String, Vec<Row>>>,
        executions: AtomicUsize,
    }

    impl FakeStore {
        fn set_rows(&self, query: &str, rows: Vec<Row>) {
            self.rows.lock().unwrap().insert(query.to_string(), rows);
        }

        fn executions(&self) -> usize {
            self.executions.load(Ordering::SeqCst)
        }
    }

    impl StoreAdapter for FakeStore {
        fn query(&self, _db_path: &str, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            match self.rows.lock().unwrap().get(sql) {
                Some(rows) => Ok(rows.clone()),
                None => bail!("no such table"),
            }
        }

        fn run(&self, _db_path: &str, _sql: &str) -> Result<()> {
            Ok(())
        }

        fn watch_path(&self, db_path: &str) -> Result<PathBuf> {
            Ok(PathBuf::from(db_path))
        }

        fn read_file(&self, _file_path: &str) -> Result<String> {
            bail!("not a filesystem store")
        }

        fn write_file(&self, _file_path: &str, _content: &str) -> Result<()> {
            bail!("not a filesystem store")
        }
    }

    fn row(id: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!(id));
        row
    }

    struct Harness {
        registry: Arc<SubscriptionRegistry>,
        store: Arc<FakeStore>,
        engine: BroadcastEngine,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SubscriptionRegistry::new());
        let store = Arc::new(FakeStore::default());
        let engine = BroadcastEngine::new(registry.clone(), store.clone());
        Harness { registry, store, engine }
    }

    fn connect(
        harness: &Harness,
        db_path: &str,
        query: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        harness.engine.register_sink(connection_id, tx);
        harness.registry.subscribe(Subscription {
            connection_id,
            db_path: db_path.into(),
            query: query.into(),
        });
        (connection_id, rx)
    }

    // ── Initial snapshots ──────────────────────────────────────────

    #[test]
    fn initial_snapshot_uses_the_query_path() {
        let harness = harness();
        harness.store.set_rows("SELECT * FROM messages", vec![row(1)]);
        let (connection_id, mut rx) = connect(&harness, "app/db.sqlite", "SELECT * FROM messages");

        harness.engine.send_initial(&Subscription {
            connection_id,
            db_path: "app/db.sqlite".into(),
            query: "SELECT * FROM messages".into(),
        });

        match rx.try_recv().unwrap() {
            ServerMessage::Initial { data } => assert_eq!(data, vec![row(1)]),
            other => panic!("expected initial, got {other:?}"),
        }
    }

    #[test]
    fn failing_initial_becomes_an_error_message() {
        let harness = harness();
        let (connection_id, mut rx) = connect(&harness, "app/db.sqlite", "SELECT * FROM missing");

        harness.engine.send_initial(&Subscription {
            connection_id,
            db_path: "app/db.sqlite".into(),
            query: "SELECT * FROM missing".into(),
        });

        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
    }

    // ── Query-group dedupe and fan-out ─────────────────────────────

    #[test]
    fn identical_queries_execute_once_and_fan_out() {
        let harness = harness();
        harness.store.set_rows("SELECT * FROM messages", vec![row(1), row(2)]);
        let (_, mut rx_a) = connect(&harness, "app/db.sqlite", "SELECT * FROM messages");
        let (_, mut rx_b) = connect(&harness, "app/db.sqlite", "SELECT * FROM messages");

        harness.engine.broadcast_change("app/db.sqlite");

        assert_eq!(harness.store.executions(), 1);
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerMessage::Update { data } => assert_eq!(data.len(), 2),
                other => panic!("expected update, got {other:?}"),
            }
        }
    }

    #[test]
    fn distinct_queries_each_execute() {
        let harness = harness();
        harness.store.set_rows("SELECT * FROM messages", vec![row(1)]);
        harness.store.set_rows("SELECT * FROM versions", vec![row(9)]);
        let (_, mut rx_a) = connect(&harness, "app/db.sqlite", "SELECT * FROM messages");
        let (_, mut rx_b) = connect(&harness, "app/db.sqlite", "SELECT * FROM versions");

        harness.engine.broadcast_change("app/db.sqlite");

        assert_eq!(harness.store.executions(), 2);
        assert!(matches!(rx_a.try_recv().unwrap(), ServerMessage::Update { .. }));
        assert!(matches!(rx_b.try_recv().unwrap(), ServerMessage::Update { .. }));
    }

    #[test]
    fn broadcast_only_reaches_the_changed_database() {
        let harness = harness();
        harness.store.set_rows("SELECT * FROM messages", vec![row(1)]);
        let (_, mut rx_a) = connect(&harness, "app/db.sqlite", "SELECT * FROM messages");
        let (_, mut rx_b) = connect(&harness, "other/db.sqlite", "SELECT * FROM messages");

        harness.engine.broadcast_change("app/db.sqlite");

        assert!(matches!(rx_a.try_recv().unwrap(), ServerMessage::Update { .. }));
        assert!(rx_b.try_recv().is_err());
    }

    // ── Failure containment ────────────────────────────────────────

    #[test]
    fn failing_group_never_blocks_healthy_groups() {
        let harness = harness();
        harness.store.set_rows("SELECT * FROM messages", vec![row(1)]);
        let (_, mut rx_bad) = connect(&harness, "app/db.sqlite", "SELECT * FROM missing");
        let (_, mut rx_good) = connect(&harness, "app/db.sqlite", "SELECT * FROM messages");

        harness.engine.broadcast_change("app/db.sqlite");

        assert!(matches!(rx_bad.try_recv().unwrap(), ServerMessage::Error { .. }));
        assert!(matches!(rx_good.try_recv().unwrap(), ServerMessage::Update { .. }));
    }

    #[test]
    fn dropped_receiver_is_tolerated() {
        let harness = harness();
        harness.store.set_rows("SELECT * FROM messages", vec![row(1)]);
        let (_, rx) = connect(&harness, "app/db.sqlite", "SELECT * FROM messages");
        drop(rx);

        // Must not panic or error out of the cycle.
        harness.engine.broadcast_change("app/db.sqlite");
    }

    #[test]
    fn no_subscriptions_means_no_queries() {
        let harness = harness();
        harness.engine.broadcast_change("app/db.sqlite");
        assert_eq!(harness.store.executions(), 0);
    }
}
