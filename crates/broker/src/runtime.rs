// Broker runtime: owns the registry, watch multiplexer, broadcast engine
// and store, and drives the debounced broadcast loop. Constructed at
// service start and injected into the connection handlers; nothing here is
// ambient global state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace};

use crate::broadcast::BroadcastEngine;
use crate::config::BrokerConfig;
use crate::registry::SubscriptionRegistry;
use crate::rpc::ws;
use crate::store::sqlite::SqliteStore;
use crate::store::StoreAdapter;
use crate::watcher::debounce::{DebounceConfig, Debouncer};
use crate::watcher::{ChangeSignal, WatchMultiplexer};

/// How often the broadcast loop checks the debouncer for ready signals.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared handles injected into every connection handler.
#[derive(Clone)]
pub struct BrokerState {
    pub registry: Arc<SubscriptionRegistry>,
    pub watcher: Arc<WatchMultiplexer>,
    pub engine: Arc<BroadcastEngine>,
    pub store: Arc<dyn StoreAdapter>,
}

pub struct Broker {
    state: BrokerState,
    signal_rx: mpsc::Receiver<ChangeSignal>,
    debounce: DebounceConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl Broker {
    pub fn new(config: &BrokerConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (watcher, signal_rx) = WatchMultiplexer::new();
        let watcher = Arc::new(watcher);
        let store: Arc<dyn StoreAdapter> = Arc::new(SqliteStore::new(&config.volume_root));
        let engine = Arc::new(BroadcastEngine::new(registry.clone(), store.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            state: BrokerState { registry, watcher, engine, store },
            signal_rx,
            debounce: DebounceConfig::with_millis(config.debounce_ms),
            shutdown_tx,
        }
    }

    /// Handles for inspection and for wiring into routers in tests.
    pub fn state(&self) -> BrokerState {
        self.state.clone()
    }

    /// Sender that stops the broadcast loop when fired.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve the websocket/http surface and run the broadcast loop until
    /// the server exits or shutdown fires.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let Broker { state, signal_rx, debounce, shutdown_tx } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "tablecast broker listening");
        }

        let loop_task = tokio::spawn(run_broadcast_loop(
            signal_rx,
            state.engine.clone(),
            debounce,
            shutdown_tx.subscribe(),
        ));

        let result = ws::serve(listener, state).await;

        let _ = shutdown_tx.send(());
        let _ = loop_task.await;
        result
    }
}

/// Consumes raw change signals, debounces them, and triggers one broadcast
/// cycle per ready database. Exits when the signal channel closes (all
/// watchers dropped with the multiplexer) or shutdown fires.
async fn run_broadcast_loop(
    mut signal_rx: mpsc::Receiver<ChangeSignal>,
    engine: Arc<BroadcastEngine>,
    config: DebounceConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut debouncer = Debouncer::new(config);

    debug!("broadcast loop started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("broadcast loop shutting down");
                break;
            }

            maybe_signal = signal_rx.recv() => {
                match maybe_signal {
                    Some(signal) => {
                        trace!(db = %signal.db_path, "change signal received");
                        debouncer.push(&signal.db_path);
                    }
                    None => {
                        debug!("signal channel closed, broadcast loop exiting");
                        break;
                    }
                }
            }

            _ = tokio::time::sleep(POLL_INTERVAL) => {
                // Check for ready debounced signals.
            }
        }

        for db_path in debouncer.drain_ready() {
            engine.broadcast_change(&db_path);
        }
    }
}
