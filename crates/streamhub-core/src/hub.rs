//! The top-level registry: one [`Hub`] per process, owning every
//! [`Watcher`] and handing out [`Client`] subscriptions.
//!
//! Lock ordering is hub → watcher → client: code holding the hub's watcher
//! map lock may acquire a watcher's client-registry lock, but a watcher or
//! client must never reach back up to acquire a hub lock while already
//! holding one of their own. This is why [`Watcher::broadcast`] closes dead
//! clients in place instead of asking the hub to unsubscribe them — that
//! would invert the order. The hub's own heartbeat sweep reaps those ghosts
//! instead, see [`Hub::heartbeat_tick`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use streamhub_protocol::{Event, EventType, Topic};

use crate::client::{Client, ClientError, SendOutcome, StreamSink};
use crate::fetcher::FetcherRegistry;
use crate::metrics::MetricsSink;
use crate::watcher::{Watcher, WatcherConfig};

/// Fixed heartbeat cadence: the hub sends a liveness frame to every client
/// on this tick regardless of per-topic data activity, and on the same tick
/// reaps any client a watcher's broadcast already closed but could not
/// safely unsubscribe itself (see the module docs on lock ordering).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default admission ceiling on simultaneously subscribed clients.
pub const DEFAULT_MAX_CLIENTS: usize = 1000;

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("unknown topic type: {0}")]
    UnknownTopicType(String),
    #[error("max clients reached")]
    MaxClientsReached,
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub watcher: WatcherConfig,
    pub heartbeat_interval: Duration,
    pub max_clients: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            watcher: WatcherConfig::default(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

struct WatcherEntry {
    watcher: Arc<Watcher>,
    task: JoinHandle<()>,
}

/// The process-wide fan-out registry. Construct one, `Arc` it, and share it
/// with the HTTP binding via application state.
pub struct Hub {
    watchers: RwLock<HashMap<String, WatcherEntry>>,
    fetchers: FetcherRegistry,
    metrics: Arc<dyn MetricsSink>,
    config: HubConfig,
    next_client_id: AtomicU64,
    total_clients: AtomicUsize,
    cancellation: CancellationToken,
    started: AtomicBool,
}

impl Hub {
    pub fn new(fetchers: FetcherRegistry, metrics: Arc<dyn MetricsSink>, config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            watchers: RwLock::new(HashMap::new()),
            fetchers,
            metrics,
            config,
            next_client_id: AtomicU64::new(1),
            total_clients: AtomicUsize::new(0),
            cancellation: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Start the hub's own background heartbeat loop. Idempotent: the first
    /// call wins and spawns the loop, returning its handle; every later call
    /// observes `started` already set and is a no-op, returning `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let hub = self.clone();
        Some(tokio::spawn(async move { hub.heartbeat_loop().await }))
    }

    /// Cancel the hub's own background loop, close every client, stop every
    /// watcher, and clear the topic table. Returns the watchers' poll-loop
    /// task handles so a caller that wants a fully quiesced hub can await
    /// them; dropping the handles instead just lets the tasks finish on
    /// their own.
    pub async fn shutdown(&self) -> Vec<JoinHandle<()>> {
        self.cancellation.cancel();
        let mut watchers = self.watchers.write().await;
        let mut handles = Vec::with_capacity(watchers.len());
        for (_, entry) in watchers.drain() {
            for client in entry.watcher.snapshot_clients().await {
                client.close();
            }
            entry.watcher.shutdown();
            handles.push(entry.task);
        }
        self.total_clients.store(0, Ordering::SeqCst);
        self.metrics.set_clients_connected(0);
        self.metrics.set_watchers_active(0);
        handles
    }

    /// Subscribe `sink` to `topic`, creating the topic's watcher on first
    /// subscription. Returns the client so the HTTP binding can drive its
    /// write pump and later call [`Hub::unsubscribe`].
    ///
    /// Holds the hub's write lock for the entire admission decision — the
    /// max-clients check, the topic lookup, and the watcher lookup/creation
    /// all happen atomically, so `|hub.clients| <= max_clients` holds at
    /// every observable instant, not just eventually.
    pub async fn subscribe(
        self: &Arc<Self>,
        topic: Topic,
        sink: &dyn StreamSink,
    ) -> Result<(Arc<Client>, tokio::sync::mpsc::Receiver<streamhub_protocol::Event>), SubscribeError> {
        let mut watchers = self.watchers.write().await;

        if self.total_clients.load(Ordering::SeqCst) >= self.config.max_clients {
            return Err(SubscribeError::MaxClientsReached);
        }

        let fetcher = self
            .fetchers
            .get(&topic.topic_type)
            .ok_or_else(|| SubscribeError::UnknownTopicType(topic.topic_type.clone()))?;

        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (client, receiver) = Client::new(client_id, sink)?;
        let client = Arc::new(client);

        let key = topic.canonical();
        let watcher = match watchers.get(&key) {
            Some(entry) => entry.watcher.clone(),
            None => {
                info!(topic = %topic, "starting watcher");
                let watcher = Watcher::new(topic, fetcher, self.metrics.clone(), self.config.watcher);
                let task = tokio::spawn(watcher.clone().run());
                watchers.insert(key, WatcherEntry { watcher: watcher.clone(), task });
                watcher
            }
        };
        watcher.add_client(client.clone()).await;

        let total = self.total_clients.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.set_clients_connected(total as i64);
        self.metrics.set_watchers_active(watchers.len() as i64);

        Ok((client, receiver))
    }

    /// Remove `client_id` from `topic`'s watcher. Called by the HTTP binding
    /// when a connection closes, and is a no-op if the topic or client is
    /// already gone. If this was the topic's last subscriber, its watcher is
    /// stopped and removed from the hub within this same call.
    pub async fn unsubscribe(&self, topic: &Topic, client_id: u64) {
        let mut watchers = self.watchers.write().await;
        let key = topic.canonical();
        let Some(entry) = watchers.get(&key) else {
            return;
        };
        if !entry.watcher.remove_client(client_id).await {
            return;
        }

        if entry.watcher.client_count().await == 0 {
            entry.watcher.shutdown();
            watchers.remove(&key);
        }

        let total = self.total_clients.fetch_sub(1, Ordering::SeqCst) - 1;
        self.metrics.set_clients_connected(total as i64);
        self.metrics.set_watchers_active(watchers.len() as i64);
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                () = self.cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    self.heartbeat_tick().await;
                }
            }
        }
    }

    /// One heartbeat tick: send a heartbeat frame to every client across
    /// every watcher, unsubscribing any that refuse or that a watcher's own
    /// broadcast already closed. Per the hub→watcher→client lock order,
    /// each watcher's client list is snapshotted and the hub's read lock
    /// released *before* `send()` is called on any client, and disconnects
    /// go through the same `unsubscribe()` path a normal client teardown
    /// would, which bounds the ghost-client window described in the module
    /// docs to at most one heartbeat interval.
    async fn heartbeat_tick(&self) {
        let snapshot: Vec<(Topic, Arc<Watcher>)> = {
            let watchers = self.watchers.read().await;
            watchers.values().map(|entry| (entry.watcher.topic().clone(), entry.watcher.clone())).collect()
        };

        for (topic, watcher) in snapshot {
            for client in watcher.snapshot_clients().await {
                if client.is_closed() {
                    self.unsubscribe(&topic, client.id()).await;
                    continue;
                }
                match client.send(Event::heartbeat()) {
                    SendOutcome::Accepted => {
                        self.metrics.inc_messages_sent(EventType::Heartbeat.as_wire_str());
                    }
                    SendOutcome::Refused => {
                        client.close();
                        self.unsubscribe(&topic, client.id()).await;
                    }
                }
            }
        }
    }

    pub async fn topic_count(&self) -> usize {
        self.watchers.read().await.len()
    }

    pub fn client_count(&self) -> usize {
        self.total_clients.load(Ordering::SeqCst)
    }
}
