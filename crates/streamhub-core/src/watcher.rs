//! One watcher per topic: polls its fetcher on an adaptive interval, detects
//! changes by content hash, and broadcasts to every subscribed client.
//!
//! Heartbeats are not a watcher concern — they originate from the hub on a
//! single fixed cadence shared by every topic, per its own heartbeat task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use streamhub_protocol::{Event, Topic};

use crate::backoff::{Backoff, BackoffConfig};
use crate::client::{Client, SendOutcome};
use crate::fetcher::Fetcher;
use crate::interval::{AdaptiveInterval, IntervalConfig};
use crate::metrics::MetricsSink;

/// Truncated-SHA-256 content fingerprint used for change detection: first 8
/// bytes (16 hex chars) of the digest over the topic's canonical JSON
/// serialization.
fn content_hash(serialized: &str) -> String {
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(&digest[..8])
}

/// Tunables for a watcher's polling behavior. Tests substitute tighter
/// values to keep polling loops fast without changing the algorithm itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatcherConfig {
    pub interval: IntervalConfig,
    pub backoff: BackoffConfig,
}

/// Owns the poll loop and client registry for exactly one topic. Held by the
/// hub behind an `Arc`; never constructed or dropped except through
/// `Hub::subscribe`/`Hub::unsubscribe`.
pub struct Watcher {
    topic: Topic,
    fetcher: Arc<dyn Fetcher>,
    metrics: Arc<dyn MetricsSink>,
    clients: RwLock<HashMap<u64, Arc<Client>>>,
    state: Mutex<WatcherState>,
    cancellation: CancellationToken,
}

struct WatcherState {
    last_hash: Option<String>,
    interval: AdaptiveInterval,
    backoff: Backoff,
    /// Set on a fetch error, cleared on the next successful fetch. Used to
    /// detect the error→success transition so `interval` resets to the base
    /// interval exactly once per backoff episode.
    in_backoff: bool,
}

impl Watcher {
    pub fn new(
        topic: Topic,
        fetcher: Arc<dyn Fetcher>,
        metrics: Arc<dyn MetricsSink>,
        config: WatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            topic,
            fetcher,
            metrics,
            clients: RwLock::new(HashMap::new()),
            state: Mutex::new(WatcherState {
                last_hash: None,
                interval: AdaptiveInterval::new(config.interval),
                backoff: Backoff::with_config(config.backoff),
                in_backoff: false,
            }),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub async fn add_client(&self, client: Arc<Client>) {
        let mut clients = self.clients.write().await;
        clients.insert(client.id(), client);
    }

    /// Remove a client from this watcher's registry. Returns whether it was
    /// actually present, so the hub can tell a real unsubscribe from a no-op.
    pub async fn remove_client(&self, client_id: u64) -> bool {
        let mut clients = self.clients.write().await;
        clients.remove(&client_id).is_some()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Snapshot the current clients. Used by the hub's heartbeat sweep,
    /// which takes this lock and releases it before calling `send()` on any
    /// client, per the hub→watcher→client lock ordering.
    pub async fn snapshot_clients(&self) -> Vec<Arc<Client>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Stop the poll loop. Does not close clients — the hub owns that
    /// decision so it can run below the watcher in lock order. Idempotent:
    /// cancelling an already-cancelled token is a no-op.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }

    /// Drive fetch → detect → broadcast forever, until cancelled. Spawned by
    /// the hub as its own task per watcher.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.cancellation.is_cancelled() {
                break;
            }

            let fetch_started = Instant::now();
            // Race the fetcher call against cancellation rather than simply
            // awaiting it: a fetcher that ignores its own cancellation token
            // and hangs would otherwise block shutdown past one poll tick.
            let fetch_result = tokio::select! {
                biased;

                () = self.cancellation.cancelled() => break,
                result = self.fetcher.fetch(&self.topic, &self.cancellation) => result,
            };
            let fetch_duration = fetch_started.elapsed();
            self.metrics.observe_fetch_duration(&self.topic.topic_type, fetch_duration.as_secs_f64());

            let (sleep_for, changed_value, error_message) = {
                let mut state = self.state.lock().await;
                match fetch_result {
                    Ok(value) => {
                        state.backoff.reset();
                        let recovering = state.in_backoff;
                        state.in_backoff = false;
                        if recovering {
                            state.interval.reset();
                        }
                        let sleep_for = state.interval.observe(fetch_duration);
                        match serde_json::to_string(&value) {
                            Ok(serialized) => {
                                let hash = content_hash(&serialized);
                                let changed = state.last_hash.as_deref() != Some(hash.as_str());
                                if changed {
                                    state.last_hash = Some(hash);
                                }
                                (sleep_for, changed.then_some(serialized), None)
                            }
                            Err(err) => (sleep_for, None, Some(format!("serialization failed: {err}"))),
                        }
                    }
                    Err(err) => {
                        state.in_backoff = true;
                        self.metrics.inc_fetch_errors(&self.topic.topic_type);
                        warn!(topic = %self.topic, error = %err, "fetch failed");
                        (state.backoff.next(), None, Some(err.to_string()))
                    }
                }
            };
            if let Some(serialized) = changed_value {
                self.broadcast(Event::data(serialized)).await;
            }
            if let Some(message) = error_message {
                self.broadcast(Event::error(message)).await;
            }

            tokio::select! {
                () = self.cancellation.cancelled() => break,
                () = sleep(sleep_for) => {}
            }
        }
        debug!(topic = %self.topic, "watcher loop exiting");
    }

    /// Offer `event` to every subscribed client. Clients that refuse (full
    /// queue or already closed) are closed here but *not* removed from the
    /// registry — removing would mean re-acquiring the clients lock while
    /// still holding it, and the hub→watcher→client lock order forbids a
    /// watcher from reaching back up into the hub to trigger the
    /// bookkeeping that follows a disconnect. The hub's own heartbeat sweep
    /// reaps closed clients it finds here, bounding how long a ghost
    /// entry can linger.
    async fn broadcast(&self, event: Event) {
        let clients = self.clients.read().await;
        if clients.is_empty() {
            return;
        }
        for client in clients.values() {
            match client.send(event.clone()) {
                SendOutcome::Accepted => {
                    self.metrics.inc_messages_sent(event.event_type.as_wire_str());
                }
                SendOutcome::Refused => {
                    client.close();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StreamSink;
    use crate::fetcher::FetchError;
    use crate::metrics::NoopMetrics;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl StreamSink for CountingSink {
        async fn write_frame(&mut self, _frame: &str) -> std::io::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SequenceFetcher {
        values: Mutex<std::vec::IntoIter<Result<serde_json::Value, String>>>,
    }

    impl SequenceFetcher {
        fn new(values: Vec<Result<serde_json::Value, String>>) -> Self {
            Self { values: Mutex::new(values.into_iter()) }
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for SequenceFetcher {
        async fn fetch(&self, _topic: &Topic, _cancellation: &CancellationToken) -> Result<serde_json::Value, FetchError> {
            let mut values = self.values.lock().await;
            match values.next() {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(FetchError::Upstream(message)),
                None => Err(FetchError::NotFound("exhausted".into())),
            }
        }
    }

    fn spawn_client() -> (Arc<Client>, Arc<AtomicUsize>, mpsc::Receiver<Event>) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink { count: count.clone() };
        let (client, receiver) = Client::new(1, &sink).expect("flush supported");
        (Arc::new(client), count, receiver)
    }

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            interval: IntervalConfig {
                base_interval: Duration::from_millis(5),
                max_interval: Duration::from_millis(20),
                ..IntervalConfig::default()
            },
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                ..BackoffConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn unchanged_fetches_do_not_rebroadcast() {
        let topic = Topic::parse("dag-run:x").unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(SequenceFetcher::new(vec![
            Ok(serde_json::json!({"a": 1})),
            Ok(serde_json::json!({"a": 1})),
        ]));
        let watcher = Watcher::new(topic, fetcher, Arc::new(NoopMetrics), fast_config());

        let (client, _count, mut receiver) = spawn_client();
        watcher.add_client(client.clone()).await;

        let handle = tokio::spawn(watcher.clone().run());
        tokio::time::sleep(Duration::from_millis(60)).await;
        watcher.shutdown();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;

        let received = receiver.try_recv();
        assert!(received.is_ok());
        assert!(receiver.try_recv().is_err(), "second identical poll must not rebroadcast");
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribed_clients() {
        let topic = Topic::parse("dag-run:x").unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(SequenceFetcher::new(vec![Ok(serde_json::json!({"a": 1}))]));
        let watcher = Watcher::new(topic, fetcher, Arc::new(NoopMetrics), fast_config());

        let (client_a, _count_a, mut receiver_a) = spawn_client();
        let (client_b, _count_b, mut receiver_b) = spawn_client();
        watcher.add_client(client_a).await;
        watcher.add_client(client_b).await;

        watcher.broadcast(Event::heartbeat()).await;

        assert!(receiver_a.try_recv().is_ok());
        assert!(receiver_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn refused_send_closes_the_client_without_removing_it() {
        let topic = Topic::parse("dag-run:x").unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(SequenceFetcher::new(vec![Ok(serde_json::json!({"a": 1}))]));
        let watcher = Watcher::new(topic, fetcher, Arc::new(NoopMetrics), fast_config());

        let (client, _count, _receiver) = spawn_client();
        watcher.add_client(client.clone()).await;
        client.close();

        watcher.broadcast(Event::heartbeat()).await;
        assert!(client.is_closed());
        assert_eq!(watcher.client_count().await, 1);
    }

    #[tokio::test]
    async fn snapshot_clients_reflects_current_subscribers() {
        let topic = Topic::parse("dag-run:x").unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(SequenceFetcher::new(vec![Ok(serde_json::json!({"a": 1}))]));
        let watcher = Watcher::new(topic, fetcher, Arc::new(NoopMetrics), fast_config());

        let (client, _count, _receiver) = spawn_client();
        watcher.add_client(client.clone()).await;

        let snapshot = watcher.snapshot_clients().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), client.id());
    }

    #[tokio::test]
    async fn fetch_errors_broadcast_an_error_event_then_recover_to_data() {
        let topic = Topic::parse("dag-run:x").unwrap();
        let fetcher: Arc<dyn Fetcher> = Arc::new(SequenceFetcher::new(vec![
            Err("boom 1".to_owned()),
            Err("boom 2".to_owned()),
            Ok(serde_json::json!({"recovered": true})),
        ]));
        let watcher = Watcher::new(topic, fetcher, Arc::new(NoopMetrics), fast_config());

        let (client, _count, mut receiver) = spawn_client();
        watcher.add_client(client.clone()).await;

        let handle = tokio::spawn(watcher.clone().run());

        let first = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("first event arrives")
            .expect("channel open");
        assert_eq!(first.event_type, streamhub_protocol::EventType::Error);
        assert!(first.data.contains("boom 1"));

        let second = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("second event arrives")
            .expect("channel open");
        assert_eq!(second.event_type, streamhub_protocol::EventType::Error);
        assert!(second.data.contains("boom 2"));

        let third = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("third event arrives")
            .expect("channel open");
        assert_eq!(third.event_type, streamhub_protocol::EventType::Data);
        assert_eq!(third.data, serde_json::json!({"recovered": true}).to_string());

        watcher.shutdown();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }
}
