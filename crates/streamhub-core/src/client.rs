//! A single subscriber's outbound queue and write pump.
//!
//! A `Client` owns a bounded channel of [`Event`]s and hands the receiving
//! half to a `write_pump` task that owns the actual connection handle. `send`
//! never blocks: a full queue means a slow or stuck reader, and the
//! back-pressure policy is to close that client rather than stall the
//! watcher that is broadcasting to everyone else.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use streamhub_protocol::Event;

/// Per-client outbound queue depth. Past this, a client is considered
/// non-draining and is disconnected rather than allowed to stall the hub.
pub const CLIENT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("streaming not supported: connection handle cannot flush")]
    StreamingNotSupported,
}

/// Outcome of offering an event to a client's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    Refused,
}

/// A connection handle capable of writing a wire-formatted frame and forcing
/// it out over the network. Implementations that cannot guarantee a flush
/// (e.g. a buffered writer with no forced-flush primitive) must report
/// `supports_flush() == false` so `Client::new` can refuse to construct
/// rather than silently degrade to best-effort delivery.
#[async_trait::async_trait]
pub trait StreamSink: Send {
    /// Whether this sink can force a flush after every frame. Checked once,
    /// eagerly, at construction time.
    fn supports_flush(&self) -> bool {
        true
    }

    /// Write one already-framed event and flush it to the peer.
    async fn write_frame(&mut self, frame: &str) -> std::io::Result<()>;
}

struct ClientInner {
    closed: bool,
    sender: mpsc::Sender<Event>,
}

/// A subscriber to one topic's broadcast. Cheap to clone via `Arc`; the hub
/// and watcher both hold references to the same instance, never a copy.
pub struct Client {
    id: u64,
    inner: Mutex<ClientInner>,
    // `watch` (not `Notify`) so a `close()` that happens before the write
    // pump ever awaits is still observed: the pump reads the current value
    // rather than relying on having been woken by it.
    closed_tx: watch::Sender<bool>,
}

impl Client {
    /// Build a new client and the receiver half its write pump should drain.
    ///
    /// Fails eagerly if `sink` cannot guarantee a flush, per
    /// [`ClientError::StreamingNotSupported`] — there is no point queuing
    /// events for a connection that can never reliably push them out.
    pub fn new(id: u64, sink: &dyn StreamSink) -> Result<(Self, mpsc::Receiver<Event>), ClientError> {
        if !sink.supports_flush() {
            return Err(ClientError::StreamingNotSupported);
        }
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let (closed_tx, _closed_rx) = watch::channel(false);
        let client = Self {
            id,
            inner: Mutex::new(ClientInner { closed: false, sender }),
            closed_tx,
        };
        Ok((client, receiver))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Offer `event` to this client's queue. Never blocks: a full queue or a
    /// closed client both resolve to `Refused` immediately.
    pub fn send(&self, event: Event) -> SendOutcome {
        let inner = self.inner.lock().expect("client mutex poisoned");
        if inner.closed {
            return SendOutcome::Refused;
        }
        match inner.sender.try_send(event) {
            Ok(()) => SendOutcome::Accepted,
            Err(_) => SendOutcome::Refused,
        }
    }

    /// Mark this client closed and wake its write pump. Idempotent: closing
    /// an already-closed client is a no-op.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("client mutex poisoned");
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        // Ignore the error: no receivers left just means the pump already exited.
        let _ = self.closed_tx.send(true);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("client mutex poisoned").closed
    }

    /// Drive `sink` from `receiver` until cancellation, closure, or a write
    /// error. Owns `sink` exclusively for its lifetime — no lock is held
    /// while writing, so a slow peer blocks only this pump, never `send`.
    pub async fn write_pump(
        &self,
        mut receiver: mpsc::Receiver<Event>,
        mut sink: Box<dyn StreamSink>,
        cancellation: CancellationToken,
    ) {
        let mut closed_rx = self.closed_tx.subscribe();
        loop {
            if *closed_rx.borrow() {
                debug!(client_id = self.id, "write pump observed close");
                break;
            }
            tokio::select! {
                biased;

                () = cancellation.cancelled() => {
                    debug!(client_id = self.id, "write pump cancelled");
                    break;
                }
                changed = closed_rx.changed() => {
                    if changed.is_err() || *closed_rx.borrow() {
                        debug!(client_id = self.id, "write pump observed close");
                        break;
                    }
                }
                event = receiver.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(err) = sink.write_frame(&event.to_wire()).await {
                                warn!(client_id = self.id, error = %err, "write failed, closing client");
                                self.close();
                                break;
                            }
                        }
                        None => {
                            debug!(client_id = self.id, "sender dropped, closing client");
                            self.close();
                            break;
                        }
                    }
                }
            }
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RefusingSink;

    #[async_trait::async_trait]
    impl StreamSink for RefusingSink {
        fn supports_flush(&self) -> bool {
            false
        }

        async fn write_frame(&mut self, _frame: &str) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct RecordingSink {
        written: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl StreamSink for RecordingSink {
        async fn write_frame(&mut self, _frame: &str) -> std::io::Result<()> {
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn construction_rejects_a_sink_that_cannot_flush() {
        let sink = RefusingSink;
        let result = Client::new(1, &sink);
        assert!(matches!(result, Err(ClientError::StreamingNotSupported)));
    }

    #[test]
    fn close_is_idempotent() {
        let sink = RecordingSink { written: Arc::new(AtomicUsize::new(0)) };
        let (client, _receiver) = Client::new(1, &sink).expect("flush supported");
        client.close();
        client.close();
        assert!(client.is_closed());
    }

    #[test]
    fn offering_past_capacity_is_refused() {
        let sink = RecordingSink { written: Arc::new(AtomicUsize::new(0)) };
        let (client, _receiver) = Client::new(1, &sink).expect("flush supported");
        for _ in 0..CLIENT_QUEUE_CAPACITY {
            let outcome = client.send(Event::heartbeat());
            assert_eq!(outcome, SendOutcome::Accepted);
        }
        let outcome = client.send(Event::heartbeat());
        assert_eq!(outcome, SendOutcome::Refused);
    }

    #[test]
    fn send_after_close_is_refused() {
        let sink = RecordingSink { written: Arc::new(AtomicUsize::new(0)) };
        let (client, _receiver) = Client::new(1, &sink).expect("flush supported");
        client.close();
        let outcome = client.send(Event::heartbeat());
        assert_eq!(outcome, SendOutcome::Refused);
    }

    #[tokio::test]
    async fn write_pump_closes_client_when_sender_is_dropped() {
        let written = Arc::new(AtomicUsize::new(0));
        let sink = RecordingSink { written: written.clone() };
        let (client, receiver) = Client::new(1, &sink).expect("flush supported");
        let client = Arc::new(client);
        let cancellation = CancellationToken::new();

        let outcome = client.send(Event::data("hello"));
        assert_eq!(outcome, SendOutcome::Accepted);

        let pump_client = client.clone();
        let pump_cancellation = cancellation.clone();
        let handle = tokio::spawn(async move {
            pump_client
                .write_pump(receiver, Box::new(sink), pump_cancellation)
                .await;
        });

        client.close();
        handle.await.expect("pump task joins");

        assert!(client.is_closed());
        assert_eq!(written.load(Ordering::SeqCst), 1);
    }
}
