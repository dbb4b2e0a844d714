//! The pluggable data-source side of a watcher.
//!
//! A [`Fetcher`] knows how to pull the current snapshot for one topic type;
//! the watcher doesn't know or care whether that snapshot comes from a
//! database, an in-memory map, or an upstream HTTP call. Fetchers are looked
//! up by topic type string in a [`FetcherRegistry`] built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use streamhub_protocol::Topic;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no data available for topic {0}")]
    NotFound(String),
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
}

/// Produces the current JSON snapshot for a topic. Implementations must be
/// safe to call repeatedly and concurrently; a watcher calls `fetch` on its
/// own schedule from a single task, but a registry may hand the same
/// `Arc<dyn Fetcher>` to multiple watchers for different identifiers of the
/// same topic type.
///
/// `cancellation` is the owning watcher's stop/shutdown signal. A
/// well-behaved fetcher that makes its own blocking calls (a network
/// request, a slow query) should race them against `cancellation` and
/// return promptly when it fires rather than run them to completion; the
/// watcher itself races the whole `fetch` call against the same token, so
/// an implementation that ignores it merely loses the ability to preempt
/// its own internal wait.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, topic: &Topic, cancellation: &CancellationToken) -> Result<Value, FetchError>;
}

/// Maps a topic type string (e.g. `"dag-run"`) to the fetcher responsible
/// for it.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic_type: impl Into<String>, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(topic_type.into(), fetcher);
    }

    pub fn get(&self, topic_type: &str) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(topic_type).cloned()
    }
}
