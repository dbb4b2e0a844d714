//! Deterministic in-memory fetchers for each topic type.
//!
//! The core treats the identity of a topic's real data source as an
//! external collaborator; these fetchers exist so the hub, the HTTP
//! binding, and the proxy path can all be exercised end-to-end — in
//! integration tests and in the demo binary — without a real scheduler
//! backend wired in.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use streamhub_protocol::{topic_types, Topic};

use crate::fetcher::{FetchError, Fetcher, FetcherRegistry};

/// A fetcher whose snapshot per identifier can be mutated at runtime,
/// standing in for whatever real store a production deployment would poll.
pub struct InMemoryFetcher {
    values: RwLock<HashMap<String, Value>>,
    default_value: Value,
}

impl InMemoryFetcher {
    pub fn new(default_value: Value) -> Self {
        Self { values: RwLock::new(HashMap::new()), default_value }
    }

    /// Replace the snapshot for `identifier`, as if new data had arrived
    /// from the real upstream. The next watcher poll will observe it.
    pub async fn set(&self, identifier: impl Into<String>, value: Value) {
        self.values.write().await.insert(identifier.into(), value);
    }
}

#[async_trait::async_trait]
impl Fetcher for InMemoryFetcher {
    async fn fetch(&self, topic: &Topic, _cancellation: &CancellationToken) -> Result<Value, FetchError> {
        let values = self.values.read().await;
        Ok(values.get(&topic.identifier).cloned().unwrap_or_else(|| self.default_value.clone()))
    }
}

/// Build a [`FetcherRegistry`] with one [`InMemoryFetcher`] per known topic
/// type, seeded with a small representative default value for each.
#[must_use]
pub fn demo_registry() -> FetcherRegistry {
    let mut registry = FetcherRegistry::new();

    registry.register(
        topic_types::DAG_RUN,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "status": "running",
            "steps_completed": 0,
        }))),
    );
    registry.register(
        topic_types::DAG,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "name": "example-dag",
            "schedule": "@daily",
        }))),
    );
    registry.register(
        topic_types::DAG_RUN_LOGS,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "lines": [],
        }))),
    );
    registry.register(
        topic_types::STEP_LOG,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "lines": [],
        }))),
    );
    registry.register(
        topic_types::LIST_OF_DAG_RUNS,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "runs": [],
        }))),
    );
    registry.register(
        topic_types::QUEUE_ITEMS,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "items": [],
        }))),
    );
    registry.register(
        topic_types::LIST_OF_QUEUES,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "queues": [],
        }))),
    );
    registry.register(
        topic_types::LIST_OF_DAGS,
        Arc::new(InMemoryFetcher::new(serde_json::json!({
            "dags": [],
        }))),
    );

    registry
}
