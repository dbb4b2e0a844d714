//! Fan-out core: the in-process hub/watcher/client machinery that turns
//! periodic fetches into a live per-topic event stream.
//!
//! This crate has no opinion on transport; [`client::StreamSink`] is the
//! seam a binary implements to hand the core a real connection (HTTP
//! streaming body, a test double, whatever).

pub mod backoff;
pub mod client;
pub mod fetcher;
pub mod fetchers;
pub mod hub;
pub mod interval;
pub mod metrics;
pub mod watcher;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{Client, ClientError, SendOutcome, StreamSink};
pub use fetcher::{FetchError, Fetcher, FetcherRegistry};
pub use fetchers::{demo_registry, InMemoryFetcher};
pub use hub::{Hub, HubConfig, SubscribeError, DEFAULT_MAX_CLIENTS, HEARTBEAT_INTERVAL};
pub use interval::{AdaptiveInterval, IntervalConfig};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use watcher::{Watcher, WatcherConfig};

pub use streamhub_protocol::{Event, EventType, Topic, TopicParseError};
