//! The fan-out HTTP binding and remote proxy built on `streamhub-core`.

pub mod auth;
pub mod config;
pub mod http;
pub mod proxy;

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::Registry;
use tracing::info;

use streamhub_core::{demo_registry, Hub, HubConfig, PrometheusMetrics};

use crate::auth::{StaticTokenValidator, TokenValidator};
use crate::config::StreamhubConfig;
use crate::http::AppStateInner;
use crate::proxy::RemoteNode;

/// Build the application state from a resolved [`StreamhubConfig`], wiring
/// the demo fetcher registry in as a stand-in for a real data source — an
/// external collaborator the HTTP binding doesn't need to know about.
pub fn build_app_state(config: &StreamhubConfig) -> Result<Arc<AppStateInner>, String> {
    let registry = Registry::new();
    let metrics = PrometheusMetrics::new(&registry).into_sink();

    let hub_config = HubConfig {
        max_clients: config.max_clients,
        heartbeat_interval: config.heartbeat_interval,
        ..HubConfig::default()
    };
    let hub = Hub::new(demo_registry(), metrics, hub_config);
    hub.start();

    let mut remote_nodes = HashMap::new();
    for node_config in &config.remote_nodes {
        let name = node_config.name.clone();
        let node = RemoteNode::build(node_config.clone()).map_err(|err| {
            format!("building client for remote node '{name}': {err}")
        })?;
        remote_nodes.insert(name, node);
    }

    let token_validator: Option<Arc<dyn TokenValidator>> = if config.tokens.is_empty() {
        None
    } else {
        Some(Arc::new(StaticTokenValidator::new(config.tokens.clone())))
    };

    info!(
        bind = %config.bind,
        max_clients = config.max_clients,
        remote_nodes = remote_nodes.len(),
        auth_enabled = token_validator.is_some(),
        "streamhub state built"
    );

    Ok(Arc::new(AppStateInner {
        hub,
        remote_nodes,
        token_validator,
        metrics_registry: registry,
    }))
}
