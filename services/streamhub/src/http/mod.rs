//! The HTTP binding: one axum handler per topic-type route family, sharing a
//! common core that assembles the topic string, resolves local-vs-proxy
//! dispatch, checks the configured [`TokenValidator`], and on the local path
//! drives the hub/client/watcher trio.
//!
//! A streaming response is built from an `axum::body::Body` fed by an `mpsc`
//! channel rather than `axum::response::sse::Sse`: the exact four-header/
//! no-`id:`/no-`retry:` wire contract and explicit per-event flush aren't
//! expressible through `Sse`'s keep-alive machinery, but the channel still
//! rides the same hyper/axum substrate as the rest of the stack.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use prometheus::Registry;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use streamhub_core::{ClientError, Hub, StreamSink, SubscribeError};
use streamhub_protocol::{topic_types, Event, HttpErrorEnvelope, Topic};

use crate::auth::{extract_bearer, TokenValidator};
use crate::proxy::{self, RemoteNode};

const EVENT_CHANNEL_CAPACITY: usize = 16;
const CONTROL_PARAMS: [&str; 2] = ["node", "token"];

pub struct AppStateInner {
    pub hub: Arc<Hub>,
    pub remote_nodes: HashMap<String, RemoteNode>,
    pub token_validator: Option<Arc<dyn TokenValidator>>,
    pub metrics_registry: Registry,
}

pub type AppState = Arc<AppStateInner>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events/dag-runs/{name}/{run_id}", get(dag_run))
        .route("/events/dags/{file_name}", get(dag))
        .route("/events/dag-runs/{name}/{run_id}/logs", get(dag_run_logs))
        .route(
            "/events/dag-runs/{name}/{run_id}/logs/steps/{step}",
            get(step_log),
        )
        .route("/events/dag-runs", get(list_of_dag_runs))
        .route("/events/queues/{queue_name}/items", get(queue_items))
        .route("/events/queues", get(list_of_queues))
        .route("/events/dags", get(list_of_dags))
        .route("/events/{topic_type}/{identifier}", get(unrecognized))
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Route handlers: each assembles a topic-type-specific identifier and hands
// off to the shared `handle` core.
// ---------------------------------------------------------------------------

async fn dag_run(
    State(state): State<AppState>,
    Path((name, run_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle(state, topic_types::DAG_RUN, format!("{name}/{run_id}"), params, headers).await
}

async fn dag(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle(state, topic_types::DAG, file_name, params, headers).await
}

async fn dag_run_logs(
    State(state): State<AppState>,
    Path((name, run_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut identifier = format!("{name}/{run_id}");
    if let Some(query) = forwarded_query(&params) {
        identifier.push('?');
        identifier.push_str(&query);
    }
    handle(state, topic_types::DAG_RUN_LOGS, identifier, params, headers).await
}

async fn step_log(
    State(state): State<AppState>,
    Path((name, run_id, step)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle(state, topic_types::STEP_LOG, format!("{name}/{run_id}/{step}"), params, headers).await
}

async fn list_of_dag_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let identifier = forwarded_query(&params).unwrap_or_default();
    handle(state, topic_types::LIST_OF_DAG_RUNS, identifier, params, headers).await
}

async fn queue_items(
    State(state): State<AppState>,
    Path(queue_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle(state, topic_types::QUEUE_ITEMS, queue_name, params, headers).await
}

async fn list_of_queues(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let identifier = forwarded_query(&params).unwrap_or_default();
    handle(state, topic_types::LIST_OF_QUEUES, identifier, params, headers).await
}

async fn list_of_dags(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let identifier = forwarded_query(&params).unwrap_or_default();
    handle(state, topic_types::LIST_OF_DAGS, identifier, params, headers).await
}

/// Any topic type with no dedicated route falls through here.
async fn unrecognized(
    State(state): State<AppState>,
    Path((topic_type, identifier)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle(state, &topic_type, identifier, params, headers).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    let families = state.metrics_registry.gather();
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "METRICS_ENCODE_FAILED",
            err.to_string(),
        );
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_owned())], buffer).into_response()
}

// ---------------------------------------------------------------------------
// Shared core
// ---------------------------------------------------------------------------

struct RequestContext {
    node: Option<String>,
    token: Option<String>,
}

fn request_context(params: &HashMap<String, String>, headers: &HeaderMap) -> RequestContext {
    let node = params.get("node").cloned();
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)
        .map(str::to_owned)
        .or_else(|| params.get("token").cloned());
    RequestContext { node, token }
}

/// The query string forwarded to a fetcher/remote node excludes the
/// gateway's own control parameters (`node`, `token`). Keys are sorted so the
/// resulting identifier text is deterministic regardless of the caller's
/// parameter ordering.
fn forwarded_query(params: &HashMap<String, String>) -> Option<String> {
    let mut pairs: Vec<(&String, &String)> =
        params.iter().filter(|(key, _)| !CONTROL_PARAMS.contains(&key.as_str())).collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Some(pairs.into_iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join("&"))
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(HttpErrorEnvelope::new(code, message))).into_response()
}

async fn handle(
    state: AppState,
    topic_type: &str,
    identifier: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&params, &headers);

    if let Some(validator) = &state.token_validator {
        let authorized = ctx.token.as_deref().is_some_and(|token| validator.validate(token).is_some());
        if !authorized {
            return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing or invalid token");
        }
    }

    match ctx.node.as_deref() {
        Some(name) if name != "local" => match state.remote_nodes.get(name) {
            Some(node) => proxy::forward(node, topic_type, &identifier, ctx.token.as_deref()).await,
            None => error_response(StatusCode::BAD_REQUEST, "UNKNOWN_NODE", format!("unknown remote node: {name}")),
        },
        _ => serve_local(&state, Topic { topic_type: topic_type.to_owned(), identifier }).await,
    }
}

/// A connection handle that writes each frame into an `mpsc` channel feeding
/// the response body, so the same `Client`/`write_pump` machinery the core
/// crate uses for any sink drives an HTTP streaming response here.
#[derive(Clone)]
struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
}

#[async_trait::async_trait]
impl StreamSink for ChannelSink {
    async fn write_frame(&mut self, frame: &str) -> std::io::Result<()> {
        self.tx.send(Ok(Bytes::copy_from_slice(frame.as_bytes()))).await.map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "downstream receiver dropped")
        })
    }
}

async fn serve_local(state: &AppState, topic: Topic) -> Response {
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(EVENT_CHANNEL_CAPACITY);
    let sink = ChannelSink { tx: body_tx };

    let (client, event_rx) = match state.hub.subscribe(topic.clone(), &sink).await {
        Ok(pair) => pair,
        Err(SubscribeError::UnknownTopicType(topic_type)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "UNKNOWN_TOPIC_TYPE",
                format!("unknown topic type: {topic_type}"),
            );
        }
        Err(SubscribeError::MaxClientsReached) => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "MAX_CLIENTS_REACHED", "max clients reached");
        }
        Err(SubscribeError::Client(ClientError::StreamingNotSupported)) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STREAMING_NOT_SUPPORTED",
                "streaming not supported",
            );
        }
    };

    let connected = Event::connected(serde_json::json!({ "topic": topic.canonical() }).to_string());
    let _ = client.send(connected);

    let hub = state.hub.clone();
    tokio::spawn(async move {
        client.write_pump(event_rx, Box::new(sink), CancellationToken::new()).await;
        hub.unsubscribe(&topic, client.id()).await;
    });

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

    let body = Body::from_stream(ReceiverStream::new(body_rx));
    (StatusCode::OK, headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_query_drops_control_params_and_sorts_the_rest() {
        let mut params = HashMap::new();
        params.insert("node".to_owned(), "remote1".to_owned());
        params.insert("token".to_owned(), "secret".to_owned());
        params.insert("tail".to_owned(), "100".to_owned());
        params.insert("level".to_owned(), "warn".to_owned());

        let query = forwarded_query(&params).expect("non-control params remain");
        assert_eq!(query, "level=warn&tail=100");
    }

    #[test]
    fn forwarded_query_is_none_when_only_control_params_are_present() {
        let mut params = HashMap::new();
        params.insert("node".to_owned(), "remote1".to_owned());
        assert!(forwarded_query(&params).is_none());
    }

    #[test]
    fn request_context_prefers_the_authorization_header_over_the_token_param() {
        let mut params = HashMap::new();
        params.insert("token".to_owned(), "from-query".to_owned());
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let ctx = request_context(&params, &headers);
        assert_eq!(ctx.token.as_deref(), Some("from-header"));
    }

    #[test]
    fn request_context_falls_back_to_the_token_query_param() {
        let mut params = HashMap::new();
        params.insert("token".to_owned(), "from-query".to_owned());
        let headers = HeaderMap::new();

        let ctx = request_context(&params, &headers);
        assert_eq!(ctx.token.as_deref(), Some("from-query"));
    }

    #[test]
    fn request_context_reads_the_requested_node() {
        let mut params = HashMap::new();
        params.insert("node".to_owned(), "remote1".to_owned());
        let ctx = request_context(&params, &HeaderMap::new());
        assert_eq!(ctx.node.as_deref(), Some("remote1"));
    }
}
