//! Remote-node stream forwarding.
//!
//! When a caller names a `node` other than `local`, the binding does not
//! serve the subscription itself — it proxies the remote node's own SSE
//! stream back to the caller byte-for-byte, applying the node's configured
//! auth and TLS policy rather than the caller's.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use streamhub_protocol::{append_token, remote_path_for_topic, trim_trailing_slash, HttpErrorEnvelope};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const COPY_CHUNK_BYTES: usize = 4096;
const BODY_CHANNEL_CAPACITY: usize = 16;

pub use streamhub_protocol::RemoteNodeConfig;

/// A configured remote node plus the `reqwest::Client` built for it — TLS
/// policy is per-node (`skipTLSVerify`), so each node gets its own client
/// rather than sharing one across the whole process.
pub struct RemoteNode {
    pub config: RemoteNodeConfig,
    pub client: reqwest::Client,
}

impl RemoteNode {
    pub fn build(config: RemoteNodeConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, axum::Json(HttpErrorEnvelope::new(code, message))).into_response()
}

/// Forward a subscription to `node`, streaming its response body back to the
/// caller under the same four streaming headers the local path uses.
pub async fn forward(node: &RemoteNode, topic_type: &str, identifier: &str, token: Option<&str>) -> Response {
    let path = remote_path_for_topic(topic_type, identifier);
    let path = append_token(&path, token);
    let url = format!("{}{}", trim_trailing_slash(&node.config.base_url), path);

    let mut request = node.client.get(&url).header("Accept", "text/event-stream");
    if node.config.is_basic_auth {
        let username = node.config.basic_auth_username.clone().unwrap_or_default();
        let password = node.config.basic_auth_password.clone();
        request = request.basic_auth(username, password);
    } else if node.config.is_auth_token {
        if let Some(token) = &node.config.auth_token {
            request = request.bearer_auth(token);
        }
    }

    let upstream = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(node = %node.config.name, error = %err, "failed to reach remote node");
            return error_response(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", format!("failed to reach node: {err}"));
        }
    };

    let status = upstream.status();
    if status != StatusCode::OK {
        let message = upstream.text().await.unwrap_or_default();
        return error_response(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            "UPSTREAM_ERROR",
            message,
        );
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(BODY_CHANNEL_CAPACITY);
    tokio::spawn(copy_body(upstream, tx));

    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("text/event-stream"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));

    let body = Body::from_stream(ReceiverStream::new(rx));
    (StatusCode::OK, headers, body).into_response()
}

/// Copy `upstream`'s body to `tx`, flushing each chunk as it arrives rather
/// than batching. `COPY_CHUNK_BYTES` bounds the *largest* piece forwarded in
/// one send — an oversized upstream chunk is split — but a small chunk (the
/// common case for an SSE frame) is forwarded immediately so the stream stays
/// real-time instead of waiting for 4 KiB to accumulate. If the downstream
/// receiver is gone (the caller disconnected), drain the rest of the
/// upstream body without forwarding it, so the connection can still be
/// returned to `reqwest`'s pool.
async fn copy_body(mut upstream: reqwest::Response, tx: mpsc::Sender<Result<Bytes, std::io::Error>>) {
    loop {
        match upstream.chunk().await {
            Ok(Some(mut chunk)) => {
                while !chunk.is_empty() {
                    let piece = chunk.split_to(chunk.len().min(COPY_CHUNK_BYTES));
                    if tx.send(Ok(piece)).await.is_err() {
                        drain(upstream).await;
                        return;
                    }
                }
            }
            Ok(None) => return,
            Err(err) => {
                let _ = tx.send(Err(std::io::Error::other(err))).await;
                return;
            }
        }
    }
}

async fn drain(mut upstream: reqwest::Response) {
    while matches!(upstream.chunk().await, Ok(Some(_))) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn building_a_node_client_does_not_panic_on_valid_config() {
        let node = RemoteNode::build(RemoteNodeConfig {
            name: "remote1".to_owned(),
            base_url: "https://example.com".to_owned(),
            is_basic_auth: false,
            basic_auth_username: None,
            basic_auth_password: None,
            is_auth_token: true,
            auth_token: Some("secret".to_owned()),
            skip_tls_verify: true,
        });
        assert!(node.is_ok());
    }

    #[tokio::test]
    async fn forwarding_to_an_unreachable_node_returns_502() {
        let node = RemoteNode::build(RemoteNodeConfig {
            name: "remote1".to_owned(),
            // Nothing listens on port 1; the connection attempt fails fast
            // without touching the network beyond the local loopback.
            base_url: "http://127.0.0.1:1".to_owned(),
            is_basic_auth: false,
            basic_auth_username: None,
            basic_auth_password: None,
            is_auth_token: false,
            auth_token: None,
            skip_tls_verify: false,
        })
        .expect("client builds");

        let response = forward(&node, "dag-run", "mydag/run123", None).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
