// streamhub-protocol: wire types shared between the fan-out core and the
// HTTP binding/proxy: the event frame, topic string parsing, the remote-node
// path mapping table, and the frozen HTTP error envelope.

use std::fmt;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event frame
// ---------------------------------------------------------------------------

/// The four wire event types. Serializes to the lowercase wire token used in
/// the `event:` line, not to the Rust variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Data,
    Heartbeat,
    Connected,
    Error,
}

impl EventType {
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            EventType::Data => "data",
            EventType::Heartbeat => "heartbeat",
            EventType::Connected => "connected",
            EventType::Error => "error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// An immutable `{type, data}` record delivered to one client.
///
/// `data` is an opaque UTF-8 string; callers are responsible for making it
/// JSON when `event_type` is `Data`/`Connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub data: String,
}

impl Event {
    #[must_use]
    pub fn new(event_type: EventType, data: impl Into<String>) -> Self {
        Self {
            event_type,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        Self::new(EventType::Data, data)
    }

    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(EventType::Heartbeat, "")
    }

    #[must_use]
    pub fn connected(data: impl Into<String>) -> Self {
        Self::new(EventType::Connected, data)
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventType::Error, message)
    }

    /// Render the wire frame: `event: <type>\ndata: <data>\n\n`.
    /// No `id:`/`retry:` fields are ever emitted.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_type, self.data)
    }
}

// ---------------------------------------------------------------------------
// Topic string
// ---------------------------------------------------------------------------

/// A parsed `"<topicType>:<identifier>"` topic string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub topic_type: String,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicParseError(pub String);

impl fmt::Display for TopicParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid topic format: {}", self.0)
    }
}

impl std::error::Error for TopicParseError {}

impl Topic {
    /// Split on the first `:` only. An absent delimiter is an error; an
    /// empty identifier is allowed.
    pub fn parse(raw: &str) -> Result<Self, TopicParseError> {
        match raw.split_once(':') {
            Some((topic_type, identifier)) if !topic_type.is_empty() => Ok(Self {
                topic_type: topic_type.to_owned(),
                identifier: identifier.to_owned(),
            }),
            _ => Err(TopicParseError(raw.to_owned())),
        }
    }

    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.topic_type, self.identifier)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

// ---------------------------------------------------------------------------
// Remote node config & path mapping
// ---------------------------------------------------------------------------

/// One entry of the operator-configured remote-node table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNodeConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub is_basic_auth: bool,
    #[serde(default)]
    pub basic_auth_username: Option<String>,
    #[serde(default)]
    pub basic_auth_password: Option<String>,
    #[serde(default)]
    pub is_auth_token: bool,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

/// Well-known topic-type identifiers with a dedicated remote path mapping.
/// Any other topic type falls through to the `unrecognized` row.
pub mod topic_types {
    pub const DAG_RUN: &str = "dag-run";
    pub const DAG: &str = "dag";
    pub const DAG_RUN_LOGS: &str = "dag-run-logs";
    pub const STEP_LOG: &str = "step-log";
    pub const LIST_OF_DAG_RUNS: &str = "list-of-dag-runs";
    pub const QUEUE_ITEMS: &str = "queue-items";
    pub const LIST_OF_QUEUES: &str = "list-of-queues";
    pub const LIST_OF_DAGS: &str = "list-of-dags";
}

/// Build the remote-node request path (including any query string) for a
/// topic, per the node's mapping table. Identifier shapes are `/`-separated.
#[must_use]
pub fn remote_path_for_topic(topic_type: &str, identifier: &str) -> String {
    use topic_types::{
        DAG, DAG_RUN, DAG_RUN_LOGS, LIST_OF_DAGS, LIST_OF_DAG_RUNS, LIST_OF_QUEUES, QUEUE_ITEMS,
        STEP_LOG,
    };

    match topic_type {
        DAG_RUN => {
            let (name, run_id) = split2(identifier);
            format!("/events/dag-runs/{name}/{run_id}")
        }
        DAG => format!("/events/dags/{identifier}"),
        DAG_RUN_LOGS => {
            let mut parts = identifier.splitn(3, '/');
            let name = parts.next().unwrap_or_default();
            let rest = parts.next().unwrap_or_default();
            let (run_id, query) = split_query(rest, parts.next());
            let base = format!("/events/dag-runs/{name}/{run_id}/logs");
            append_query(base, query)
        }
        STEP_LOG => {
            let mut parts = identifier.splitn(3, '/');
            let name = parts.next().unwrap_or_default();
            let run_id = parts.next().unwrap_or_default();
            let step = parts.next().unwrap_or_default();
            format!("/events/dag-runs/{name}/{run_id}/logs/steps/{step}")
        }
        LIST_OF_DAG_RUNS => append_query("/events/dag-runs".to_owned(), non_empty(identifier)),
        QUEUE_ITEMS => format!("/events/queues/{identifier}/items"),
        LIST_OF_QUEUES => append_query("/events/queues".to_owned(), non_empty(identifier)),
        LIST_OF_DAGS => append_query("/events/dags".to_owned(), non_empty(identifier)),
        other => format!("/events/{other}/{identifier}"),
    }
}

/// Append a `token` query parameter to `path`, URL-encoded, using `&` if the
/// path already carries a query string, otherwise `?`.
#[must_use]
pub fn append_token(path: &str, token: Option<&str>) -> String {
    let Some(token) = token else {
        return path.to_owned();
    };
    let encoded = utf8_percent_encode(token, NON_ALPHANUMERIC).to_string();
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{path}{sep}token={encoded}")
}

/// Trim a single trailing `/` from a configured base URL.
#[must_use]
pub fn trim_trailing_slash(base_url: &str) -> &str {
    base_url.strip_suffix('/').unwrap_or(base_url)
}

fn split2(identifier: &str) -> (&str, &str) {
    let mut parts = identifier.splitn(2, '/');
    let a = parts.next().unwrap_or_default();
    let b = parts.next().unwrap_or_default();
    (a, b)
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn split_query<'a>(rest: &'a str, third: Option<&'a str>) -> (&'a str, Option<&'a str>) {
    // `dag-run-logs` identifier is `name/runId[?q]`; the optional query can
    // appear either appended to the run id segment or as a trailing segment.
    if let Some((run_id, q)) = rest.split_once('?') {
        return (run_id, non_empty(q));
    }
    (rest, third.and_then(non_empty))
}

fn append_query(base: String, query: Option<&str>) -> String {
    match query {
        Some(q) => format!("{base}?{q}"),
        None => base,
    }
}

// ---------------------------------------------------------------------------
// HTTP error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl HttpErrorEnvelope {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_frame_matches_exact_format() {
        let event = Event::data(r#"{"status":"running"}"#);
        assert_eq!(
            event.to_wire(),
            "event: data\ndata: {\"status\":\"running\"}\n\n"
        );
    }

    #[test]
    fn heartbeat_wire_frame_has_empty_data() {
        assert_eq!(Event::heartbeat().to_wire(), "event: heartbeat\ndata: \n\n");
    }

    #[test]
    fn topic_parse_splits_on_first_colon_only() {
        let topic = Topic::parse("dag-run-logs:mydag/run123/logs?q=1").unwrap();
        assert_eq!(topic.topic_type, "dag-run-logs");
        assert_eq!(topic.identifier, "mydag/run123/logs?q=1");
    }

    #[test]
    fn topic_parse_allows_empty_identifier() {
        let topic = Topic::parse("list-of-dags:").unwrap();
        assert_eq!(topic.topic_type, "list-of-dags");
        assert_eq!(topic.identifier, "");
    }

    #[test]
    fn topic_parse_rejects_missing_colon() {
        assert!(Topic::parse("no-colon-here").is_err());
    }

    #[test]
    fn topic_parse_rejects_empty_type() {
        assert!(Topic::parse(":identifier").is_err());
    }

    #[test]
    fn remote_path_dag_run() {
        assert_eq!(
            remote_path_for_topic(topic_types::DAG_RUN, "mydag/run123"),
            "/events/dag-runs/mydag/run123"
        );
    }

    #[test]
    fn remote_path_dag() {
        assert_eq!(
            remote_path_for_topic(topic_types::DAG, "myfile.yaml"),
            "/events/dags/myfile.yaml"
        );
    }

    #[test]
    fn remote_path_step_log() {
        assert_eq!(
            remote_path_for_topic(topic_types::STEP_LOG, "mydag/run123/step1"),
            "/events/dag-runs/mydag/run123/logs/steps/step1"
        );
    }

    #[test]
    fn remote_path_dag_run_logs_with_query() {
        assert_eq!(
            remote_path_for_topic(topic_types::DAG_RUN_LOGS, "mydag/run123?tail=100"),
            "/events/dag-runs/mydag/run123/logs?tail=100"
        );
    }

    #[test]
    fn remote_path_dag_run_logs_without_query() {
        assert_eq!(
            remote_path_for_topic(topic_types::DAG_RUN_LOGS, "mydag/run123"),
            "/events/dag-runs/mydag/run123/logs"
        );
    }

    #[test]
    fn remote_path_list_of_dag_runs_empty_query() {
        assert_eq!(
            remote_path_for_topic(topic_types::LIST_OF_DAG_RUNS, ""),
            "/events/dag-runs"
        );
    }

    #[test]
    fn remote_path_list_of_dag_runs_with_query() {
        assert_eq!(
            remote_path_for_topic(topic_types::LIST_OF_DAG_RUNS, "status=running"),
            "/events/dag-runs?status=running"
        );
    }

    #[test]
    fn remote_path_queue_items() {
        assert_eq!(
            remote_path_for_topic(topic_types::QUEUE_ITEMS, "default"),
            "/events/queues/default/items"
        );
    }

    #[test]
    fn remote_path_unrecognized_type_falls_through() {
        assert_eq!(
            remote_path_for_topic("some-future-type", "abc"),
            "/events/some-future-type/abc"
        );
    }

    #[test]
    fn append_token_uses_question_mark_when_no_existing_query() {
        assert_eq!(
            append_token("/events/dags/foo", Some("a b")),
            "/events/dags/foo?token=a%20b"
        );
    }

    #[test]
    fn append_token_uses_ampersand_when_query_present() {
        assert_eq!(
            append_token("/events/dag-runs?status=running", Some("tok")),
            "/events/dag-runs?status=running&token=tok"
        );
    }

    #[test]
    fn append_token_noop_without_token() {
        assert_eq!(append_token("/events/dags/foo", None), "/events/dags/foo");
    }

    #[test]
    fn trim_trailing_slash_removes_single_slash() {
        assert_eq!(trim_trailing_slash("https://host:8080/"), "https://host:8080");
        assert_eq!(trim_trailing_slash("https://host:8080"), "https://host:8080");
    }
}
