//! Body-sniff-then-classify (§4.F steps 1-2): extract the requested model and
//! decide whether the caller asked for a streamed response. The independent
//! upstream-side override (an SSE `Content-Type` forces streaming regardless)
//! is applied in `gproxy-upstream`, where the response headers are actually
//! available. Generalized from the teacher's protocol-specific `classify.rs`
//! to generic JSON-field extraction.

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;

pub struct Classified {
    pub model: Option<String>,
    pub json: Option<Value>,
    pub is_stream_requested: bool,
}

/// `query` is the raw query string (without leading `?`), if any.
pub fn classify(headers: &HeaderMap, query: Option<&str>, body: &Bytes) -> Classified {
    let json = serde_json::from_slice::<Value>(body).ok();

    let model = json
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| query_param(query, "model"));

    let json_stream = json
        .as_ref()
        .and_then(|v| v.get("stream").or_else(|| v.get("streaming")))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let accept_stream = headers
        .get(http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    let query_stream = query_param(query, "stream")
        .or_else(|| query_param(query, "streaming"))
        .is_some_and(|v| is_truthy(&v));

    Classified {
        model,
        json,
        is_stream_requested: accept_stream || json_stream || query_stream,
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
