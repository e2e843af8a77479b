//! HTTP Client Pool: pooled outbound connections to upstream providers, with
//! per-attempt deadlines, unbuffered streaming bodies, and an optional global
//! HTTP/HTTPS proxy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::Method;

pub type Headers = Vec<(String, String)>;

/// Classification of a transport-level failure, used by the Provider Pool to
/// decide whether to fail over and set a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Dns,
    Tls,
    Timeout,
    ReadTimeout,
    Other,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamFailure::Transport { kind, message } => {
                write!(f, "transport error ({kind:?}): {message}")
            }
        }
    }
}

impl std::error::Error for UpstreamFailure {}

/// A response body that is either fully buffered or an incremental stream of
/// chunks, consumed by the caller without full buffering in the latter case.
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone)]
pub struct ClientPoolConfig {
    pub connect_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for ClientPoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Manages upstream transport. Clients are cached by normalized proxy string;
/// the cache is rebuilt lazily whenever a request asks for a proxy it hasn't
/// seen, and in-flight requests keep using whichever client they started on
/// since each cached `reqwest::Client` is cheaply cloneable and independently
/// reference-counted.
pub struct HttpClientPool {
    config: ClientPoolConfig,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl HttpClientPool {
    pub fn new(config: ClientPoolConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for_proxy(&self, proxy: Option<&str>) -> Result<reqwest::Client, UpstreamFailure> {
        let normalized = normalize_proxy(proxy);
        let mut guard = self.clients.lock().expect("client cache lock poisoned");
        if let Some(client) = guard.get(&normalized) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, normalized.as_deref()).map_err(map_reqwest_error)?;
        guard.insert(normalized, client.clone());
        Ok(client)
    }

    /// Issue an outbound request. `deadline` bounds the whole attempt
    /// (connect through response head); once the head arrives, if
    /// `want_stream` the body is handed back as an incremental channel that
    /// is fed until `stream_idle_timeout` passes between chunks.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: Headers,
        body: Option<Bytes>,
        deadline: Duration,
        want_stream: bool,
        proxy: Option<&str>,
    ) -> Result<UpstreamResponse, UpstreamFailure> {
        let client = self.client_for_proxy(proxy)?;
        let mut builder = client.request(method, url).timeout(deadline);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        convert_response(response, want_stream, self.config.stream_idle_timeout).await
    }
}

fn normalize_proxy(proxy: Option<&str>) -> Option<String> {
    proxy
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn build_client(
    config: &ClientPoolConfig,
    proxy: Option<&str>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    } else {
        builder = builder.no_proxy();
    }
    builder.build()
}

async fn convert_response(
    response: reqwest::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamResponse, UpstreamFailure> {
    let status = response.status().as_u16();
    let headers = headers_from_reqwest(response.headers());
    let is_success = (200..300).contains(&status);
    // The caller's request-side streaming signal is independently overridden
    // once the upstream's actual content type is known (an SSE body is
    // relayed as a stream even if the caller never asked for one).
    let want_stream = want_stream || content_type_is_event_stream(&headers);

    if !is_success || !want_stream {
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => break,
            };
            let Some(item) = item else { break };
            let Ok(chunk) = item else { break };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn content_type_is_event_stream(headers: &Headers) -> bool {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .is_some_and(|(_, value)| value.contains("text/event-stream"))
}

fn headers_from_reqwest(map: &reqwest::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn map_reqwest_error(err: reqwest::Error) -> UpstreamFailure {
    UpstreamFailure::Transport {
        kind: classify_reqwest_error(&err),
        message: err.to_string(),
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    if err.is_connect() {
        let message = err.to_string().to_ascii_lowercase();
        if message.contains("dns") || message.contains("resolve") || message.contains("lookup") {
            return TransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") || message.contains("certificate") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    let message = err.to_string().to_ascii_lowercase();
    if message.contains("tls") || message.contains("ssl") {
        return TransportErrorKind::Tls;
    }
    TransportErrorKind::Other
}
