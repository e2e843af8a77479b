//! Proxy Engine (§4.F): the heart of the system. Accepts an authenticated
//! inbound request, extracts the model, loops over candidates with
//! transparent forwarding, and streams back the first successful response.
//! Grounded on the teacher's `gproxy-core::handler::proxy_handler` for the
//! request-lifecycle shape (trace id replaced by request id, `Instant`-based
//! latency, structured log at entry/exit).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::{info, warn};

use gproxy_common::{Preferences, RequestLogSink};
use gproxy_config::ConfigStore;
use gproxy_provider::{ModelMatch, ModelResolver, ProviderEntry, ProviderPool};
use gproxy_upstream::{HttpClientPool, UpstreamBody, UpstreamFailure};

use crate::auth::authenticate;
use crate::classify::classify;
use crate::error::{CandidateFailure, ProxyError};
use crate::headers::{copy_response_headers, detect_scheme, prepare_outbound};
use crate::logger::{build_record, parse_usage, TokenUsage};
use crate::stream_log::LoggingStream;

pub struct ProxyEngine {
    config: Arc<ConfigStore>,
    providers: Arc<ProviderPool>,
    resolver: Arc<ModelResolver>,
    upstream: Arc<HttpClientPool>,
    logs: Arc<dyn RequestLogSink>,
}

enum AttemptOutcome {
    Success(Response),
    ClientFault(Response),
    Failed(String),
}

impl ProxyEngine {
    pub fn new(
        config: Arc<ConfigStore>,
        providers: Arc<ProviderPool>,
        resolver: Arc<ModelResolver>,
        upstream: Arc<HttpClientPool>,
        logs: Arc<dyn RequestLogSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            providers,
            resolver,
            upstream,
            logs,
        })
    }

    /// Discover models for any provider whose explicit list is empty and
    /// whose discovered cache is currently empty. Best-effort: a provider
    /// that fails discovery simply has no candidates until the next attempt.
    async fn ensure_discovery(&self, preferences: &Preferences) {
        for entry in self.providers.providers_needing_discovery() {
            let deadline = Duration::from_secs(preferences.model_timeout);
            match self
                .resolver
                .discover(&entry, preferences.proxy.as_deref(), deadline)
                .await
            {
                Ok(models) => self.providers.set_discovered_models(&entry.name, models),
                Err(err) => {
                    warn!(event = "model_discovery_failed", provider = %entry.name, error = %err);
                }
            }
        }
    }

    pub fn catalog_response(&self) -> Response {
        let entries = self.providers.catalog();
        let data: Vec<_> = entries
            .into_iter()
            .map(|e| serde_json::json!({ "id": e.id, "name": e.id }))
            .collect();
        let body = serde_json::json!({ "data": data }).to_string();
        (
            StatusCode::OK,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }

    pub async fn handle(
        &self,
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let start = Instant::now();
        let path = uri.path().to_string();
        let query = uri.query().map(str::to_string);

        let classified = classify(&headers, query.as_deref(), &body);
        let Some(requested_model) = classified.model.clone() else {
            return ProxyError::bad_request("model field required").into_response();
        };

        let snapshot = self.config.snapshot();
        self.ensure_discovery(&snapshot.preferences).await;

        let candidates = self.providers.candidates(&requested_model);
        if candidates.is_empty() {
            return ProxyError::no_candidate().into_response();
        }

        let mut failures = Vec::with_capacity(candidates.len());
        for (entry, matched) in candidates {
            let provider_name = entry.name.clone();
            let outcome = self
                .attempt(
                    &entry,
                    &matched,
                    &method,
                    &path,
                    query.as_deref(),
                    &headers,
                    &body,
                    classified.is_stream_requested,
                    classified.json.as_ref(),
                    &snapshot.preferences,
                    &requested_model,
                    start,
                )
                .await;

            match outcome {
                AttemptOutcome::Success(response) | AttemptOutcome::ClientFault(response) => {
                    return response;
                }
                AttemptOutcome::Failed(reason) => {
                    failures.push(CandidateFailure {
                        provider: provider_name,
                        reason,
                    });
                }
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        info!(event = "proxy_exhausted", path = %path, model = %requested_model, attempts = failures.len());
        self.logs.record(build_record(
            path,
            requested_model.clone(),
            requested_model,
            None,
            classified.is_stream_requested,
            StatusCode::BAD_GATEWAY.as_u16(),
            latency_ms,
            None,
            TokenUsage::default(),
        ));
        ProxyError::exhausted(&failures).into_response()
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        entry: &ProviderEntry,
        matched: &ModelMatch,
        method: &Method,
        path: &str,
        query: Option<&str>,
        caller_headers: &HeaderMap,
        original_body: &Bytes,
        want_stream: bool,
        json_body: Option<&serde_json::Value>,
        preferences: &Preferences,
        requested_model: &str,
        start: Instant,
    ) -> AttemptOutcome {
        let url = match query {
            Some(q) if !q.is_empty() => {
                format!("{}{path}?{q}", entry.base_url.trim_end_matches('/'))
            }
            _ => format!("{}{path}", entry.base_url.trim_end_matches('/')),
        };

        let upstream_host = match url::Url::parse(&entry.base_url) {
            Ok(parsed) => match (parsed.host_str(), parsed.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                _ => entry.base_url.clone(),
            },
            Err(_) => entry.base_url.clone(),
        };

        let scheme = detect_scheme(caller_headers);
        let outbound_headers = prepare_outbound(caller_headers, &upstream_host, &entry.api_key, scheme);

        let body = if matched.aliased {
            rewrite_model_field(json_body, &matched.effective_model).unwrap_or_else(|| original_body.clone())
        } else {
            original_body.clone()
        };

        let deadline = Duration::from_secs(preferences.model_timeout);
        let result = self
            .upstream
            .send(
                method.clone(),
                &url,
                outbound_headers,
                Some(body),
                deadline,
                want_stream,
                preferences.proxy.as_deref(),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(UpstreamFailure::Transport { message, .. }) => {
                self.providers.mark_failure(
                    &entry.name,
                    message.clone(),
                    Duration::from_secs(preferences.cooldown_period),
                );
                return AttemptOutcome::Failed(message);
            }
        };

        let status = response.status;
        // §4.F classification: 2xx/3xx succeeds; 4xx (except 429) is a client
        // fault forwarded verbatim; 429/5xx and transport errors fail over.
        let is_success = (200..400).contains(&status);
        let is_client_fault = (400..500).contains(&status) && status != 429;
        let latency_ms = start.elapsed().as_millis() as u64;

        if !is_success && !is_client_fault {
            let reason = format!("status {status}");
            self.providers.mark_failure(
                &entry.name,
                reason.clone(),
                Duration::from_secs(preferences.cooldown_period),
            );
            return AttemptOutcome::Failed(reason);
        }

        self.providers.mark_success(&entry.name, latency_ms);

        let response_headers = copy_response_headers(&response.headers);
        let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);

        let axum_response = match response.body {
            UpstreamBody::Bytes(bytes) => {
                let usage = if is_success {
                    parse_usage(&bytes)
                } else {
                    TokenUsage::default()
                };
                self.logs.record(build_record(
                    path.to_string(),
                    requested_model.to_string(),
                    matched.effective_model.clone(),
                    Some(entry.name.clone()),
                    false,
                    status,
                    latency_ms,
                    None,
                    usage,
                ));
                build_response(status_code, response_headers, Body::from(bytes))
            }
            UpstreamBody::Stream(rx) => {
                let logs = Arc::clone(&self.logs);
                let path = path.to_string();
                let requested_model = requested_model.to_string();
                let effective_model = matched.effective_model.clone();
                let provider = entry.name.clone();
                let on_finish: Box<dyn FnOnce(Option<u64>) + Send> = Box::new(move |first_byte_ms| {
                    let total_ms = start.elapsed().as_millis() as u64;
                    logs.record(build_record(
                        path,
                        requested_model,
                        effective_model,
                        Some(provider),
                        true,
                        status,
                        total_ms,
                        first_byte_ms,
                        TokenUsage::default(),
                    ));
                });
                let stream = LoggingStream::new(rx, start, on_finish);
                build_response(status_code, response_headers, Body::from_stream(stream))
            }
        };

        if is_client_fault {
            AttemptOutcome::ClientFault(axum_response)
        } else {
            AttemptOutcome::Success(axum_response)
        }
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Rewrite only the top-level `model` field, preserving all other fields and
/// (with the `preserve_order` serde_json feature) their original key order.
fn rewrite_model_field(json_body: Option<&serde_json::Value>, effective_model: &str) -> Option<Bytes> {
    let mut value = json_body?.clone();
    value
        .as_object_mut()?
        .insert("model".to_string(), serde_json::Value::String(effective_model.to_string()));
    Some(Bytes::from(serde_json::to_vec(&value).ok()?))
}

pub async fn proxy_handler(
    State(engine): State<Arc<ProxyEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let snapshot = engine.config.snapshot();
    if let Err(err) = authenticate(&headers, &snapshot.api_key) {
        return err.into_response();
    }
    engine.handle(method, &uri, headers, body).await
}

pub async fn catalog_handler(State(engine): State<Arc<ProxyEngine>>, headers: HeaderMap) -> Response {
    let snapshot = engine.config.snapshot();
    if let Err(err) = authenticate(&headers, &snapshot.api_key) {
        return err.into_response();
    }
    engine.catalog_response()
}
