use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::stream::{Stream, StreamExt};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_stream::wrappers::BroadcastStream;

use gproxy_common::{ConfigDocument, RequestLogRecord};
use gproxy_config::ConfigStore;
use gproxy_provider::ProviderPool;
use gproxy_storage::RequestLogRing;

#[derive(Clone)]
pub struct AdminState {
    pub config: Arc<ConfigStore>,
    pub providers: Arc<ProviderPool>,
    pub logs: Arc<RequestLogRing>,
}

pub fn router(config: Arc<ConfigStore>, providers: Arc<ProviderPool>, logs: Arc<RequestLogRing>) -> Router {
    let state = AdminState { config, providers, logs };

    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config).put(put_config))
        .route("/providers/{name}/reset", post(reset_provider))
        .route("/logs", get(get_logs))
        .route("/logs/stream", get(logs_stream))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = extract_admin_key(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    if key != state.config.snapshot().api_key {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())?;
    let auth = auth.trim();
    let token = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// §6: secrets redacted — the local `api_key` is omitted and every provider's
/// `api_key` is returned as `"***"`.
async fn get_config(State(state): State<AdminState>) -> impl IntoResponse {
    let doc = state.config.snapshot();
    let providers: Vec<_> = doc
        .providers
        .iter()
        .map(|p| {
            serde_json::json!({
                "provider": p.provider,
                "base_url": p.base_url,
                "api_key": "***",
                "priority": p.priority,
                "enabled": p.enabled,
                "models_endpoint": p.models_endpoint,
                "model": p.model,
            })
        })
        .collect();

    Json(serde_json::json!({
        "preferences": {
            "model_timeout": doc.preferences.model_timeout,
            "cooldown_period": doc.preferences.cooldown_period,
            "proxy": doc.preferences.proxy,
        },
        "providers": providers,
    }))
}

/// §9 admin write path: validate-before-rename via the Config Store's own
/// `write`, then immediately refresh the Provider Pool so the new document
/// takes effect without waiting for the next poll tick.
async fn put_config(State(state): State<AdminState>, Json(doc): Json<ConfigDocument>) -> Response {
    match state.config.write(doc).await {
        Ok(()) => {
            state.providers.replace_from_config(&state.config.snapshot());
            (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid_config", "detail": err.to_string() })),
        )
            .into_response(),
    }
}

async fn reset_provider(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    if state.providers.runtime_of(&name).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "provider_not_found" })),
        )
            .into_response();
    }
    state.providers.reset(&name);
    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}

async fn get_logs(State(state): State<AdminState>) -> impl IntoResponse {
    let logs: Vec<_> = state.logs.snapshot().iter().map(record_to_json).collect();
    Json(serde_json::json!({ "logs": logs }))
}

async fn logs_stream(
    State(state): State<AdminState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.logs.subscribe()).filter_map(|record| async move {
        // A lagged subscriber just misses the records it fell behind on.
        let record = record.ok()?;
        Some(Ok(Event::default().data(record_to_json(&record).to_string())))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn record_to_json(record: &RequestLogRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "endpoint": record.endpoint,
        "requested_model": record.requested_model,
        "effective_model": record.effective_model,
        "provider": record.provider,
        "is_streaming": record.is_streaming,
        "status": record.status,
        "latency_ms": record.latency_ms,
        "first_byte_ms": record.first_byte_ms,
        "prompt_tokens": record.prompt_tokens,
        "completion_tokens": record.completion_tokens,
        "total_tokens": record.total_tokens,
        "translated": record.translated,
        "created_at": format_time_rfc3339(record.created_at),
    })
}

fn format_time_rfc3339(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_admin_key_from_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", "secret".parse().unwrap());
        assert_eq!(extract_admin_key(&headers).as_deref(), Some("secret"));
    }

    #[test]
    fn extracts_admin_key_from_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert_eq!(extract_admin_key(&headers).as_deref(), Some("secret"));
    }

    #[test]
    fn rejects_missing_admin_key() {
        assert_eq!(extract_admin_key(&HeaderMap::new()), None);
    }
}
