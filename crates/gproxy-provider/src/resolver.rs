//! Model Resolver: discover a provider's supported models via its
//! `models_endpoint` when no explicit `model` list is configured.

use std::time::Duration;

use gproxy_common::ModelEntry;
use gproxy_upstream::HttpClientPool;
use http::Method;

use crate::pool::ProviderEntry;

/// Whether and how a requested model was matched against one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMatch {
    pub effective_model: String,
    pub aliased: bool,
}

/// Matching: wildcard against the explicit list first; then exact match
/// against the discovered list (only consulted when the explicit list is
/// empty — an explicit list, even a non-matching one, is authoritative).
pub fn resolve(entry: &ProviderEntry, model: &str, discovered: &[String]) -> Option<ModelMatch> {
    if !entry.model.is_empty() {
        for item in &entry.model {
            if item.matches(model) {
                return Some(ModelMatch {
                    effective_model: item.resolve(model),
                    aliased: matches!(item, ModelEntry::Alias { .. }),
                });
            }
        }
        return None;
    }
    if discovered.iter().any(|id| id == model) {
        return Some(ModelMatch {
            effective_model: model.to_string(),
            aliased: false,
        });
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("request to models endpoint failed: {0}")]
    Transport(#[from] gproxy_upstream::UpstreamFailure),
    #[error("models endpoint returned status {0}")]
    Status(u16),
    #[error("models endpoint response was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("models endpoint response did not match a known provider shape")]
    UnknownShape,
}

pub struct ModelResolver {
    upstream: std::sync::Arc<HttpClientPool>,
}

impl ModelResolver {
    pub fn new(upstream: std::sync::Arc<HttpClientPool>) -> Self {
        Self { upstream }
    }

    /// GET the provider's `models_endpoint`, parsing either the OpenAI-shaped
    /// `{data:[{id}]}` or Gemini-shaped `{models:[{name}]}` payload (stripping
    /// a leading `models/` from Gemini ids). Failure is non-fatal to the
    /// caller: the provider may still match via an explicit list.
    pub async fn discover(
        &self,
        entry: &ProviderEntry,
        proxy: Option<&str>,
        deadline: Duration,
    ) -> Result<Vec<String>, DiscoveryError> {
        let url = join_url(&entry.base_url, &entry.models_endpoint);
        let headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", entry.api_key),
        )];

        let response = self
            .upstream
            .send(Method::GET, &url, headers, None, deadline, false, proxy)
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(DiscoveryError::Status(response.status));
        }

        let bytes = match response.body {
            gproxy_upstream::UpstreamBody::Bytes(bytes) => bytes,
            gproxy_upstream::UpstreamBody::Stream(_) => {
                return Err(DiscoveryError::UnknownShape);
            }
        };

        parse_models_payload(&bytes)
    }
}

fn join_url(base_url: &str, models_endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if models_endpoint.starts_with('/') {
        format!("{base}{models_endpoint}")
    } else {
        format!("{base}/{models_endpoint}")
    }
}

fn parse_models_payload(bytes: &[u8]) -> Result<Vec<String>, DiscoveryError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    if let Some(data) = value.get("data").and_then(|v| v.as_array()) {
        return Ok(data
            .iter()
            .filter_map(|item| item.get("id").and_then(|id| id.as_str()))
            .map(str::to_string)
            .collect());
    }

    if let Some(models) = value.get("models").and_then(|v| v.as_array()) {
        return Ok(models
            .iter()
            .filter_map(|item| item.get("name").and_then(|name| name.as_str()))
            .map(|name| name.strip_prefix("models/").unwrap_or(name).to_string())
            .collect());
    }

    Err(DiscoveryError::UnknownShape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openai_shaped_payload() {
        let payload = br#"{"data":[{"id":"gpt-4"},{"id":"gpt-3.5-turbo"}]}"#;
        let ids = parse_models_payload(payload).unwrap();
        assert_eq!(ids, vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()]);
    }

    #[test]
    fn parses_gemini_shaped_payload_and_strips_prefix() {
        let payload = br#"{"models":[{"name":"models/gemini-1.5-flash"}]}"#;
        let ids = parse_models_payload(payload).unwrap();
        assert_eq!(ids, vec!["gemini-1.5-flash".to_string()]);
    }

    #[test]
    fn unknown_shape_is_rejected() {
        let payload = br#"{"unexpected":true}"#;
        assert!(matches!(
            parse_models_payload(payload),
            Err(DiscoveryError::UnknownShape)
        ));
    }

    #[test]
    fn join_url_handles_trailing_and_leading_slash() {
        assert_eq!(
            join_url("https://api.example.com/", "/v1/models"),
            "https://api.example.com/v1/models"
        );
        assert_eq!(
            join_url("https://api.example.com", "v1/models"),
            "https://api.example.com/v1/models"
        );
    }
}
