//! Authenticator (§4.E): a single shared local credential, not a per-user key
//! table — a direct simplification of the teacher's `AuthProvider`/`MemoryAuth`.

use http::HeaderMap;

use crate::error::ProxyError;

/// Checks `X-API-Key` or `Authorization: Bearer` against the configured local
/// `api_key`. The credential itself is never forwarded upstream.
pub fn authenticate(headers: &HeaderMap, expected: &str) -> Result<(), ProxyError> {
    let provided = extract_api_key(headers).ok_or_else(ProxyError::unauthorized)?;
    if provided == expected {
        Ok(())
    } else {
        Err(ProxyError::unauthorized())
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_str(headers, "x-api-key") {
        return Some(value);
    }
    let auth = header_str(headers, "authorization")?;
    let auth = auth.trim();
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
