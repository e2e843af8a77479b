//! Outbound header preparation (§4.F): hop-by-hop scrub, `Host` rewrite, and
//! credential substitution in the scheme the caller used. Mechanics follow
//! the teacher's `gproxy-provider-core::headers` case-insensitive helpers.

use http::HeaderMap;

pub type Headers = Vec<(String, String)>;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const CREDENTIAL_HEADERS: &[&str] = &["authorization", "x-api-key", "x-goog-api-key"];

/// Which header carried the caller's admission credential, used to choose
/// how the outbound credential is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScheme {
    Bearer,
    XApiKey,
    XGoogApiKey,
}

impl CredentialScheme {
    fn header_name(self) -> &'static str {
        match self {
            CredentialScheme::Bearer => "Authorization",
            CredentialScheme::XApiKey => "X-API-Key",
            CredentialScheme::XGoogApiKey => "x-goog-api-key",
        }
    }

    fn header_value(self, api_key: &str) -> String {
        match self {
            CredentialScheme::Bearer => format!("Bearer {api_key}"),
            CredentialScheme::XApiKey | CredentialScheme::XGoogApiKey => api_key.to_string(),
        }
    }
}

/// Inspect which credential header the caller used; defaults to Bearer if
/// none of the three were present.
pub fn detect_scheme(headers: &HeaderMap) -> CredentialScheme {
    if headers.contains_key("x-goog-api-key") {
        CredentialScheme::XGoogApiKey
    } else if headers.contains_key("x-api-key") {
        CredentialScheme::XApiKey
    } else {
        CredentialScheme::Bearer
    }
}

/// Build the outbound header list: drop hop-by-hop and credential headers,
/// rewrite `Host`, then inject the upstream credential under the scheme the
/// caller used. `Content-Length` is deliberately omitted; the HTTP client
/// computes it from the forwarded body.
pub fn prepare_outbound(
    caller_headers: &HeaderMap,
    upstream_host: &str,
    upstream_api_key: &str,
    scheme: CredentialScheme,
) -> Headers {
    let mut out = Headers::new();
    for (name, value) in caller_headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str())
            || CREDENTIAL_HEADERS.contains(&lower.as_str())
            || lower == "host"
            || lower == "content-length"
        {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out.push(("Host".to_string(), upstream_host.to_string()));
    out.push((
        scheme.header_name().to_string(),
        scheme.header_value(upstream_api_key),
    ));
    out
}

/// Response-side scrub (§4.F "Outbound response"): drop hop-by-hop headers
/// plus `Transfer-Encoding`/`Content-Length`, which the local HTTP server
/// re-emits itself based on how the response is actually sent.
pub fn copy_response_headers(headers: &Headers) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str())
            || lower == "content-length"
            || lower == "transfer-encoding"
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) else {
            continue;
        };
        out.append(name, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn drops_hop_by_hop_and_credential_headers() {
        let h = headers(&[
            ("connection", "keep-alive"),
            ("authorization", "Bearer caller-token"),
            ("x-custom", "kept"),
        ]);
        let out = prepare_outbound(&h, "api.example.com", "up-secret", CredentialScheme::Bearer);
        assert!(!out.iter().any(|(k, _)| k.eq_ignore_ascii_case("connection")));
        assert!(out
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("x-custom") && v == "kept"));
        assert_eq!(
            out.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
                .map(|(_, v)| v.as_str()),
            Some("Bearer up-secret")
        );
    }

    #[test]
    fn detects_x_api_key_scheme() {
        let h = headers(&[("x-api-key", "caller-token")]);
        assert_eq!(detect_scheme(&h), CredentialScheme::XApiKey);
    }

    #[test]
    fn defaults_to_bearer_when_no_credential_header_present() {
        let h = headers(&[]);
        assert_eq!(detect_scheme(&h), CredentialScheme::Bearer);
    }

    #[test]
    fn injects_x_goog_api_key_without_bearer_prefix() {
        let h = headers(&[("x-goog-api-key", "caller-token")]);
        let out = prepare_outbound(&h, "host", "up-secret", CredentialScheme::XGoogApiKey);
        assert_eq!(
            out.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("x-goog-api-key"))
                .map(|(_, v)| v.as_str()),
            Some("up-secret")
        );
    }
}
