use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::StatusCode;

/// The HTTP-boundary error shape: every internal failure collapses into one
/// of these before a response is written, per the error taxonomy.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

fn json_detail(detail: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "detail": detail }).to_string())
}

impl ProxyError {
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: json_detail("invalid api key"),
        }
    }

    pub fn bad_request(detail: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json_detail(detail),
        }
    }

    pub fn no_candidate() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: json_detail("no provider available for model"),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json_detail("internal error"),
        }
    }

    pub fn exhausted(errors: &[CandidateFailure]) -> Self {
        let errors: Vec<_> = errors
            .iter()
            .map(|e| serde_json::json!({ "provider": e.provider, "reason": e.reason }))
            .collect();
        let body = serde_json::json!({
            "detail": "all providers failed",
            "errors": errors,
        });
        Self {
            status: StatusCode::BAD_GATEWAY,
            body: Bytes::from(body.to_string()),
        }
    }
}

/// One candidate's failure reason, collected across the failover loop so an
/// exhaustion response can summarize what was tried.
#[derive(Debug, Clone)]
pub struct CandidateFailure {
    pub provider: String,
    pub reason: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(http::header::CONTENT_TYPE, "application/json")],
            self.body,
        )
            .into_response()
    }
}
