//! Request Logger (§4.G): build one `RequestLogRecord` per terminated caller
//! request. Field list grounded on the teacher's `DownstreamTrafficEvent`
//! shape; the ring that stores these records lives in `gproxy-storage`.

use gproxy_common::RequestLogRecord;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Opportunistically parse token counts out of a buffered JSON response body.
/// Supports OpenAI's `usage.{prompt,completion,total}_tokens` and Gemini's
/// `usageMetadata.{promptTokenCount,candidatesTokenCount,totalTokenCount}`.
/// Never attempted against streaming bodies.
pub fn parse_usage(body: &[u8]) -> TokenUsage {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return TokenUsage::default();
    };

    if let Some(usage) = value.get("usage") {
        return TokenUsage {
            prompt_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64()),
            completion_tokens: usage.get("completion_tokens").and_then(|v| v.as_u64()),
            total_tokens: usage.get("total_tokens").and_then(|v| v.as_u64()),
        };
    }

    if let Some(usage) = value.get("usageMetadata") {
        return TokenUsage {
            prompt_tokens: usage.get("promptTokenCount").and_then(|v| v.as_u64()),
            completion_tokens: usage.get("candidatesTokenCount").and_then(|v| v.as_u64()),
            total_tokens: usage.get("totalTokenCount").and_then(|v| v.as_u64()),
        };
    }

    TokenUsage::default()
}

#[allow(clippy::too_many_arguments)]
pub fn build_record(
    endpoint: String,
    requested_model: String,
    effective_model: String,
    provider: Option<String>,
    is_streaming: bool,
    status: u16,
    latency_ms: u64,
    first_byte_ms: Option<u64>,
    usage: TokenUsage,
) -> RequestLogRecord {
    RequestLogRecord {
        id: Uuid::new_v4(),
        endpoint,
        requested_model,
        effective_model,
        provider,
        is_streaming,
        status,
        latency_ms,
        first_byte_ms,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        translated: false,
        created_at: OffsetDateTime::now_utc(),
    }
}
