//! Request-log record shape, shared between the Proxy Engine (which builds
//! records) and the request-log ring that stores them.

use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestLogRecord {
    pub id: Uuid,
    pub endpoint: String,
    pub requested_model: String,
    pub effective_model: String,
    pub provider: Option<String>,
    pub is_streaming: bool,
    pub status: u16,
    pub latency_ms: u64,
    pub first_byte_ms: Option<u64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    /// Always `false`: protocol translation is out of scope.
    pub translated: bool,
    pub created_at: OffsetDateTime,
}

/// Sink a completed request's log record. Implemented by the request-log
/// ring; the Proxy Engine only depends on this trait, not on the ring itself.
pub trait RequestLogSink: Send + Sync {
    fn record(&self, record: RequestLogRecord);
}
