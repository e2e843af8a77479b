//! Request-log ring (§4.G, §5): a bounded in-memory store of recently
//! completed requests, read by the admin logs endpoints. The declarative
//! configuration document's own persistence (load/reload/write) is handled
//! by the Config Store in `gproxy-config`; this crate only owns the
//! request-log side of "persisted state" per the component table.

use std::collections::VecDeque;
use std::sync::Mutex;

use gproxy_common::{RequestLogRecord, RequestLogSink};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 500;

/// Tail-push ring behind a single mutex, matching §5's "single mutex,
/// tail-push O(1)" requirement. New records are also broadcast to any
/// subscriber (the admin live-log SSE stream).
pub struct RequestLogRing {
    capacity: usize,
    records: Mutex<VecDeque<RequestLogRecord>>,
    tx: broadcast::Sender<RequestLogRecord>,
}

impl RequestLogRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            tx,
        }
    }

    /// Most-recent-first snapshot of the ring's current contents.
    pub fn snapshot(&self) -> Vec<RequestLogRecord> {
        let records = self.records.lock().expect("request log ring lock poisoned");
        records.iter().rev().cloned().collect()
    }

    /// Subscribe to records as they are pushed, for the admin SSE endpoint.
    /// Lagging subscribers silently miss records rather than blocking pushers.
    pub fn subscribe(&self) -> broadcast::Receiver<RequestLogRecord> {
        self.tx.subscribe()
    }
}

impl Default for RequestLogRing {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLogSink for RequestLogRing {
    fn record(&self, record: RequestLogRecord) {
        {
            let mut records = self.records.lock().expect("request log ring lock poisoned");
            if records.len() == self.capacity {
                records.pop_front();
            }
            records.push_back(record.clone());
        }
        // No subscribers is a routine case (no admin client currently
        // streaming), not an error.
        let _ = self.tx.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn sample(endpoint: &str) -> RequestLogRecord {
        RequestLogRecord {
            id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            requested_model: "gpt-4".to_string(),
            effective_model: "gpt-4".to_string(),
            provider: Some("a".to_string()),
            is_streaming: false,
            status: 200,
            latency_ms: 12,
            first_byte_ms: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            translated: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn snapshot_is_most_recent_first() {
        let ring = RequestLogRing::with_capacity(10);
        ring.record(sample("/v1/chat/completions"));
        ring.record(sample("/v1/messages"));

        let snapshot = ring.snapshot();
        assert_eq!(snapshot[0].endpoint, "/v1/messages");
        assert_eq!(snapshot[1].endpoint, "/v1/chat/completions");
    }

    #[test]
    fn ring_evicts_oldest_once_at_capacity() {
        let ring = RequestLogRing::with_capacity(2);
        ring.record(sample("/first"));
        ring.record(sample("/second"));
        ring.record(sample("/third"));

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].endpoint, "/third");
        assert_eq!(snapshot[1].endpoint, "/second");
    }

    #[tokio::test]
    async fn subscriber_receives_pushed_records() {
        let ring = RequestLogRing::with_capacity(10);
        let mut rx = ring.subscribe();
        ring.record(sample("/v1/chat/completions"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.endpoint, "/v1/chat/completions");
    }
}
