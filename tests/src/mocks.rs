//! Mock implementations for testing.

use async_trait::async_trait;
use ingest_core::{QueuedEvent, Result};
use parking_lot::Mutex;
use redis_client::EventQueue;
use std::sync::Arc;

/// Queue that captures events in memory.
///
/// Implements the same `EventQueue` trait as `StreamProducer`, so tests can
/// inspect exactly what the gate would have written to the stream.
#[derive(Clone, Default)]
pub struct MockQueue {
    events: Arc<Mutex<Vec<QueuedEvent>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured_events(&self) -> Vec<QueuedEvent> {
        self.events.lock().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Set failure mode for testing error handling.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }
}

#[async_trait]
impl EventQueue for MockQueue {
    async fn enqueue(&self, event: &QueuedEvent) -> Result<String> {
        if *self.should_fail.lock() {
            return Err(ingest_core::Error::queueing("Mock queue failure"));
        }

        let mut events = self.events.lock();
        events.push(event.clone());
        Ok(format!("0-{}", events.len()))
    }

    async fn is_healthy(&self) -> bool {
        !*self.should_fail.lock()
    }

    async fn stream_length(&self) -> Result<u64> {
        Ok(self.events.lock().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn queued(name: &str) -> QueuedEvent {
        QueuedEvent {
            project_id: Uuid::new_v4(),
            event_source_id: None,
            event_name: name.into(),
            event_properties: serde_json::json!({}),
            user_id: None,
            session_id: None,
            ip_address: "127.0.0.1".into(),
            user_agent: String::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_id: None,
        }
    }

    #[tokio::test]
    async fn test_mock_queue_captures_events() {
        let queue = MockQueue::new();
        queue.enqueue(&queued("a")).await.unwrap();
        queue.enqueue(&queued("b")).await.unwrap();

        assert_eq!(queue.event_count(), 2);
        assert_eq!(queue.stream_length().await.unwrap(), 2);
        assert_eq!(queue.captured_events()[1].event_name, "b");

        queue.clear();
        assert_eq!(queue.event_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_queue_failure_mode() {
        let queue = MockQueue::new();
        queue.set_should_fail(true);
        assert!(!queue.is_healthy().await);
        let err = queue.enqueue(&queued("a")).await.unwrap_err();
        assert_eq!(err.code(), "QUEUE_001");
    }
}
