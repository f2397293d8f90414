//! In-memory message bus doubles for the stock-query bridge.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use stockroom_core::bus::{BusError, QueryMessage, QuerySource, ReplySink};
use stockroom_core::types::StockCountReply;

#[derive(Debug, Default)]
struct SourceState {
    queue: VecDeque<QueryMessage>,
    acked: Vec<i64>,
    fetched: usize,
    next_offset: i64,
}

/// Query source fed by the test.
///
/// Messages get consecutive offsets on a single partition. Once the queue is
/// drained, [`QuerySource::fetch`] reports the source as exhausted, which stops
/// the consumer.
#[derive(Clone, Debug)]
pub struct InMemoryQuerySource {
    topic: String,
    state: Arc<Mutex<SourceState>>,
}

impl InMemoryQuerySource {
    /// Create an empty source on `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    /// Enqueue a raw payload, returning its offset.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> i64 {
        let mut state = self.state.lock().unwrap();
        let offset = state.next_offset;
        state.next_offset += 1;
        state.queue.push_back(QueryMessage {
            payload: payload.into(),
            topic: self.topic.clone(),
            partition: 0,
            offset,
        });
        offset
    }

    /// Offsets acknowledged so far, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<i64> {
        self.state.lock().unwrap().acked.clone()
    }

    /// Number of messages handed out by `fetch`.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.state.lock().unwrap().fetched
    }
}

impl QuerySource for InMemoryQuerySource {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Option<QueryMessage>, BusError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let next = state.queue.pop_front();
            if next.is_some() {
                state.fetched += 1;
            }
            Ok(next)
        })
    }

    fn ack<'a>(
        &'a self,
        message: &'a QueryMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().unwrap().acked.push(message.offset);
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct SinkState {
    published: Vec<StockCountReply>,
    failures: usize,
}

/// Reply sink that records what was published.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReplySink {
    state: Arc<Mutex<SinkState>>,
}

impl InMemoryReplySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<StockCountReply> {
        self.state.lock().unwrap().published.clone()
    }

    /// Fail the next `count` publishes.
    pub fn fail_publishes(&self, count: usize) {
        self.state.lock().unwrap().failures = count;
    }
}

impl ReplySink for InMemoryReplySink {
    fn publish<'a>(
        &'a self,
        reply: &'a StockCountReply,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.failures > 0 {
                state.failures -= 1;
                return Err(BusError::PublishFailed {
                    topic: "in-memory".to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }
            state.published.push(reply.clone());
            Ok(())
        })
    }
}
