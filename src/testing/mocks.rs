//! Mock implementations for testing
//!
//! Provides scripted handlers and an activity tracker so routing can be
//! exercised without real specialists.

use crate::handler::{Handler, HandlerError, HandlerId, HandlerResult, HandlerSet, Request};
use crate::workflow::WorkflowSnapshot;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Invocation recorded by a [`MockHandler`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub request_text: String,
    pub snapshot: WorkflowSnapshot,
}

/// Handler that replays scripted results in order.
///
/// Once the script is exhausted every call returns the fallback result.
#[derive(Debug)]
pub struct MockHandler {
    id: HandlerId,
    script: Mutex<VecDeque<Result<HandlerResult, HandlerError>>>,
    fallback: Result<HandlerResult, HandlerError>,
    calls: Mutex<Vec<RecordedCall>>,
    tracker: Option<Arc<ActivityTracker>>,
}

impl MockHandler {
    pub fn new(id: HandlerId) -> Self {
        Self {
            id,
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(HandlerResult::content(format!("{id} output"))),
            calls: Mutex::new(Vec::new()),
            tracker: None,
        }
    }

    /// Always answer with `content` and no directive
    pub fn replying(id: HandlerId, content: impl Into<String>) -> Self {
        Self::new(id).with_fallback(HandlerResult::content(content))
    }

    /// Always emit `directive` alongside some content
    pub fn directing(id: HandlerId, directive: impl Into<String>) -> Self {
        Self::new(id).with_fallback(HandlerResult::with_directive(
            format!("{id} output"),
            directive,
        ))
    }

    /// Always fail
    pub fn with_failure(id: HandlerId) -> Self {
        let mut handler = Self::new(id);
        handler.fallback = Err(HandlerError::new(id, "mock handler failure"));
        handler
    }

    pub fn with_fallback(mut self, fallback: HandlerResult) -> Self {
        self.fallback = Ok(fallback);
        self
    }

    /// Queue one result
    pub fn then(mut self, result: HandlerResult) -> Self {
        self.script.get_mut().push_back(Ok(result));
        self
    }

    /// Queue one failure
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        let err = HandlerError::new(self.id, message);
        self.script.get_mut().push_back(Err(err));
        self
    }

    /// Report entry and exit to a shared tracker
    pub fn with_tracker(mut self, tracker: Arc<ActivityTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.calls.lock().await.clear();
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn id(&self) -> HandlerId {
        self.id
    }

    async fn invoke(
        &self,
        request: &Request,
        state: &WorkflowSnapshot,
    ) -> Result<HandlerResult, HandlerError> {
        if let Some(tracker) = &self.tracker {
            tracker.enter();
        }

        self.calls.lock().await.push(RecordedCall {
            request_text: request.text.clone(),
            snapshot: state.clone(),
        });
        let next = self.script.lock().await.pop_front();

        // Give any concurrently running handler a chance to overlap.
        tokio::task::yield_now().await;

        if let Some(tracker) = &self.tracker {
            tracker.exit();
        }

        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Counts handlers executing at the same time
#[derive(Debug, Default)]
pub struct ActivityTracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    total: AtomicUsize,
}

impl ActivityTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of simultaneously active handlers observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total invocations observed
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Bind a plain replying mock for every id not already present
pub fn fill_with_mocks(mut handlers: HandlerSet, ids: &[HandlerId]) -> HandlerSet {
    for id in ids {
        if !handlers.contains(*id) {
            handlers.insert(Arc::new(MockHandler::new(*id)));
        }
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let handler = MockHandler::replying(HandlerId::Ui, "fallback")
            .then(HandlerResult::content("first"))
            .then_fail("boom");
        let request = Request::new(Uuid::new_v4(), "button");
        let snapshot = WorkflowSnapshot::default();

        let first = handler.invoke(&request, &snapshot).await.unwrap();
        let second = handler.invoke(&request, &snapshot).await.unwrap_err();
        let third = handler.invoke(&request, &snapshot).await.unwrap();

        assert_eq!(first.content, "first");
        assert_eq!(second.handler, HandlerId::Ui);
        assert_eq!(third.content, "fallback");
        assert_eq!(handler.call_count().await, 3);

        handler.clear_history().await;
        assert_eq!(handler.call_count().await, 0);
        assert_eq!(
            handler.invoke(&request, &snapshot).await.unwrap().content,
            "fallback"
        );
        assert_eq!(handler.calls().await[0].request_text, "button");
    }

    #[tokio::test]
    async fn test_tracker_counts_sequential_calls() {
        let tracker = ActivityTracker::new();
        let handler = MockHandler::new(HandlerId::Api).with_tracker(tracker.clone());
        let request = Request::new(Uuid::new_v4(), "endpoint");

        for _ in 0..3 {
            handler
                .invoke(&request, &WorkflowSnapshot::default())
                .await
                .unwrap();
        }

        assert_eq!(tracker.total(), 3);
        assert_eq!(tracker.max_in_flight(), 1);
    }

    #[test]
    fn test_fill_with_mocks_keeps_existing_bindings() {
        let existing: Arc<dyn Handler> = Arc::new(MockHandler::replying(HandlerId::Ui, "mine"));
        let set = fill_with_mocks(
            HandlerSet::new().with(existing.clone()),
            &[HandlerId::Ui, HandlerId::Api],
        );
        assert!(Arc::ptr_eq(set.get(HandlerId::Ui).unwrap(), &existing));
        assert!(set.contains(HandlerId::Api));
    }
}
