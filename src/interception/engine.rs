// src/interception/engine.rs
//! Per-request interception engine
//!
//! Each intercepted request gets its own [`LoadTask`], a small state machine
//! that drives the provider through the header phase and then the body
//! phase:
//!
//! ```text
//! Idle → HeaderPending → HeaderDelivered → BodyPending → Completed
//!            │                                  │
//!            └──────────────→ Failed ←──────────┘
//!
//! any non-terminal state ──cancel──→ Cancelled
//! ```
//!
//! Both phases may be preceded by a delay from the provider's timing
//! profile. Cancellation is cooperative: the token is watched during each
//! delay and each producer call and checked again before every delivery, so
//! a cancelled request never emits another event.

use crate::interception::provider::{InterceptedRequest, ResponseHeader, ResponseProvider};
use crate::utils::errors::{LoadError, Phase, ProviderError};
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};
use ulid::Ulid;

/// Lifecycle of one intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    HeaderPending,
    HeaderDelivered,
    BodyPending,
    Completed,
    Failed,
    Cancelled,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoadState::Completed | LoadState::Failed | LoadState::Cancelled
        )
    }
}

/// Receiver of response events for one request
///
/// For a single request the engine calls `on_header_received`, then
/// `on_body_chunk_received`, then `on_completed`; or stops after
/// `on_failed`; or stops silently once cancelled. A callback that panics
/// ends the load in [`LoadState::Failed`] and no further callbacks are made.
pub trait ResponseSink: Send + Sync {
    fn on_header_received(&self, header: ResponseHeader);

    /// The whole body arrives as a single chunk
    fn on_body_chunk_received(&self, chunk: Bytes);

    fn on_completed(&self);

    fn on_failed(&self, error: LoadError);
}

/// Event forwarded by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    Header(ResponseHeader),
    Body(Bytes),
    Completed,
    Failed(LoadError),
}

/// Sink forwarding events over an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LoadEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: LoadEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl ResponseSink for ChannelSink {
    fn on_header_received(&self, header: ResponseHeader) {
        self.send(LoadEvent::Header(header));
    }

    fn on_body_chunk_received(&self, chunk: Bytes) {
        self.send(LoadEvent::Body(chunk));
    }

    fn on_completed(&self) {
        self.send(LoadEvent::Completed);
    }

    fn on_failed(&self, error: LoadError) {
        self.send(LoadEvent::Failed(error));
    }
}

enum PhaseOutcome<T> {
    Ready(T),
    Failed(ProviderError),
    Cancelled,
}

/// State machine answering a single request from a resolved provider
pub struct LoadTask {
    request_id: Ulid,
    request: InterceptedRequest,
    provider: Arc<dyn ResponseProvider>,
    sink: Arc<dyn ResponseSink>,
    cancel: CancellationToken,
    state: LoadState,
}

impl LoadTask {
    pub fn new(
        request: InterceptedRequest,
        provider: Arc<dyn ResponseProvider>,
        sink: Arc<dyn ResponseSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id: Ulid::new(),
            request,
            provider,
            sink,
            cancel,
            state: LoadState::Idle,
        }
    }

    pub fn request_id(&self) -> Ulid {
        self.request_id
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Drive the request to a terminal state
    pub async fn run(mut self) -> LoadState {
        let span = info_span!(
            "mock_load",
            request_id = %self.request_id,
            provider = %self.provider.id(),
            url = self.request.url().unwrap_or("<none>"),
        );

        async move {
            metrics::counter!("mock_requests_intercepted_total").increment(1);
            self.drive().await
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> LoadState {
        let provider = Arc::clone(&self.provider);

        self.transition(LoadState::HeaderPending);
        let timing = match panic::catch_unwind(AssertUnwindSafe(|| provider.timing())) {
            Ok(timing) => timing,
            Err(panic) => {
                let err = ProviderError::Panicked(panic_message(&*panic));
                return self.fail(Phase::Header, err);
            }
        };

        let header_producer = async {
            self.request.validated_uri()?;
            let header = provider.header(&self.request).await?;
            header.to_http()?;
            Ok::<_, ProviderError>(header)
        };
        let header = match self.run_phase(timing.header_delay, header_producer).await {
            PhaseOutcome::Ready(header) => header,
            PhaseOutcome::Failed(err) => return self.fail(Phase::Header, err),
            PhaseOutcome::Cancelled => return self.cancelled(),
        };

        if self.cancel.is_cancelled() {
            return self.cancelled();
        }
        if !self.deliver("on_header_received", |sink| sink.on_header_received(header)) {
            return self.sink_failed();
        }
        self.transition(LoadState::HeaderDelivered);

        self.transition(LoadState::BodyPending);
        let body_producer = provider.body(&self.request);
        let body = match self.run_phase(timing.body_delay, body_producer).await {
            PhaseOutcome::Ready(body) => body,
            PhaseOutcome::Failed(err) => return self.fail(Phase::Body, err),
            PhaseOutcome::Cancelled => return self.cancelled(),
        };

        if self.cancel.is_cancelled() {
            return self.cancelled();
        }
        debug!("Delivering {} body bytes", body.len());
        if !self.deliver("on_body_chunk_received", |sink| sink.on_body_chunk_received(body)) {
            return self.sink_failed();
        }
        if !self.deliver("on_completed", |sink| sink.on_completed()) {
            return self.sink_failed();
        }
        metrics::counter!("mock_requests_completed_total").increment(1);
        self.transition(LoadState::Completed)
    }

    /// Sleep for `delay`, then await `producer`, racing both against
    /// cancellation
    async fn run_phase<T, F>(&self, delay: Option<Duration>, producer: F) -> PhaseOutcome<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if let Some(delay) = delay {
            debug!("Delaying {:?} in {:?}", delay, self.state);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PhaseOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.cancel.is_cancelled() {
            return PhaseOutcome::Cancelled;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => PhaseOutcome::Cancelled,
            outcome = AssertUnwindSafe(producer).catch_unwind() => match outcome {
                Ok(Ok(value)) => PhaseOutcome::Ready(value),
                Ok(Err(err)) => PhaseOutcome::Failed(err),
                Err(panic) => PhaseOutcome::Failed(ProviderError::Panicked(panic_message(&*panic))),
            },
        }
    }

    fn transition(&mut self, next: LoadState) -> LoadState {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        next
    }

    fn fail(&mut self, phase: Phase, err: ProviderError) -> LoadState {
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }

        warn!("{} phase failed: {}", phase.as_str(), err);
        metrics::counter!("mock_requests_failed_total", "phase" => phase.as_str()).increment(1);
        let error = LoadError::new(phase, err);
        if !self.deliver("on_failed", |sink| sink.on_failed(error)) {
            return self.sink_failed();
        }
        self.transition(LoadState::Failed)
    }

    /// Hand one event to the sink; returns false if the sink panicked
    fn deliver(&self, callback: &str, event: impl FnOnce(&dyn ResponseSink)) -> bool {
        let sink = self.sink.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| event(sink))) {
            Ok(()) => true,
            Err(panic) => {
                error!("Sink panicked in {}: {}", callback, panic_message(&*panic));
                false
            }
        }
    }

    fn sink_failed(&mut self) -> LoadState {
        metrics::counter!("mock_sink_panics_total").increment(1);
        self.transition(LoadState::Failed)
    }

    fn cancelled(&mut self) -> LoadState {
        debug!("Cancelled while {:?}", self.state);
        metrics::counter!("mock_requests_cancelled_total").increment(1);
        self.transition(LoadState::Cancelled)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to an in-flight request task
pub struct RequestHandle {
    request_id: Ulid,
    cancel: CancellationToken,
    join: JoinHandle<LoadState>,
}

impl RequestHandle {
    /// Spawn `task` on the current tokio runtime
    pub fn spawn(task: LoadTask) -> Self {
        let request_id = task.request_id();
        let cancel = task.cancel.clone();
        let join = tokio::spawn(task.run());

        Self {
            request_id,
            cancel,
            join,
        }
    }

    pub fn request_id(&self) -> Ulid {
        self.request_id
    }

    /// Withdraw interest; no further events are delivered. Repeated calls
    /// are no-ops.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancelling request {}", self.request_id);
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the task and return its terminal state
    pub async fn finished(self) -> LoadState {
        match self.join.await {
            Ok(state) => state,
            Err(e) => {
                error!("Request task {} did not finish: {}", self.request_id, e);
                LoadState::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::mock_provider::MockProvider;
    use crate::interception::provider::{ProviderId, Timing};
    use crate::interception::rule::AnyRule;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    const URL: &str = "https://api.example.com/users";

    fn spawn(provider: impl ResponseProvider + 'static) -> (RequestHandle, mpsc::UnboundedReceiver<LoadEvent>) {
        spawn_request(InterceptedRequest::get(URL), provider)
    }

    fn spawn_request(
        request: InterceptedRequest,
        provider: impl ResponseProvider + 'static,
    ) -> (RequestHandle, mpsc::UnboundedReceiver<LoadEvent>) {
        let (sink, rx) = ChannelSink::channel();
        let task = LoadTask::new(request, Arc::new(provider), Arc::new(sink), CancellationToken::new());
        (RequestHandle::spawn(task), rx)
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<LoadEvent>) -> Vec<LoadEvent> {
        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_header_then_body_then_completed() {
        let provider = MockProvider::builder(AnyRule)
            .with_status(200)
            .with_json(json!({ "ok": true }))
            .build();

        let (handle, rx) = spawn(provider);
        assert_eq!(handle.finished().await, LoadState::Completed);

        let events = drain(rx).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], LoadEvent::Header(h) if h.status == 200));
        assert_eq!(events[1], LoadEvent::Body(Bytes::from_static(br#"{"ok":true}"#)));
        assert_eq!(events[2], LoadEvent::Completed);
    }

    #[tokio::test]
    async fn test_empty_body_default() {
        let (handle, rx) = spawn(MockProvider::builder(AnyRule).with_status(204).build());
        assert_eq!(handle.finished().await, LoadState::Completed);

        let events = drain(rx).await;
        assert_eq!(events[1], LoadEvent::Body(Bytes::new()));
        assert_eq!(events[2], LoadEvent::Completed);
    }

    #[tokio::test]
    async fn test_header_failure_carries_configured_error() {
        let error = ProviderError::simulated("no route to host");
        let provider = MockProvider::builder(AnyRule)
            .failing_header(error.clone())
            .with_text("never sent")
            .build();

        let (handle, rx) = spawn(provider);
        assert_eq!(handle.finished().await, LoadState::Failed);
        assert_eq!(drain(rx).await, vec![LoadEvent::Failed(LoadError::HeaderPhase(error))]);
    }

    #[tokio::test]
    async fn test_body_failure_after_header() {
        let error = ProviderError::simulated("connection reset");
        let provider = MockProvider::builder(AnyRule)
            .with_status(404)
            .failing_body(error.clone())
            .build();

        let (handle, rx) = spawn(provider);
        assert_eq!(handle.finished().await, LoadState::Failed);

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LoadEvent::Header(h) if h.status == 404));
        assert_eq!(events[1], LoadEvent::Failed(LoadError::BodyPhase(error)));
    }

    #[tokio::test]
    async fn test_missing_url_fails_header_phase() {
        let provider = MockProvider::builder(AnyRule).build();
        let (handle, rx) = spawn_request(InterceptedRequest::without_url("GET"), provider);

        assert_eq!(handle.finished().await, LoadState::Failed);
        assert_eq!(
            drain(rx).await,
            vec![LoadEvent::Failed(LoadError::HeaderPhase(ProviderError::MissingUrl))]
        );
    }

    #[tokio::test]
    async fn test_invalid_status_fails_header_phase() {
        let provider = MockProvider::builder(AnyRule).with_status(1200).build();
        let (handle, rx) = spawn(provider);

        assert_eq!(handle.finished().await, LoadState::Failed);
        let events = drain(rx).await;
        assert!(matches!(
            &events[..],
            [LoadEvent::Failed(LoadError::HeaderPhase(ProviderError::InvalidEnvelope(_)))]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_delay() {
        let provider = MockProvider::builder(AnyRule)
            .with_header_delay(Duration::from_secs(3))
            .with_text("hi")
            .build();
        let start = Instant::now();
        let (handle, mut rx) = spawn(provider);

        assert!(matches!(rx.recv().await, Some(LoadEvent::Header(_))));
        assert!(start.elapsed() >= Duration::from_secs(3));

        assert!(matches!(rx.recv().await, Some(LoadEvent::Body(_))));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(handle.finished().await, LoadState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_delay() {
        let provider = MockProvider::builder(AnyRule)
            .with_body_delay(Duration::from_secs(3))
            .with_text("hi")
            .build();
        let start = Instant::now();
        let (_handle, mut rx) = spawn(provider);

        assert!(matches!(rx.recv().await, Some(LoadEvent::Header(_))));
        let header_at = start.elapsed();
        assert!(header_at < Duration::from_secs(1));

        assert!(matches!(rx.recv().await, Some(LoadEvent::Body(_))));
        assert!(start.elapsed() >= header_at + Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_are_sequential() {
        let provider = MockProvider::builder(AnyRule)
            .with_timing(
                Timing::immediate()
                    .with_header_delay(Duration::from_secs(2))
                    .with_body_delay(Duration::from_secs(2)),
            )
            .with_text("hi")
            .build();
        let start = Instant::now();
        let (_handle, mut rx) = spawn(provider);

        assert!(matches!(rx.recv().await, Some(LoadEvent::Header(_))));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(matches!(rx.recv().await, Some(LoadEvent::Body(_))));
        assert!(matches!(rx.recv().await, Some(LoadEvent::Completed)));
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_header_delay_suppresses_everything() {
        let provider = MockProvider::builder(AnyRule)
            .with_header_delay(Duration::from_secs(5))
            .failing_body(ProviderError::simulated("unreachable"))
            .build();
        let (handle, rx) = spawn(provider);

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        assert_eq!(handle.finished().await, LoadState::Cancelled);
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_body_delay_keeps_header_only() {
        let provider = MockProvider::builder(AnyRule)
            .with_body_delay(Duration::from_secs(5))
            .with_text("late")
            .build();
        let (handle, mut rx) = spawn(provider);

        assert!(matches!(rx.recv().await, Some(LoadEvent::Header(_))));
        handle.cancel();

        assert_eq!(handle.finished().await, LoadState::Cancelled);
        assert!(rx.recv().await.is_none());
    }

    #[derive(Debug)]
    struct PanickingProvider(ProviderId);

    #[async_trait]
    impl ResponseProvider for PanickingProvider {
        fn id(&self) -> ProviderId {
            self.0
        }

        fn can_handle(&self, _request: &InterceptedRequest) -> bool {
            true
        }

        async fn header(&self, _request: &InterceptedRequest) -> Result<ResponseHeader, ProviderError> {
            Ok(ResponseHeader::new(200))
        }

        async fn body(&self, _request: &InterceptedRequest) -> Result<Bytes, ProviderError> {
            panic!("body exploded")
        }
    }

    #[tokio::test]
    async fn test_panicking_producer_becomes_phase_failure() {
        let (handle, rx) = spawn(PanickingProvider(ProviderId::generate()));
        assert_eq!(handle.finished().await, LoadState::Failed);

        let events = drain(rx).await;
        assert_eq!(
            events[1],
            LoadEvent::Failed(LoadError::BodyPhase(ProviderError::Panicked("body exploded".into())))
        );
    }

    #[derive(Debug)]
    struct SlowHeaderProvider(ProviderId);

    #[async_trait]
    impl ResponseProvider for SlowHeaderProvider {
        fn id(&self) -> ProviderId {
            self.0
        }

        fn can_handle(&self, _request: &InterceptedRequest) -> bool {
            true
        }

        async fn header(&self, _request: &InterceptedRequest) -> Result<ResponseHeader, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ResponseHeader::new(200))
        }

        async fn body(&self, _request: &InterceptedRequest) -> Result<Bytes, ProviderError> {
            Ok(Bytes::from_static(b"slow"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_header_producer_runs() {
        let start = Instant::now();
        let (handle, rx) = spawn(SlowHeaderProvider(ProviderId::generate()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        assert_eq!(handle.finished().await, LoadState::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_completed_changes_nothing() {
        let (handle, mut rx) = spawn(MockProvider::builder(AnyRule).with_text("done").build());

        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            let completed = event == LoadEvent::Completed;
            events.push(event);
            if completed {
                break;
            }
        }

        handle.cancel();
        assert_eq!(handle.finished().await, LoadState::Completed);
        assert!(rx.recv().await.is_none());
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], LoadEvent::Body(Bytes::from_static(b"done")));
    }

    #[derive(Debug)]
    struct PanickingTimingProvider(ProviderId);

    #[async_trait]
    impl ResponseProvider for PanickingTimingProvider {
        fn id(&self) -> ProviderId {
            self.0
        }

        fn can_handle(&self, _request: &InterceptedRequest) -> bool {
            true
        }

        fn timing(&self) -> Timing {
            panic!("timing exploded")
        }

        async fn header(&self, _request: &InterceptedRequest) -> Result<ResponseHeader, ProviderError> {
            Ok(ResponseHeader::new(200))
        }

        async fn body(&self, _request: &InterceptedRequest) -> Result<Bytes, ProviderError> {
            Ok(Bytes::new())
        }
    }

    #[tokio::test]
    async fn test_panicking_timing_fails_header_phase() {
        let (handle, rx) = spawn(PanickingTimingProvider(ProviderId::generate()));
        assert_eq!(handle.finished().await, LoadState::Failed);

        assert_eq!(
            drain(rx).await,
            vec![LoadEvent::Failed(LoadError::HeaderPhase(ProviderError::Panicked(
                "timing exploded".into()
            )))]
        );
    }

    /// Records every callback and panics when the header arrives
    #[derive(Default)]
    struct PanickingSink {
        calls: Mutex<Vec<&'static str>>,
    }

    impl ResponseSink for PanickingSink {
        fn on_header_received(&self, _header: ResponseHeader) {
            self.calls.lock().push("header");
            panic!("sink exploded")
        }

        fn on_body_chunk_received(&self, _chunk: Bytes) {
            self.calls.lock().push("body");
        }

        fn on_completed(&self) {
            self.calls.lock().push("completed");
        }

        fn on_failed(&self, _error: LoadError) {
            self.calls.lock().push("failed");
        }
    }

    #[tokio::test]
    async fn test_panicking_sink_stops_delivery() {
        let sink = Arc::new(PanickingSink::default());
        let provider = MockProvider::builder(AnyRule).with_text("unseen").build();
        let task = LoadTask::new(
            InterceptedRequest::get(URL),
            Arc::new(provider),
            sink.clone(),
            CancellationToken::new(),
        );

        assert_eq!(RequestHandle::spawn(task).finished().await, LoadState::Failed);
        assert_eq!(*sink.calls.lock(), vec!["header"]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(LoadState::Completed.is_terminal());
        assert!(LoadState::Failed.is_terminal());
        assert!(LoadState::Cancelled.is_terminal());
        assert!(!LoadState::HeaderDelivered.is_terminal());
    }
}
