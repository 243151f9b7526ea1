// src/poller.rs

//! Drives one remote long-running operation to a terminal state.
//!
//! A run submits the operation, then checks its status at most
//! `max_attempts` times. Two retry policies share the loop: the pending
//! policy decides the wait after a response that classified as still
//! running, the transport policy decides the wait after a failed status
//! check. A failed check is logged and costs one attempt; it never ends
//! the run.

use futures::channel::mpsc::UnboundedSender;
use log::{debug, warn};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{BackoffPollSettings, FixedPollSettings};
use crate::errors::{FlowError, Result};
use crate::models::Failure;

/// What the submit step produced.
#[derive(Debug)]
pub enum Submitted<H, T> {
    /// The response was already terminal; nothing to poll.
    Inline(T),
    Handle(H),
    Rejected(Failure),
}

/// Classification of one status response.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    Pending,
    Succeeded(T),
    Failed(Failure),
}

/// Terminal result of a run. `R` is the raw status response type.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult<T, R> {
    Succeeded(T),
    Failed(Failure),
    TimedOut { attempts: u32, last: Option<R> },
    /// The hosting view went away; the caller discards this run.
    Cancelled,
}

/// Progress of a run that has not reached a terminal state yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollTick {
    Pending { attempt: u32 },
    TransportError { attempt: u32, message: String },
}

pub trait PollObserver: Send {
    fn on_tick(&mut self, tick: PollTick);
}

impl PollObserver for () {
    fn on_tick(&mut self, _tick: PollTick) {}
}

impl PollObserver for UnboundedSender<PollTick> {
    fn on_tick(&mut self, tick: PollTick) {
        // receiver gone means nobody is watching any more
        let _ = self.unbounded_send(tick);
    }
}

pub trait RetryPolicy: Send {
    /// Wait before the next status check.
    fn next_delay(&mut self) -> Duration;

    fn reset(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl RetryPolicy for FixedInterval {
    fn next_delay(&mut self) -> Duration {
        self.interval
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    factor: u32,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, factor: u32, max: Duration) -> Self {
        Self { base, max, factor, current: base }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Owner side of a cancellation pair. Dropping it without calling
/// [`CancelHandle::cancel`] never cancels the run.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.0.borrow_and_update();
            if cancelled {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub struct Poller {
    label: &'static str,
    max_attempts: u32,
    pending: Box<dyn RetryPolicy>,
    transport: Box<dyn RetryPolicy>,
    observer: Box<dyn PollObserver>,
    cancel: Option<CancelSignal>,
}

impl Poller {
    /// Same constant interval after pending responses and after failed checks.
    pub fn fixed(label: &'static str, max_attempts: u32, interval: Duration) -> Self {
        Self::with_policies(
            label,
            max_attempts,
            Box::new(FixedInterval::new(interval)),
            Box::new(FixedInterval::new(interval)),
        )
    }

    /// Constant interval after pending responses, exponential backoff after failed checks.
    pub fn with_backoff(label: &'static str, max_attempts: u32, interval: Duration, backoff: ExponentialBackoff) -> Self {
        Self::with_policies(label, max_attempts, Box::new(FixedInterval::new(interval)), Box::new(backoff))
    }

    pub fn with_policies(
        label: &'static str,
        max_attempts: u32,
        pending: Box<dyn RetryPolicy>,
        transport: Box<dyn RetryPolicy>,
    ) -> Self {
        Self {
            label,
            max_attempts,
            pending,
            transport,
            observer: Box::new(()),
            cancel: None,
        }
    }

    pub fn from_fixed(label: &'static str, settings: &FixedPollSettings) -> Self {
        Self::fixed(label, settings.max_attempts, settings.interval())
    }

    pub fn from_backoff(label: &'static str, settings: &BackoffPollSettings) -> Self {
        Self::with_backoff(
            label,
            settings.max_attempts,
            settings.interval(),
            ExponentialBackoff::new(settings.interval(), settings.backoff_factor, settings.backoff_max()),
        )
    }

    pub fn observe(mut self, observer: impl PollObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn cancel_on(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled)
    }

    /// Sleeps for `delay`; false if cancelled first.
    async fn wait(&mut self, delay: Duration) -> bool {
        match self.cancel.as_mut() {
            Some(signal) => tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = signal.cancelled() => false,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    pub async fn run<H, R, T, S, F, Fut, C>(mut self, submit: S, mut fetch_status: F, classify: C) -> OperationResult<T, R>
    where
        H: Clone,
        S: Future<Output = Result<Submitted<H, T>>>,
        F: FnMut(H) -> Fut,
        Fut: Future<Output = Result<R>>,
        C: Fn(&R) -> Verdict<T>,
    {
        let handle = match submit.await {
            Ok(Submitted::Inline(payload)) => {
                debug!("{}: submission already terminal, skipping status checks", self.label);
                return OperationResult::Succeeded(payload);
            }
            Ok(Submitted::Rejected(failure)) => return OperationResult::Failed(failure),
            Ok(Submitted::Handle(handle)) => handle,
            Err(e) => {
                warn!("{}: submission failed: {}", self.label, e);
                return OperationResult::Failed(failure_from_error(&e));
            }
        };

        let mut delay = self.pending.next_delay();
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            if !self.wait(delay).await {
                debug!("{}: cancelled before attempt {}", self.label, attempt);
                return OperationResult::Cancelled;
            }

            let response = fetch_status(handle.clone()).await;
            if self.is_cancelled() {
                debug!("{}: cancelled during attempt {}, discarding response", self.label, attempt);
                return OperationResult::Cancelled;
            }

            match response {
                Ok(raw) => match classify(&raw) {
                    Verdict::Succeeded(payload) => {
                        debug!("{}: succeeded after {} status checks", self.label, attempt);
                        return OperationResult::Succeeded(payload);
                    }
                    Verdict::Failed(failure) => {
                        debug!("{}: failed after {} status checks: {}", self.label, attempt, failure.reason);
                        return OperationResult::Failed(failure);
                    }
                    Verdict::Pending => {
                        self.transport.reset();
                        self.observer.on_tick(PollTick::Pending { attempt });
                        delay = self.pending.next_delay();
                        last = Some(raw);
                    }
                },
                Err(e) => {
                    warn!("{}: status check {}/{} failed: {}", self.label, attempt, self.max_attempts, e);
                    self.observer.on_tick(PollTick::TransportError { attempt, message: e.to_string() });
                    delay = self.transport.next_delay();
                }
            }
        }

        warn!("{}: gave up after {} status checks", self.label, self.max_attempts);
        OperationResult::TimedOut { attempts: self.max_attempts, last }
    }
}

fn failure_from_error(error: &FlowError) -> Failure {
    Failure::with_codes(error.api_codes(), error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn classify_number(n: &u32) -> Verdict<u32> {
        match *n {
            0 => Verdict::Pending,
            u32::MAX => Verdict::Failed(Failure::new("rejected")),
            n => Verdict::Succeeded(n),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(3), 2, Duration::from_secs(24));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 24, 24, 24]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_pending_performs_exactly_max_attempts() {
        for max_attempts in [1, 3, 10] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let result = Poller::fixed("test", max_attempts, Duration::from_secs(2))
                .run(
                    async { Ok::<_, FlowError>(Submitted::<&str, u32>::Handle("h")) },
                    move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { Ok::<_, FlowError>(0u32) }
                    },
                    classify_number,
                )
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
            assert_eq!(result, OperationResult::TimedOut { attempts: max_attempts, last: Some(0) });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_submission_skips_status_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = Poller::fixed("test", 5, Duration::from_secs(1))
            .run(
                async { Ok::<_, FlowError>(Submitted::<&str, u32>::Inline(7)) },
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, FlowError>(0u32) }
                },
                classify_number,
            )
            .await;

        assert_eq!(result, OperationResult::Succeeded(7));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_consume_attempts_without_aborting() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = Poller::fixed("test", 4, Duration::from_secs(1))
            .run(
                async { Ok::<_, FlowError>(Submitted::<&str, u32>::Handle("h")) },
                move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= 3 {
                            Err(FlowError::UnexpectedResponse("connection reset".to_string()))
                        } else {
                            Ok(42u32)
                        }
                    }
                },
                classify_number,
            )
            .await;

        assert_eq!(result, OperationResult::Succeeded(42));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_stops_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = Poller::fixed("test", 10, Duration::from_secs(1))
            .run(
                async { Ok::<_, FlowError>(Submitted::<&str, u32>::Handle("h")) },
                move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, FlowError>(if n == 0 { 0 } else { u32::MAX }) }
                },
                classify_number,
            )
            .await;

        assert_eq!(result, OperationResult::Failed(Failure::new("rejected")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_error_fails_without_polling() {
        let result: OperationResult<u32, u32> = Poller::fixed("test", 3, Duration::from_secs(1))
            .run(
                async {
                    Err::<Submitted<&str, u32>, _>(FlowError::ApiError {
                        status: 403,
                        body: r#"{"validationErrors":"SUBSCRIPTION_REQUIRED"}"#.to_string(),
                    })
                },
                |_| async { Ok::<_, FlowError>(0u32) },
                classify_number,
            )
            .await;

        match result {
            OperationResult::Failed(failure) => assert!(failure.has_code("SUBSCRIPTION_REQUIRED")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_pending_and_transport_ticks() {
        let (tx, mut rx) = futures::channel::mpsc::unbounded();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = Poller::fixed("test", 5, Duration::from_millis(500))
            .observe(tx)
            .run(
                async { Ok::<_, FlowError>(Submitted::<&str, u32>::Handle("h")) },
                move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        match n {
                            0 => Ok(0u32),
                            1 => Err(FlowError::UnexpectedResponse("timeout".to_string())),
                            _ => Ok(5u32),
                        }
                    }
                },
                classify_number,
            )
            .await;

        assert_eq!(result, OperationResult::Succeeded(5));
        assert_eq!(rx.try_next().unwrap(), Some(PollTick::Pending { attempt: 1 }));
        assert!(matches!(rx.try_next().unwrap(), Some(PollTick::TransportError { attempt: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_further_checks() {
        let (cancel, signal) = cancel_pair();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let run = tokio::spawn(
            Poller::fixed("test", 10, Duration::from_secs(2))
                .cancel_on(signal)
                .run(
                    async { Ok::<_, FlowError>(Submitted::<&'static str, u32>::Handle("h")) },
                    move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { Ok::<_, FlowError>(0u32) }
                    },
                    classify_number,
                ),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        let result = run.await.unwrap();

        assert_eq!(result, OperationResult::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
