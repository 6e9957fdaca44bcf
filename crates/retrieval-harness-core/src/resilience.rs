//! Bounded retry executor.
//!
//! [`ResilienceExecutor::execute`] runs an asynchronous operation under a
//! [`RetryPolicy`]:
//!
//! ```text
//!  INIT ─▶ ATTEMPT ─┬─▶ SUCCESS
//!             ▲      ├─▶ RETRYABLE_FAILURE ─▶ BACKOFF ─┐
//!             │      └─▶ TERMINAL_FAILURE              │
//!             └────────────────────────────────────────┘
//! ```
//!
//! - Each attempt is wrapped in `tokio::time::timeout`. On expiry the
//!   operation's future is dropped, which aborts whatever it was awaiting,
//!   and the attempt fails as `Timeout`.
//! - A failure is retried only while attempts remain, the error is
//!   retryable, and its kind is not terminal (`Auth`, `Validation`,
//!   `Configuration`, `CircuitBreaker`).
//! - The last error is returned as-is once retries stop.
//! - Dropping the returned future cancels the in-flight attempt and any
//!   pending backoff.
//!
//! Every transition is reported to an [`AttemptObserver`].

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::classify::{classify, RawFailure};
use crate::error::ClassifiedError;
use crate::policy::{JitterSource, RandomJitter, RetryPolicy};

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// Why the executor stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The error's retryable flag was false.
    NotRetryable,
    /// The error kind is never retried.
    TerminalKind,
    /// `max_attempts` reached.
    AttemptsExhausted,
    /// The next backoff would overrun the policy's `max_elapsed`.
    BudgetExhausted,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::NotRetryable => "not_retryable",
            StopReason::TerminalKind => "terminal_kind",
            StopReason::AttemptsExhausted => "attempts_exhausted",
            StopReason::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Ephemeral record of one attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
    pub delay_before_next: Option<Duration>,
}

/// Events emitted while executing, one or two per attempt.
#[derive(Debug)]
pub enum ResilienceEvent<'a> {
    AttemptStarted {
        correlation_id: &'a str,
        attempt: u32,
        max_attempts: u32,
    },
    AttemptSucceeded {
        correlation_id: &'a str,
        record: &'a AttemptRecord,
    },
    RetryScheduled {
        correlation_id: &'a str,
        record: &'a AttemptRecord,
        error: &'a ClassifiedError,
    },
    AttemptFailed {
        correlation_id: &'a str,
        record: &'a AttemptRecord,
        error: &'a ClassifiedError,
        reason: StopReason,
    },
}

impl ResilienceEvent<'_> {
    pub fn correlation_id(&self) -> &str {
        match self {
            ResilienceEvent::AttemptStarted { correlation_id, .. }
            | ResilienceEvent::AttemptSucceeded { correlation_id, .. }
            | ResilienceEvent::RetryScheduled { correlation_id, .. }
            | ResilienceEvent::AttemptFailed { correlation_id, .. } => correlation_id,
        }
    }
}

/// Receives executor events. Must not block; may be called concurrently
/// from many in-flight executions.
pub trait AttemptObserver: Send + Sync {
    fn on_event(&self, event: &ResilienceEvent<'_>);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {
    fn on_event(&self, _event: &ResilienceEvent<'_>) {}
}

/// Retry/backoff/timeout orchestration for any async operation.
///
/// Holds only immutable state, so one executor can drive any number of
/// concurrent executions.
#[derive(Clone)]
pub struct ResilienceExecutor {
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
    observer: Arc<dyn AttemptObserver>,
}

impl ResilienceExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            jitter: Arc::new(RandomJitter),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn stop_reason(&self, attempt: u32, error: &ClassifiedError) -> Option<StopReason> {
        if error.kind().is_terminal() {
            Some(StopReason::TerminalKind)
        } else if !error.retryable() {
            Some(StopReason::NotRetryable)
        } else if attempt >= self.policy.max_attempts() {
            Some(StopReason::AttemptsExhausted)
        } else {
            None
        }
    }

    /// Run `operation` until it succeeds or retries stop.
    ///
    /// `operation` receives the 1-indexed attempt number and is called once
    /// per attempt. Failures it returns are classified with
    /// `correlation_id`; an attempt that outlives `timeout` is classified
    /// as a timeout.
    pub async fn execute<T, F, Fut>(
        &self,
        correlation_id: &str,
        timeout: Duration,
        mut operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let run_started = Instant::now();
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.observer.on_event(&ResilienceEvent::AttemptStarted {
                correlation_id,
                attempt,
                max_attempts,
            });

            let started_at = Utc::now();
            let attempt_started = Instant::now();
            let result = match tokio::time::timeout(timeout, operation(attempt)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(raw)) => Err(raw),
                Err(_) => Err(RawFailure::timeout(timeout)),
            };
            let elapsed = attempt_started.elapsed();

            let error = match result {
                Ok(value) => {
                    let record = AttemptRecord {
                        attempt_number: attempt,
                        started_at,
                        elapsed,
                        outcome: AttemptOutcome::Success,
                        delay_before_next: None,
                    };
                    self.observer.on_event(&ResilienceEvent::AttemptSucceeded {
                        correlation_id,
                        record: &record,
                    });
                    return Ok(value);
                }
                Err(raw) => classify(raw, correlation_id).with_context("attempt", attempt),
            };

            let mut stop = self.stop_reason(attempt, &error);
            let mut delay = None;
            if stop.is_none() {
                let next = self.policy.delay_for(attempt, &error, self.jitter.as_ref());
                match self.policy.max_elapsed() {
                    Some(budget) if run_started.elapsed().saturating_add(next) > budget => {
                        stop = Some(StopReason::BudgetExhausted);
                    }
                    _ => delay = Some(next),
                }
            }

            match (stop, delay) {
                (None, Some(delay)) => {
                    let record = AttemptRecord {
                        attempt_number: attempt,
                        started_at,
                        elapsed,
                        outcome: AttemptOutcome::RetryableFailure,
                        delay_before_next: Some(delay),
                    };
                    self.observer.on_event(&ResilienceEvent::RetryScheduled {
                        correlation_id,
                        record: &record,
                        error: &error,
                    });
                    tokio::time::sleep(delay).await;
                }
                (reason, _) => {
                    let record = AttemptRecord {
                        attempt_number: attempt,
                        started_at,
                        elapsed,
                        outcome: AttemptOutcome::TerminalFailure,
                        delay_before_next: None,
                    };
                    self.observer.on_event(&ResilienceEvent::AttemptFailed {
                        correlation_id,
                        record: &record,
                        error: &error,
                        reason: reason.unwrap_or(StopReason::NotRetryable),
                    });
                    return Err(error);
                }
            }
        }
    }
}
