//! # Retrieval Harness Core
//!
//! Transport-agnostic logic for Retrieval Harness: the error taxonomy,
//! the failure classifier, credential redaction, retry policy, and the
//! resilience executor that drives any asynchronous operation through
//! bounded retries with per-attempt timeouts.
//!
//! This crate contains no HTTP client, configuration loading, or logging
//! backend. The only runtime dependency is `tokio`'s timer, used for
//! per-attempt deadlines and backoff sleeps.
//!
//! ```text
//!  RawFailure ──classify()──▶ ClassifiedError ──redact()──▶ safe JSON
//!                                  │
//!  operation ──▶ ResilienceExecutor ┴──▶ AttemptObserver (events)
//! ```

pub mod classify;
pub mod error;
pub mod policy;
pub mod redact;
pub mod resilience;

pub use classify::{classify, parse_retry_after, ConnectCode, RawFailure};
pub use error::{ClassifiedError, ErrorKind};
pub use policy::{JitterSource, NoJitter, RandomJitter, RetryPolicy, MAX_RETRY_AFTER};
pub use redact::{is_sensitive_key, redact, redact_value, REDACTION_MASK};
pub use resilience::{
    AttemptObserver, AttemptOutcome, AttemptRecord, NoopObserver, ResilienceEvent,
    ResilienceExecutor, StopReason,
};
