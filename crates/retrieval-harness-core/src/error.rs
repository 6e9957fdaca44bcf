//! Error taxonomy for retrieval calls.
//!
//! Every failure that leaves the executor is a [`ClassifiedError`] carrying
//! exactly one [`ErrorKind`]. Kinds are a closed set; each has a fixed
//! default retryability:
//!
//! | Kind | Retryable | Typical source |
//! |------|-----------|----------------|
//! | `Network` | yes | connection refused, DNS failure, reset |
//! | `Timeout` | no | per-attempt deadline exceeded |
//! | `Auth` | no | HTTP 401 / 403 |
//! | `RateLimit` | yes | HTTP 429 |
//! | `Validation` | no | other HTTP 4xx, bad query |
//! | `Server` | yes | HTTP 5xx |
//! | `Configuration` | no | missing or invalid settings |
//! | `CircuitBreaker` | no | caller's breaker is open |
//! | `Unknown` | no | anything else |
//!
//! The raw message is only reachable through [`ClassifiedError::raw_message`];
//! `Display`, [`ClassifiedError::safe_message`], and
//! [`ClassifiedError::to_safe_json`] all pass through [`redact`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::redact::{redact, redact_value};

/// The closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Auth,
    RateLimit,
    Validation,
    Server,
    Configuration,
    CircuitBreaker,
    Unknown,
}

impl ErrorKind {
    /// All kinds, in classification priority order.
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::Auth,
        ErrorKind::RateLimit,
        ErrorKind::Server,
        ErrorKind::Validation,
        ErrorKind::Configuration,
        ErrorKind::CircuitBreaker,
        ErrorKind::Unknown,
    ];

    /// Default retryability for errors of this kind.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Server
        )
    }

    /// Kinds the executor never retries, whatever the error's own flag says.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ErrorKind::Auth
                | ErrorKind::Validation
                | ErrorKind::Configuration
                | ErrorKind::CircuitBreaker
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
            ErrorKind::Configuration => "configuration",
            ErrorKind::CircuitBreaker => "circuit_breaker",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure mapped onto the taxonomy, tagged with its correlation id.
///
/// Built by [`classify`](crate::classify::classify) or directly via
/// [`ClassifiedError::new`] for failures detected before any I/O (e.g. an
/// invalid query). The kind and retryability cannot change after
/// construction; builders only attach status, hints, and context.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {}", redact(.message))]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    correlation_id: String,
    context: Map<String, Value>,
    timestamp: DateTime<Utc>,
    status_code: Option<u16>,
    retry_after_secs: Option<u64>,
}

impl ClassifiedError {
    /// Create an error with the kind's default retryability.
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(),
            correlation_id: correlation_id.into(),
            context: Map::new(),
            timestamp: Utc::now(),
            status_code: None,
            retry_after_secs: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub(crate) fn extend_context(mut self, entries: Map<String, Value>) -> Self {
        self.context.extend(entries);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_secs
    }

    /// The unredacted message. Never log or return this to end users.
    pub fn raw_message(&self) -> &str {
        &self.message
    }

    /// The message with credentials masked.
    pub fn safe_message(&self) -> String {
        redact(&self.message)
    }

    /// Externally visible JSON shape, with message and context redacted.
    pub fn to_safe_json(&self) -> Value {
        json!({
            "kind": self.kind,
            "message": self.safe_message(),
            "retryable": self.retryable,
            "correlation_id": self.correlation_id,
            "context": redact_value(&Value::Object(self.context.clone())),
            "timestamp": self.timestamp.to_rfc3339(),
            "status_code": self.status_code,
            "retry_after_secs": self.retry_after_secs,
        })
    }
}
