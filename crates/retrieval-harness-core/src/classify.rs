//! Failure classification.
//!
//! [`classify`] maps a [`RawFailure`] onto exactly one [`ErrorKind`]. It is a
//! pure function: no logging, no I/O, same input → same kind.
//!
//! Rules are evaluated in a fixed priority order and the first match wins:
//!
//! 1. low-level connect code → `Network`
//! 2. timeout signal, or message mentions "timeout"/"timed out" → `Timeout`
//! 3. status 401/403, or "unauthorized"/"forbidden" → `Auth`
//! 4. status 429, or "rate limit"/"too many requests" → `RateLimit`
//! 5. status ≥ 500 → `Server`
//! 6. status 400–499 → `Validation`
//! 7. "configuration"/"config"/"missing"/"invalid" → `Configuration`
//! 8. circuit-open signal → `CircuitBreaker`
//! 9. otherwise → `Unknown`
//!
//! Message matching is case-insensitive.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{ClassifiedError, ErrorKind};

/// Low-level connection failure codes recognized by rule 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCode {
    ConnectionRefused,
    DnsNotFound,
    ConnectionReset,
    /// Any other failure to establish a connection (no route, TLS handshake).
    Unreachable,
}

impl ConnectCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectCode::ConnectionRefused => "ECONNREFUSED",
            ConnectCode::DnsNotFound => "ENOTFOUND",
            ConnectCode::ConnectionReset => "ECONNRESET",
            ConnectCode::Unreachable => "EUNREACHABLE",
        }
    }
}

/// An unclassified failure, as observed by a transport.
///
/// Construct with one of the shorthand constructors and refine with the
/// `with_*` builders. Nothing here is interpreted until [`classify`].
#[derive(Debug, Clone, Default)]
pub struct RawFailure {
    message: String,
    connect_code: Option<ConnectCode>,
    timed_out: bool,
    status: Option<u16>,
    retry_after_secs: Option<u64>,
    circuit_open: bool,
    context: Map<String, Value>,
}

impl RawFailure {
    /// A failure described only by its message.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// A failure to establish or keep a connection.
    pub fn connect(code: ConnectCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connect_code: Some(code),
            ..Default::default()
        }
    }

    /// A deadline was exceeded.
    pub fn timeout(after: Duration) -> Self {
        Self {
            message: format!("request timed out after {}ms", after.as_millis()),
            timed_out: true,
            ..Default::default()
        }
    }

    /// A deadline enforced by the transport itself, with its own message.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
            ..Default::default()
        }
    }

    /// A non-success HTTP response. `body` is the (possibly empty) error body.
    pub fn http(status: u16, body: impl AsRef<str>) -> Self {
        let body = body.as_ref().trim();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        Self {
            message,
            status: Some(status),
            ..Default::default()
        }
    }

    /// The caller's circuit breaker refused the call.
    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            circuit_open: true,
            ..Default::default()
        }
    }

    pub fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

fn mentions(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Decide the [`ErrorKind`] for a raw failure without building the error.
pub fn classify_kind(raw: &RawFailure) -> ErrorKind {
    let msg = raw.message.to_lowercase();

    if raw.connect_code.is_some() {
        return ErrorKind::Network;
    }
    if raw.timed_out || mentions(&msg, &["timeout", "timed out"]) {
        return ErrorKind::Timeout;
    }
    if matches!(raw.status, Some(401 | 403)) || mentions(&msg, &["unauthorized", "forbidden"]) {
        return ErrorKind::Auth;
    }
    if raw.status == Some(429) || mentions(&msg, &["rate limit", "too many requests"]) {
        return ErrorKind::RateLimit;
    }
    match raw.status {
        Some(s) if s >= 500 => return ErrorKind::Server,
        Some(s) if (400..500).contains(&s) => return ErrorKind::Validation,
        _ => {}
    }
    if mentions(&msg, &["configuration", "config", "missing", "invalid"]) {
        return ErrorKind::Configuration;
    }
    if raw.circuit_open {
        return ErrorKind::CircuitBreaker;
    }
    ErrorKind::Unknown
}

/// Classify a raw failure into a [`ClassifiedError`] for `correlation_id`.
///
/// The retry-after hint is kept only on `RateLimit` errors. The connect
/// code and timeout flag are recorded in the error context.
pub fn classify(raw: RawFailure, correlation_id: &str) -> ClassifiedError {
    let kind = classify_kind(&raw);

    let mut err = ClassifiedError::new(kind, raw.message, correlation_id);
    if let Some(status) = raw.status {
        err = err.with_status(status);
    }
    if kind == ErrorKind::RateLimit {
        err = err.with_retry_after(raw.retry_after_secs);
    }
    if let Some(code) = raw.connect_code {
        err = err.with_context("code", code.as_str());
    }
    if raw.timed_out {
        err = err.with_context("timed_out", true);
    }
    err.extend_context(raw.context)
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Dates in the past yield `Some(0)`. Unparseable values yield `None`.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    parse_retry_after_at(value, Utc::now())
}

fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(secs.ceil() as u64);
        }
        return None;
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(delta.num_seconds().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_connect_codes_are_network() {
        for code in [
            ConnectCode::ConnectionRefused,
            ConnectCode::DnsNotFound,
            ConnectCode::ConnectionReset,
            ConnectCode::Unreachable,
        ] {
            let err = classify(RawFailure::connect(code, "boom"), "cid");
            assert_eq!(err.kind(), ErrorKind::Network);
            assert!(err.retryable());
            assert_eq!(err.context()["code"], code.as_str());
        }
    }

    #[test]
    fn test_connect_code_beats_timeout_message() {
        let raw = RawFailure::connect(ConnectCode::ConnectionReset, "reset after timeout");
        assert_eq!(classify_kind(&raw), ErrorKind::Network);
    }

    #[test]
    fn test_timeout_signal_not_retryable() {
        let err = classify(RawFailure::timeout(Duration::from_millis(1500)), "cid");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.retryable());
        assert_eq!(err.raw_message(), "request timed out after 1500ms");
    }

    #[test]
    fn test_timeout_message() {
        let raw = RawFailure::other("upstream Timed Out while reading");
        assert_eq!(classify_kind(&raw), ErrorKind::Timeout);
    }

    #[test]
    fn test_auth_statuses() {
        for status in [401, 403] {
            let err = classify(RawFailure::http(status, "nope"), "cid");
            assert_eq!(err.kind(), ErrorKind::Auth);
            assert!(!err.retryable());
            assert_eq!(err.status_code(), Some(status));
        }
        assert_eq!(
            classify_kind(&RawFailure::other("Forbidden resource")),
            ErrorKind::Auth
        );
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let err = classify(RawFailure::http(429, "").with_retry_after(Some(12)), "cid");
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.retryable());
        assert_eq!(err.retry_after_secs(), Some(12));
    }

    #[test]
    fn test_retry_after_dropped_for_other_kinds() {
        let err = classify(RawFailure::http(503, "").with_retry_after(Some(12)), "cid");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.retry_after_secs(), None);
    }

    #[test]
    fn test_rate_limit_message() {
        let raw = RawFailure::other("Too Many Requests from this client");
        assert_eq!(classify_kind(&raw), ErrorKind::RateLimit);
    }

    #[test]
    fn test_server_and_validation_statuses() {
        assert_eq!(classify_kind(&RawFailure::http(500, "")), ErrorKind::Server);
        assert_eq!(classify_kind(&RawFailure::http(502, "")), ErrorKind::Server);
        assert_eq!(classify_kind(&RawFailure::http(400, "")), ErrorKind::Validation);
        assert_eq!(classify_kind(&RawFailure::http(422, "")), ErrorKind::Validation);
    }

    #[test]
    fn test_status_wins_over_configuration_words() {
        let raw = RawFailure::http(400, "invalid numResults");
        assert_eq!(classify_kind(&raw), ErrorKind::Validation);
    }

    #[test]
    fn test_configuration_message() {
        let raw = RawFailure::other("Missing pipeline id");
        assert_eq!(classify_kind(&raw), ErrorKind::Configuration);
    }

    #[test]
    fn test_circuit_open() {
        let err = classify(RawFailure::circuit_open("breaker open"), "cid");
        assert_eq!(err.kind(), ErrorKind::CircuitBreaker);
        assert!(!err.retryable());
    }

    #[test]
    fn test_unknown_default() {
        let err = classify(RawFailure::other("something odd"), "cid");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(!err.retryable());
        assert_eq!(err.correlation_id(), "cid");
    }

    #[test]
    fn test_http_message_without_body() {
        assert_eq!(RawFailure::http(500, "  ").message(), "HTTP 500");
        assert_eq!(RawFailure::http(500, "oops").message(), "HTTP 500: oops");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("30"), Some(30));
        assert_eq!(parse_retry_after(" 2.5 "), Some(3));
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("-4"), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(60)
        );
        let later = Utc.with_ymd_and_hms(2015, 10, 21, 8, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:28:00 GMT", later),
            Some(0)
        );
    }
}
