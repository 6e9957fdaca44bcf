//! Structured telemetry for retrieval calls.
//!
//! The client never talks to a logging or metrics backend directly. It is
//! handed a [`StructuredLogger`] and a [`MetricsSink`] at construction and
//! routes everything through [`RetrievalTelemetry`], which:
//!
//! - turns executor events into named log events (`retrieval.attempt.*`,
//!   `retrieval.retry.scheduled`),
//! - scrubs every payload: credentials are redacted and the raw org and
//!   pipeline identifiers are replaced with [`ID_PLACEHOLDER`],
//! - stamps the sanitized endpoint on every event and metric.
//!
//! [`TracingLogger`] and [`TracingMetrics`] forward to `tracing`; use
//! [`init_tracing`] in binaries to install a subscriber.

use anyhow::Result;
use retrieval_harness_core::{
    redact, redact_value, AttemptObserver, ResilienceEvent, REDACTION_MASK,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Replaces tenant identifiers in telemetry.
pub const ID_PLACEHOLDER: &str = "***";

/// Environment variable overriding `logging.filter`.
pub const LOG_ENV: &str = "RTX_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for named, structured log events.
///
/// Called from every in-flight request; implementations must be cheap and
/// must not block.
pub trait StructuredLogger: Send + Sync {
    fn log(&self, event: &str, level: LogLevel, payload: &Value, correlation_id: &str);
}

/// One HTTP call, as reported to the metrics backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiCallMetric {
    /// Sanitized endpoint.
    pub endpoint: String,
    pub duration_ms: u64,
    /// `None` when no response was received.
    pub status_code: Option<u16>,
    pub response_size_bytes: u64,
}

/// Fire-and-forget metrics sink.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: ApiCallMetric);
}

/// Forwards events to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl StructuredLogger for TracingLogger {
    fn log(&self, event: &str, level: LogLevel, payload: &Value, correlation_id: &str) {
        match level {
            LogLevel::Debug => {
                tracing::debug!(event, correlation_id, payload = %payload, "{event}")
            }
            LogLevel::Info => {
                tracing::info!(event, correlation_id, payload = %payload, "{event}")
            }
            LogLevel::Warn => {
                tracing::warn!(event, correlation_id, payload = %payload, "{event}")
            }
            LogLevel::Error => {
                tracing::error!(event, correlation_id, payload = %payload, "{event}")
            }
        }
    }
}

/// Emits each metric as a debug-level `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, metric: ApiCallMetric) {
        tracing::debug!(
            target: "retrieval_harness::metrics",
            endpoint = %metric.endpoint,
            duration_ms = metric.duration_ms,
            status_code = ?metric.status_code,
            response_size_bytes = metric.response_size_bytes,
            "api_call"
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _metric: ApiCallMetric) {}
}

/// Install a global `tracing` subscriber from the logging config.
///
/// `RTX_LOG` takes precedence over `logging.filter`.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// The retrieval URL with org and pipeline replaced by [`ID_PLACEHOLDER`].
///
/// Userinfo and query string are dropped from the base URI.
pub fn sanitize_endpoint(base_uri: &str) -> String {
    let raw = base_uri.trim();
    let base = match reqwest::Url::parse(raw) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if url.set_username("").is_err() || url.set_password(None).is_err() {
                redact(&strip_userinfo(raw))
            } else {
                url.set_query(None);
                url.set_fragment(None);
                url.to_string()
            }
        }
        _ => redact(&strip_userinfo(raw)),
    };
    format!(
        "{}/org/{ID_PLACEHOLDER}/pipelines/{ID_PLACEHOLDER}/retrieval",
        base.trim_end_matches('/')
    )
}

/// Drop `user:pass@` from the authority of a URI-like string.
fn strip_userinfo(raw: &str) -> String {
    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, raw),
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let rest = match rest[..authority_end].rfind('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    };
    match scheme {
        Some(scheme) => format!("{scheme}://{rest}"),
        None => rest.to_string(),
    }
}

/// Masks known identifiers and secrets in strings and JSON payloads.
#[derive(Debug, Clone, Default)]
pub struct Scrubber {
    identifiers: Vec<String>,
    secrets: Vec<String>,
}

impl Scrubber {
    pub fn new(
        identifiers: impl IntoIterator<Item = String>,
        secrets: impl IntoIterator<Item = String>,
    ) -> Self {
        let prepare = |items: Vec<String>| {
            let mut items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
            // Longest first so an identifier containing another is masked whole.
            items.sort_by_key(|s| std::cmp::Reverse(s.len()));
            items.dedup();
            items
        };
        Self {
            identifiers: prepare(identifiers.into_iter().collect()),
            secrets: prepare(secrets.into_iter().collect()),
        }
    }

    pub fn scrub_str(&self, text: &str) -> String {
        let mut out = redact(text);
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), REDACTION_MASK);
        }
        for id in &self.identifiers {
            out = out.replace(id.as_str(), ID_PLACEHOLDER);
        }
        out
    }

    pub fn scrub(&self, value: &Value) -> Value {
        self.scrub_strings(redact_value(value))
    }

    fn scrub_strings(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.scrub_str(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.scrub_strings(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (self.scrub_str(&k), self.scrub_strings(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Telemetry emitter bound to one client's endpoint.
#[derive(Clone)]
pub struct RetrievalTelemetry {
    logger: Arc<dyn StructuredLogger>,
    metrics: Arc<dyn MetricsSink>,
    scrubber: Scrubber,
    endpoint: String,
}

impl RetrievalTelemetry {
    /// `endpoint` is scrubbed too, in case an identifier appears in the
    /// base URI itself.
    pub fn new(
        logger: Arc<dyn StructuredLogger>,
        metrics: Arc<dyn MetricsSink>,
        scrubber: Scrubber,
        endpoint: String,
    ) -> Self {
        let endpoint = scrubber.scrub_str(&endpoint);
        Self {
            logger,
            metrics,
            scrubber,
            endpoint,
        }
    }

    /// Sanitized endpoint stamped on all events.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Scrub free text with this client's identifiers and secrets.
    pub fn scrub_str(&self, text: &str) -> String {
        self.scrubber.scrub_str(text)
    }

    /// Scrub `payload`, add the endpoint, and hand it to the logger.
    pub fn emit(&self, event: &str, level: LogLevel, payload: Value, correlation_id: &str) {
        let mut payload = self.scrubber.scrub(&payload);
        match payload.as_object_mut() {
            Some(map) => {
                map.insert("endpoint".to_string(), json!(self.endpoint));
            }
            None => {
                payload = json!({ "endpoint": self.endpoint, "value": payload });
            }
        }
        self.logger.log(event, level, &payload, correlation_id);
    }

    /// Report one HTTP call to the metrics sink.
    pub fn record_call(&self, duration: Duration, status_code: Option<u16>, size: u64) {
        self.metrics.record(ApiCallMetric {
            endpoint: self.endpoint.clone(),
            duration_ms: duration.as_millis() as u64,
            status_code,
            response_size_bytes: size,
        });
    }
}

impl AttemptObserver for RetrievalTelemetry {
    fn on_event(&self, event: &ResilienceEvent<'_>) {
        let cid = event.correlation_id();
        match event {
            ResilienceEvent::AttemptStarted {
                attempt,
                max_attempts,
                ..
            } => self.emit(
                "retrieval.attempt.start",
                LogLevel::Debug,
                json!({ "attempt": attempt, "max_attempts": max_attempts }),
                cid,
            ),
            ResilienceEvent::AttemptSucceeded { record, .. } => self.emit(
                "retrieval.attempt.success",
                LogLevel::Debug,
                json!({
                    "attempt": record.attempt_number,
                    "started_at": record.started_at.to_rfc3339(),
                    "elapsed_ms": record.elapsed.as_millis() as u64,
                }),
                cid,
            ),
            ResilienceEvent::RetryScheduled { record, error, .. } => self.emit(
                "retrieval.retry.scheduled",
                LogLevel::Warn,
                json!({
                    "attempt": record.attempt_number,
                    "elapsed_ms": record.elapsed.as_millis() as u64,
                    "delay_ms": record.delay_before_next.map(|d| d.as_millis() as u64),
                    "reason": error.kind(),
                    "error": error.to_safe_json(),
                }),
                cid,
            ),
            ResilienceEvent::AttemptFailed {
                record,
                error,
                reason,
                ..
            } => self.emit(
                "retrieval.attempt.failed",
                LogLevel::Error,
                json!({
                    "attempt": record.attempt_number,
                    "elapsed_ms": record.elapsed.as_millis() as u64,
                    "stop_reason": reason.as_str(),
                    "error": error.to_safe_json(),
                }),
                cid,
            ),
        }
    }
}
