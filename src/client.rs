//! HTTP client for a hosted retrieval pipeline.
//!
//! [`RetrievalClient::retrieve`] sends one question to
//! `POST {base_uri}/org/{org_id}/pipelines/{pipeline_id}/retrieval` and
//! returns the parsed documents. All failure handling is delegated to the
//! core crate: each attempt's failure is described as a
//! [`RawFailure`], classified, and retried by the [`ResilienceExecutor`]
//! according to the configured [`RetryPolicy`](retrieval_harness_core::RetryPolicy).
//!
//! # Headers
//!
//! | Header | Value |
//! |--------|-------|
//! | `Authorization` | `Bearer <api_key>` |
//! | `Content-Type` | `application/json` |
//! | `User-Agent` | `retrieval.user_agent` |
//! | `X-Correlation-ID` | caller's correlation id |
//!
//! # Telemetry
//!
//! Every log event and metric goes through [`RetrievalTelemetry`], so the
//! raw org/pipeline identifiers and the API key never reach the injected
//! logger or metrics sink.
//!
//! # Example
//!
//! ```rust,no_run
//! use retrieval_harness::client::RetrievalClient;
//! use retrieval_harness::config::RetrievalConfig;
//! use retrieval_harness::models::RetrievalQuery;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RetrievalConfig::new("https://api.example.com/v1", "org-123", "pipe-456", "key");
//! let client = RetrievalClient::builder(config).build()?;
//! let result = client
//!     .retrieve(&RetrievalQuery::new("How do I rotate keys?"), "req-1")
//!     .await?;
//! println!("{} documents", result.count);
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use retrieval_harness_core::{
    classify, parse_retry_after, ClassifiedError, ConnectCode, JitterSource, RandomJitter,
    RawFailure, ResilienceExecutor,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RetrievalConfig;
use crate::models::{
    parse_response, HealthState, HealthStatus, RetrievalQuery, RetrievalResult,
};
use crate::observability::{
    sanitize_endpoint, LogLevel, MetricsSink, RetrievalTelemetry, Scrubber, StructuredLogger,
    TracingLogger, TracingMetrics,
};

/// Request header carrying the caller's correlation id.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

const HEALTH_CHECK_QUESTION: &str = "health check";

// Error bodies beyond this are cut before classification and logging.
const MAX_ERROR_BODY_CHARS: usize = 2048;

/// A caller-owned circuit breaker, consulted before every attempt.
///
/// When it reports open, the attempt fails with the `CircuitBreaker` kind
/// and no request is sent.
#[async_trait]
pub trait CircuitGate: Send + Sync {
    async fn is_open(&self) -> bool;
}

/// Builder for [`RetrievalClient`]. Collaborators default to `tracing`-backed
/// telemetry, random jitter, and no circuit breaker.
pub struct RetrievalClientBuilder {
    config: RetrievalConfig,
    logger: Arc<dyn StructuredLogger>,
    metrics: Arc<dyn MetricsSink>,
    jitter: Arc<dyn JitterSource>,
    circuit: Option<Arc<dyn CircuitGate>>,
    http: Option<reqwest::Client>,
}

impl RetrievalClientBuilder {
    pub fn logger(mut self, logger: Arc<dyn StructuredLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn circuit_breaker(mut self, gate: Arc<dyn CircuitGate>) -> Self {
        self.circuit = Some(gate);
        self
    }

    /// Use a preconfigured `reqwest` client (proxies, TLS roots).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is configured or the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<RetrievalClient> {
        let config = self.config;
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("retrieval.api_key required"))?;

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .connect_timeout(config.timeout())
                .build()?,
        };

        let scrubber = Scrubber::new(
            [config.org_id.clone(), config.pipeline_id.clone()],
            [api_key.clone()],
        );
        let telemetry = Arc::new(RetrievalTelemetry::new(
            self.logger,
            self.metrics,
            scrubber,
            sanitize_endpoint(&config.base_uri),
        ));
        let executor = ResilienceExecutor::new(config.retry_policy())
            .with_jitter(self.jitter)
            .with_observer(telemetry.clone());

        Ok(RetrievalClient {
            http,
            url: config.endpoint_url(),
            api_key,
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            executor,
            telemetry,
            circuit: self.circuit,
        })
    }
}

/// Resilient client for one retrieval pipeline.
///
/// Holds only immutable state; share it behind an `Arc` and call
/// [`retrieve`](Self::retrieve) from as many tasks as needed.
pub struct RetrievalClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    user_agent: String,
    timeout: Duration,
    executor: ResilienceExecutor,
    telemetry: Arc<RetrievalTelemetry>,
    circuit: Option<Arc<dyn CircuitGate>>,
}

impl RetrievalClient {
    pub fn builder(config: RetrievalConfig) -> RetrievalClientBuilder {
        RetrievalClientBuilder {
            config,
            logger: Arc::new(TracingLogger),
            metrics: Arc::new(TracingMetrics),
            jitter: Arc::new(RandomJitter),
            circuit: None,
            http: None,
        }
    }

    /// Sanitized endpoint, safe to display.
    pub fn endpoint(&self) -> &str {
        self.telemetry.endpoint()
    }

    /// Retrieve documents for `query`.
    ///
    /// The query is validated first; an invalid query fails with
    /// `Validation` without touching the network. Otherwise the request is
    /// attempted under the retry policy and the final outcome is logged
    /// before it is returned.
    pub async fn retrieve(
        &self,
        query: &RetrievalQuery,
        correlation_id: &str,
    ) -> Result<RetrievalResult, ClassifiedError> {
        if let Err(err) = query.validate(correlation_id) {
            self.telemetry.emit(
                "retrieval.request.invalid",
                LogLevel::Warn,
                json!({ "error": err.to_safe_json() }),
                correlation_id,
            );
            return Err(err);
        }

        self.telemetry.emit(
            "retrieval.request.start",
            LogLevel::Info,
            json!({
                "num_results": query.num_results,
                "rerank": query.rerank,
                "question_chars": query.question.chars().count(),
                "filter_count": query.metadata_filters.len(),
            }),
            correlation_id,
        );

        let started = Instant::now();
        let body = match serde_json::to_vec(query) {
            Ok(body) => body,
            Err(e) => {
                let err = classify(
                    RawFailure::other(format!("failed to encode request body: {e}")),
                    correlation_id,
                );
                self.log_failure(&err, started.elapsed());
                return Err(err);
            }
        };

        let outcome = self
            .executor
            .execute(correlation_id, self.timeout, |_| {
                self.send_once(&body, correlation_id)
            })
            .await;

        match outcome {
            Ok(result) => {
                self.telemetry.emit(
                    "retrieval.request.success",
                    LogLevel::Info,
                    json!({
                        "count": result.count,
                        "total": result.total,
                        "processing_time_ms": result.processing_time_ms,
                        "duration_ms": started.elapsed().as_millis() as u64,
                    }),
                    correlation_id,
                );
                Ok(result)
            }
            Err(err) => {
                self.log_failure(&err, started.elapsed());
                Err(err)
            }
        }
    }

    /// Probe the endpoint with a one-result, no-rerank query.
    ///
    /// Never fails: any error is reported as [`HealthState::Unhealthy`]
    /// with its redacted message.
    pub async fn health_check(&self, correlation_id: &str) -> HealthStatus {
        let query = RetrievalQuery::new(HEALTH_CHECK_QUESTION)
            .with_num_results(1)
            .with_rerank(false);

        let started = Instant::now();
        let outcome = self.retrieve(&query, correlation_id).await;
        let duration_ms = Some(started.elapsed().as_millis() as u64);

        let status = match outcome {
            Ok(_) => HealthStatus {
                status: HealthState::Healthy,
                duration_ms,
                error: None,
                endpoint: self.endpoint().to_string(),
            },
            Err(err) => HealthStatus {
                status: HealthState::Unhealthy,
                duration_ms,
                error: Some(self.telemetry.scrub_str(&err.to_string())),
                endpoint: self.endpoint().to_string(),
            },
        };

        let level = if status.is_healthy() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        self.telemetry.emit(
            "retrieval.health.result",
            level,
            serde_json::to_value(&status).unwrap_or(Value::Null),
            correlation_id,
        );
        status
    }

    fn log_failure(&self, err: &ClassifiedError, elapsed: Duration) {
        self.telemetry.emit(
            "retrieval.request.failed",
            LogLevel::Error,
            json!({
                "error": err.to_safe_json(),
                "duration_ms": elapsed.as_millis() as u64,
            }),
            err.correlation_id(),
        );
    }

    /// One HTTP attempt. Failures are described, not classified.
    async fn send_once(
        &self,
        body: &[u8],
        correlation_id: &str,
    ) -> Result<RetrievalResult, RawFailure> {
        if let Some(circuit) = &self.circuit {
            if circuit.is_open().await {
                return Err(RawFailure::circuit_open(
                    "circuit breaker is open for the retrieval endpoint",
                ));
            }
        }

        let started = Instant::now();
        let sent = self
            .http
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, self.user_agent.as_str())
            .header(CORRELATION_HEADER, correlation_id)
            .body(body.to_vec())
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.telemetry.record_call(started.elapsed(), None, 0);
                return Err(raw_failure_from_reqwest(e));
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) if status.is_success() => {
                self.telemetry
                    .record_call(started.elapsed(), Some(status.as_u16()), 0);
                return Err(raw_failure_from_reqwest(e));
            }
            // Error bodies are best-effort.
            Err(_) => Default::default(),
        };

        let elapsed = started.elapsed();
        self.telemetry
            .record_call(elapsed, Some(status.as_u16()), bytes.len() as u64);

        if status.is_success() {
            return parse_response(&bytes, elapsed.as_millis() as u64).map_err(|e| {
                RawFailure::other(format!("unexpected response body: {e}"))
                    .with_context("status", status.as_u16())
            });
        }

        let text = String::from_utf8_lossy(&bytes);
        let retry_after = retry_after.or_else(|| retry_after_from_body(&text));
        Err(RawFailure::http(status.as_u16(), truncate_chars(&text, MAX_ERROR_BODY_CHARS))
            .with_retry_after(retry_after))
    }
}

/// Describe a transport error for the classifier.
///
/// The URL is stripped from the message; connect failures are mapped to a
/// [`ConnectCode`] from the underlying I/O error or resolver message.
fn raw_failure_from_reqwest(err: reqwest::Error) -> RawFailure {
    let err = err.without_url();
    let message = error_chain_message(&err);

    if err.is_timeout() {
        return RawFailure::timed_out(message);
    }
    if let Some(code) = connect_code(&err, &message) {
        return RawFailure::connect(code, message);
    }
    if err.is_builder() {
        return RawFailure::other(format!("invalid request configuration: {message}"));
    }
    RawFailure::other(message)
}

fn error_chain_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(e) = source {
        let text = e.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = e.source();
    }
    parts.join(": ")
}

fn connect_code(err: &reqwest::Error, message: &str) -> Option<ConnectCode> {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return Some(ConnectCode::ConnectionRefused)
                }
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => return Some(ConnectCode::ConnectionReset),
                _ => {}
            }
        }
        source = e.source();
    }

    let lower = message.to_lowercase();
    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
    {
        return Some(ConnectCode::DnsNotFound);
    }
    if lower.contains("connection refused") {
        return Some(ConnectCode::ConnectionRefused);
    }
    if lower.contains("connection reset") {
        return Some(ConnectCode::ConnectionReset);
    }
    if err.is_connect() {
        return Some(ConnectCode::Unreachable);
    }
    None
}

/// Extract a `retry_after` hint from a JSON error body, if any.
fn retry_after_from_body(text: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    let find = |v: &Value| -> Option<u64> {
        ["retry_after", "retryAfter", "retry_after_seconds"]
            .iter()
            .find_map(|k| v.get(*k))
            .and_then(|hint| match hint {
                Value::Number(n) => n
                    .as_u64()
                    .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64)),
                Value::String(s) => parse_retry_after(s),
                _ => None,
            })
    };
    find(&value).or_else(|| value.get("error").and_then(find))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
