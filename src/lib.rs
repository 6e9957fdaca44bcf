//! # Retrieval Harness
//!
//! A resilient client for hosted retrieval pipelines.
//!
//! Retrieval Harness sends a question to a pipeline's retrieval endpoint and
//! returns the matching documents. Transient failures (network errors, rate
//! limits, 5xx responses) are retried with exponential backoff; everything
//! else fails fast with a classified, redacted error.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────┐   ┌──────────────────┐
//! │  Caller  │──▶│ RetrievalClient │──▶│ ResilienceExecutor│──▶ HTTP
//! │ (rtx/lib)│   │  validate/parse │   │ classify + backoff│
//! └──────────┘   └────────┬────────┘   └─────────┬────────┘
//!                         │                      │
//!                         ▼                      ▼
//!                  ┌─────────────────────────────────┐
//!                  │ RetrievalTelemetry (scrubbed)   │
//!                  │ StructuredLogger + MetricsSink  │
//!                  └─────────────────────────────────┘
//! ```
//!
//! Classification, redaction, and the retry loop live in the
//! `retrieval-harness-core` crate, which has no HTTP dependency.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`client`] | HTTP client, circuit gate, health check |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Query, document, and health types; response parsing |
//! | [`observability`] | Logger/metrics seams, scrubbing, `tracing` setup |
//! | [`retrieve`] | `rtx retrieve` / `rtx health` runners |

pub mod client;
pub mod config;
pub mod models;
pub mod observability;
pub mod retrieve;
