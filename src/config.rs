//! TOML configuration.
//!
//! ```toml
//! [retrieval]
//! base_uri = "https://api.vectorize.io/v1"
//! org_id = "org-123"
//! pipeline_id = "pipe-456"
//! # api_key = "..."            # or set RETRIEVAL_API_KEY
//! timeout_ms = 10000
//! retry_attempts = 2
//! retry_delay_ms = 1000
//! num_results_default = 5
//!
//! [logging]
//! format = "json"
//! filter = "info"
//! ```
//!
//! [`load_config`] is the only place bounds are checked. The client trusts
//! the values it is handed.

use anyhow::{bail, Context, Result};
use retrieval_harness_core::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted when `retrieval.api_key` is not set.
pub const API_KEY_ENV: &str = "RETRIEVAL_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and retry settings for the retrieval endpoint.
#[derive(Deserialize, Clone)]
pub struct RetrievalConfig {
    pub base_uri: String,
    pub org_id: String,
    pub pipeline_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt; total attempts = `retry_attempts + 1`.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_num_results")]
    pub num_results_default: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Cap on total time spent across attempts and backoff. Unset = no cap.
    #[serde(default)]
    pub retry_budget_ms: Option<u64>,
}

// Hand-written so the API key never reaches logs via `{:?}`.
impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("base_uri", &self.base_uri)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("num_results_default", &self.num_results_default)
            .field("user_agent", &self.user_agent)
            .field("jitter_fraction", &self.jitter_fraction)
            .field("retry_budget_ms", &self.retry_budget_ms)
            .finish_non_exhaustive()
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_num_results() -> u32 {
    5
}
fn default_user_agent() -> String {
    format!("retrieval-harness/{}", env!("CARGO_PKG_VERSION"))
}
fn default_jitter_fraction() -> f64 {
    0.05
}

impl RetrievalConfig {
    /// Minimal config for the given endpoint, with defaults for everything else.
    pub fn new(
        base_uri: impl Into<String>,
        org_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_uri: base_uri.into(),
            org_id: org_id.into(),
            pipeline_id: pipeline_id.into(),
            api_key: Some(api_key.into()),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            num_results_default: default_num_results(),
            user_agent: default_user_agent(),
            jitter_fraction: default_jitter_fraction(),
            retry_budget_ms: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts.saturating_add(1),
            Duration::from_millis(self.retry_delay_ms),
        )
        .with_jitter_fraction(self.jitter_fraction)
        .with_max_elapsed(self.retry_budget_ms.map(Duration::from_millis))
    }

    /// Full retrieval URL, with raw identifiers. Never log this.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/org/{}/pipelines/{}/retrieval",
            self.base_uri.trim_end_matches('/'),
            self.org_id,
            self.pipeline_id
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// `tracing` env-filter directive.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_log_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate config text. API key falls back to [`API_KEY_ENV`].
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.api_key.as_deref().map_or(true, str::is_empty) {
        config.retrieval.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;

    let base = r.base_uri.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        bail!("retrieval.base_uri must start with http:// or https://");
    }
    if r.org_id.trim().is_empty() {
        bail!("retrieval.org_id must not be empty");
    }
    if r.pipeline_id.trim().is_empty() {
        bail!("retrieval.pipeline_id must not be empty");
    }
    if r.api_key.is_none() {
        bail!(
            "retrieval.api_key is not set and {} is not in the environment",
            API_KEY_ENV
        );
    }

    if !(1_000..=30_000).contains(&r.timeout_ms) {
        bail!("retrieval.timeout_ms must be in [1000, 30000]");
    }
    if r.retry_attempts > 5 {
        bail!("retrieval.retry_attempts must be in [0, 5]");
    }
    if !(100..=10_000).contains(&r.retry_delay_ms) {
        bail!("retrieval.retry_delay_ms must be in [100, 10000]");
    }
    if !(1..=20).contains(&r.num_results_default) {
        bail!("retrieval.num_results_default must be in [1, 20]");
    }
    if r.user_agent.trim().is_empty() {
        bail!("retrieval.user_agent must not be empty");
    }
    if !(0.0..0.1).contains(&r.jitter_fraction) {
        bail!("retrieval.jitter_fraction must be in [0.0, 0.1)");
    }
    if r.retry_budget_ms == Some(0) {
        bail!("retrieval.retry_budget_ms must be > 0 when set");
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => bail!(
            "Unknown logging.format: '{}'. Must be pretty or json.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml(extra: &str) -> String {
        format!(
            r#"[retrieval]
base_uri = "https://api.example.com/v1"
org_id = "org-123"
pipeline_id = "pipe-456"
api_key = "secret-key"
{extra}
"#
        )
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = parse_config(&base_toml("")).unwrap();
        assert_eq!(cfg.retrieval.timeout_ms, 10_000);
        assert_eq!(cfg.retrieval.retry_attempts, 2);
        assert_eq!(cfg.retrieval.num_results_default, 5);
        assert!(cfg.retrieval.user_agent.starts_with("retrieval-harness/"));
        assert_eq!(cfg.logging.format, "pretty");
    }

    #[test]
    fn test_retry_policy_counts_first_attempt() {
        let cfg = parse_config(&base_toml("retry_attempts = 0\nretry_delay_ms = 250")).unwrap();
        let policy = cfg.retrieval.retry_policy();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.base_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_endpoint_url_trims_slash() {
        let mut cfg = parse_config(&base_toml("")).unwrap();
        cfg.retrieval.base_uri = "https://api.example.com/v1/".to_string();
        assert_eq!(
            cfg.retrieval.endpoint_url(),
            "https://api.example.com/v1/org/org-123/pipelines/pipe-456/retrieval"
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        for extra in [
            "timeout_ms = 999",
            "timeout_ms = 30001",
            "retry_attempts = 6",
            "retry_delay_ms = 50",
            "num_results_default = 21",
            "num_results_default = 0",
            "jitter_fraction = 0.1",
        ] {
            let err = parse_config(&base_toml(extra)).unwrap_err();
            assert!(err.to_string().contains("retrieval."), "{extra}: {err}");
        }
    }

    #[test]
    fn test_bad_base_uri_rejected() {
        let toml = base_toml("").replace("https://api.example.com/v1", "ftp://x");
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let cfg = parse_config(&base_toml("")).unwrap();
        let dbg = format!("{:?}", cfg.retrieval);
        assert!(!dbg.contains("secret-key"));
        assert!(!dbg.contains("org-123"));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let toml = format!("{}\n[logging]\nformat = \"xml\"\n", base_toml(""));
        assert!(parse_config(&toml).is_err());
    }
}
