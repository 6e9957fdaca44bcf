//! Request and response types for the retrieval endpoint.
//!
//! These types flow between the caller, the [`client`](crate::client), and
//! the wire. Nothing here outlives a single `retrieve()` call.

use retrieval_harness_core::{ClassifiedError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inclusive bounds for [`RetrievalQuery::num_results`].
pub const MIN_RESULTS: u32 = 1;
pub const MAX_RESULTS: u32 = 20;
pub const DEFAULT_RESULTS: u32 = 5;

/// A question to run against the retrieval pipeline.
///
/// Serializes to the wire body:
/// `{"question", "numResults", "rerank", "metadata-filters"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalQuery {
    pub question: String,
    #[serde(rename = "numResults")]
    pub num_results: u32,
    pub rerank: bool,
    #[serde(rename = "metadata-filters")]
    pub metadata_filters: Map<String, Value>,
}

impl RetrievalQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            num_results: DEFAULT_RESULTS,
            rerank: true,
            metadata_filters: Map::new(),
        }
    }

    pub fn with_num_results(mut self, n: u32) -> Self {
        self.num_results = n;
        self
    }

    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata_filters.insert(key.into(), value.into());
        self
    }

    /// Check the query before any network call.
    pub fn validate(&self, correlation_id: &str) -> Result<(), ClassifiedError> {
        if self.question.trim().is_empty() {
            return Err(ClassifiedError::new(
                ErrorKind::Validation,
                "question must not be empty",
                correlation_id,
            ));
        }
        if !(MIN_RESULTS..=MAX_RESULTS).contains(&self.num_results) {
            return Err(ClassifiedError::new(
                ErrorKind::Validation,
                format!(
                    "numResults must be between {MIN_RESULTS} and {MAX_RESULTS}, got {}",
                    self.num_results
                ),
                correlation_id,
            )
            .with_context("num_results", self.num_results));
        }
        Ok(())
    }
}

/// One retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub id: String,
    /// Relevance in `[0, 1]`.
    pub score: f64,
    pub text: String,
    pub source_metadata: Map<String, Value>,
}

/// Parsed retrieval response, results ordered by descending score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub results: Vec<RetrievedDocument>,
    pub count: usize,
    pub total: u64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(alias = "documents")]
    results: Vec<WireDocument>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default, alias = "processingTimeMs")]
    processing_time_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    relevancy: Option<f64>,
    #[serde(default)]
    similarity: Option<f64>,
    #[serde(default)]
    text: String,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl WireDocument {
    fn into_document(mut self) -> RetrievedDocument {
        let raw_score = self
            .score
            .or(self.relevancy)
            .or(self.similarity)
            .unwrap_or(0.0);
        let score = if raw_score.is_finite() {
            raw_score.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let id = match self.id {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        // Prefer an explicit metadata object; otherwise every unrecognized field.
        let source_metadata = match self
            .rest
            .remove("metadata")
            .or_else(|| self.rest.remove("source_metadata"))
        {
            Some(Value::Object(map)) => map,
            _ => self.rest,
        };

        RetrievedDocument {
            id,
            score,
            text: self.text,
            source_metadata,
        }
    }
}

/// Parse a 2xx response body.
///
/// `measured_ms` is used when the server does not report its own
/// processing time; `total` falls back to the number of results.
pub fn parse_response(body: &[u8], measured_ms: u64) -> serde_json::Result<RetrievalResult> {
    let wire: WireResponse = serde_json::from_slice(body)?;

    let mut results: Vec<RetrievedDocument> = wire
        .results
        .into_iter()
        .map(WireDocument::into_document)
        .collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    let count = results.len();
    Ok(RetrievalResult {
        results,
        count,
        total: wire.total.unwrap_or(count as u64),
        processing_time_ms: wire.processing_time_ms.unwrap_or(measured_ms),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Outcome of [`RetrievalClient::health_check`](crate::client::RetrievalClient::health_check).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sanitized endpoint.
    pub endpoint: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_wire_shape() {
        let q = RetrievalQuery::new("what is rust?")
            .with_num_results(3)
            .with_rerank(false)
            .with_filter("team", "infra");
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(
            v,
            json!({
                "question": "what is rust?",
                "numResults": 3,
                "rerank": false,
                "metadata-filters": {"team": "infra"},
            })
        );
    }

    #[test]
    fn test_query_defaults() {
        let q = RetrievalQuery::new("q");
        assert_eq!(q.num_results, 5);
        assert!(q.rerank);
        assert!(q.metadata_filters.is_empty());
    }

    #[test]
    fn test_validate_rejects_empty_question() {
        let err = RetrievalQuery::new("   ").validate("cid").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.retryable());
    }

    #[test]
    fn test_validate_num_results_bounds() {
        assert!(RetrievalQuery::new("q").with_num_results(1).validate("c").is_ok());
        assert!(RetrievalQuery::new("q").with_num_results(20).validate("c").is_ok());
        for n in [0, 21] {
            let err = RetrievalQuery::new("q")
                .with_num_results(n)
                .validate("c")
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn test_parse_sorts_by_score_desc() {
        let body = json!({
            "documents": [
                {"id": "a", "text": "A", "similarity": 0.4},
                {"id": "b", "text": "B", "similarity": 0.9},
                {"id": "c", "text": "C", "similarity": 0.7},
            ],
            "total": 41,
        });
        let r = parse_response(body.to_string().as_bytes(), 12).unwrap();
        let ids: Vec<&str> = r.results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(r.count, 3);
        assert_eq!(r.total, 41);
        assert_eq!(r.processing_time_ms, 12);
    }

    #[test]
    fn test_parse_prefers_relevancy_over_similarity() {
        let body = json!({
            "results": [
                {"id": 1, "text": "x", "relevancy": 0.2, "similarity": 0.95},
            ],
            "processingTimeMs": 88,
        });
        let r = parse_response(body.to_string().as_bytes(), 5).unwrap();
        assert_eq!(r.results[0].id, "1");
        assert_eq!(r.results[0].score, 0.2);
        assert_eq!(r.total, 1);
        assert_eq!(r.processing_time_ms, 88);
    }

    #[test]
    fn test_parse_clamps_scores() {
        let body = json!({"results": [
            {"id": "hi", "score": 1.7},
            {"id": "lo", "score": -0.3},
        ]});
        let r = parse_response(body.to_string().as_bytes(), 0).unwrap();
        assert_eq!(r.results[0].score, 1.0);
        assert_eq!(r.results[1].score, 0.0);
    }

    #[test]
    fn test_parse_source_metadata() {
        let body = json!({"results": [
            {"id": "m", "score": 0.5, "metadata": {"url": "https://x"}},
            {"id": "f", "score": 0.4, "source": "s3", "chunk_id": "7"},
        ]});
        let r = parse_response(body.to_string().as_bytes(), 0).unwrap();
        assert_eq!(r.results[0].source_metadata["url"], "https://x");
        assert_eq!(r.results[1].source_metadata["source"], "s3");
        assert_eq!(r.results[1].source_metadata["chunk_id"], "7");
    }

    #[test]
    fn test_parse_rejects_missing_results() {
        assert!(parse_response(br#"{"total": 3}"#, 0).is_err());
        assert!(parse_response(b"not json", 0).is_err());
    }

    #[test]
    fn test_health_status_serialization() {
        let h = HealthStatus {
            status: HealthState::Unhealthy,
            duration_ms: None,
            error: Some("server error: HTTP 500".into()),
            endpoint: "https://x/org/***/pipelines/***/retrieval".into(),
        };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v["status"], "unhealthy");
        assert!(v.get("duration_ms").is_none());
    }
}
