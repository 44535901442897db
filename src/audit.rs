//! Stage audit trail
//!
//! One record per validated boundary (request, each stage, response):
//! - how long it took and how validation went
//! - SHA-256 of the committed payload
//! - a chain hash linking it to the previous record of the same request
//!
//! Records never carry the payload itself, only its hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

/// How a boundary's validation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Valid on first try
    Valid,
    /// Valid after the single repair attempt
    Repaired,
    /// Still invalid (after repair, where repair applies)
    Invalid,
    ModelError,
    TimedOut,
    InternalError,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid => "valid",
            ValidationOutcome::Repaired => "repaired",
            ValidationOutcome::Invalid => "invalid",
            ValidationOutcome::ModelError => "model_error",
            ValidationOutcome::TimedOut => "timed_out",
            ValidationOutcome::InternalError => "internal_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ValidationOutcome::Valid | ValidationOutcome::Repaired)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAuditRecord {
    pub request_id: String,
    /// Stage name, or `request` / `response` for the outer boundaries
    pub stage: String,
    pub duration_ms: u64,
    pub outcome: ValidationOutcome,
    /// Violations seen on the first validation pass
    pub violation_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
    pub chain_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// Where audit records go
pub trait ObservabilitySink: Send + Sync {
    fn record(&self, record: &StageAuditRecord);
}

/// Emits each record as a structured tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record(&self, record: &StageAuditRecord) {
        if record.outcome.is_success() {
            tracing::info!(
                request_id = %record.request_id,
                stage = %record.stage,
                duration_ms = record.duration_ms,
                outcome = record.outcome.as_str(),
                violations = record.violation_count,
                chain = %record.chain_hash,
                "stage audited"
            );
        } else {
            tracing::warn!(
                request_id = %record.request_id,
                stage = %record.stage,
                duration_ms = record.duration_ms,
                outcome = record.outcome.as_str(),
                violations = record.violation_count,
                chain = %record.chain_hash,
                "stage audited"
            );
        }
    }
}

/// Keeps records in memory (tests, `--audit` output)
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<StageAuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StageAuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn for_request(&self, request_id: &str) -> Vec<StageAuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.request_id == request_id)
            .collect()
    }
}

impl ObservabilitySink for MemorySink {
    fn record(&self, record: &StageAuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Fans records out to several sinks
pub struct MultiSink {
    sinks: Vec<std::sync::Arc<dyn ObservabilitySink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn ObservabilitySink>>) -> Self {
        Self { sinks }
    }
}

impl ObservabilitySink for MultiSink {
    fn record(&self, record: &StageAuditRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

/// SHA-256 hex of arbitrary bytes
pub fn hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hash of a value's canonical JSON form
pub fn payload_hash<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_vec(value).ok().map(|bytes| hash(&bytes))
}

/// Per-request builder that links each record to the one before it
#[derive(Debug)]
pub struct AuditChain {
    request_id: String,
    last: String,
}

impl AuditChain {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let last = hash(request_id.as_bytes());
        Self { request_id, last }
    }

    pub fn head(&self) -> &str {
        &self.last
    }

    pub fn link(
        &mut self,
        stage: &str,
        duration_ms: u64,
        outcome: ValidationOutcome,
        violation_count: usize,
        payload_hash: Option<String>,
    ) -> StageAuditRecord {
        let link = format!(
            "{}|{}|{}|{}",
            self.last,
            stage,
            outcome.as_str(),
            payload_hash.as_deref().unwrap_or("-")
        );
        self.last = hash(link.as_bytes());

        StageAuditRecord {
            request_id: self.request_id.clone(),
            stage: stage.to_string(),
            duration_ms,
            outcome,
            violation_count,
            payload_hash,
            chain_hash: self.last.clone(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_stable_hex() {
        let h = hash(b"decision");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash(b"decision"));
        assert!(hex::decode(&h).is_ok());
    }

    #[test]
    fn test_payload_hash_tracks_content() {
        let a = payload_hash(&json!({"winner": "AWS"}));
        let b = payload_hash(&json!({"winner": "GCP"}));
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn test_chain_depends_on_history() {
        let mut first = AuditChain::new("req-1");
        let mut second = AuditChain::new("req-1");

        first.link("clarifier", 5, ValidationOutcome::Valid, 0, Some("aa".into()));
        let a = first.link("criteria_builder", 5, ValidationOutcome::Valid, 0, Some("bb".into()));

        second.link("clarifier", 5, ValidationOutcome::Repaired, 2, Some("aa".into()));
        let b = second.link("criteria_builder", 5, ValidationOutcome::Valid, 0, Some("bb".into()));

        assert_ne!(a.chain_hash, b.chain_hash);
        assert_eq!(first.head(), a.chain_hash);
    }

    #[test]
    fn test_memory_sink_filters_by_request() {
        let sink = MemorySink::new();
        let mut chain = AuditChain::new("req-1");
        sink.record(&chain.link("request", 1, ValidationOutcome::Valid, 0, None));
        let mut other = AuditChain::new("req-2");
        sink.record(&other.link("request", 1, ValidationOutcome::Invalid, 3, None));

        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.for_request("req-2")[0].violation_count, 3);
    }

    #[test]
    fn test_record_serializes_outcome_snake_case() {
        let mut chain = AuditChain::new("req-1");
        let record = chain.link("response", 0, ValidationOutcome::TimedOut, 0, None);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["outcome"], "timed_out");
        assert!(value.get("payload_hash").is_none());
    }
}
