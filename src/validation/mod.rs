//! Contract validation
//!
//! Every payload crossing a boundary (inbound request, each stage output,
//! outbound response) is checked twice:
//! - structurally, against a JSON Schema compiled once at startup
//! - semantically, against what the run already knows (options, criteria)
//!
//! Failures come back as a list of `Violation`s, never as a panic.

pub mod contracts;
pub mod repair;

use crate::config::RequestLimits;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use contracts::ContractName;
pub use repair::{RepairError, Repairer};

/// Offending values are cut to this many characters
pub const MAX_FOUND_CHARS: usize = 200;

/// One contract breach: where, why and (briefly) what was found
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    /// JSON pointer into the payload; empty for the document root
    pub path: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<Value>,
}

impl Violation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
            found: None,
        }
    }

    pub fn with_found(mut self, found: &Value) -> Self {
        self.found = Some(truncate_value(found));
        self
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "(root)" } else { &self.path };
        match &self.found {
            Some(found) => write!(f, "{}: {} (found: {})", path, self.reason, found),
            None => write!(f, "{}: {}", path, self.reason),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut cut: String = s.chars().take(max).collect();
        cut.push('…');
        cut
    }
}

fn truncate_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_chars(s, MAX_FOUND_CHARS)),
        Value::Array(_) | Value::Object(_) => {
            let rendered = value.to_string();
            if rendered.chars().count() <= MAX_FOUND_CHARS {
                value.clone()
            } else {
                Value::String(truncate_chars(&rendered, MAX_FOUND_CHARS))
            }
        }
        other => other.clone(),
    }
}

/// What the run already knows, for checks a schema cannot express
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expectations {
    /// Input options in caller order
    pub options: Vec<String>,
    /// Committed criterion names in committed order
    pub criteria: Vec<String>,
}

impl Expectations {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_options(options: &[String]) -> Self {
        Self {
            options: options.to_vec(),
            criteria: Vec::new(),
        }
    }

    pub fn criteria(mut self, criteria: Vec<String>) -> Self {
        self.criteria = criteria;
        self
    }
}

/// Compiled schemas for every contract
pub struct ContractValidator {
    compiled: Vec<(ContractName, Value, jsonschema::Validator)>,
    limits: RequestLimits,
}

impl ContractValidator {
    pub fn new(limits: &RequestLimits) -> Result<Self> {
        let mut compiled = Vec::with_capacity(ContractName::ALL.len());
        for contract in ContractName::ALL {
            let schema = contract.schema(limits);
            let validator = jsonschema::validator_for(&schema).map_err(|e| {
                anyhow::anyhow!("contract {} has an invalid schema: {}", contract.as_str(), e)
            })?;
            compiled.push((contract, schema, validator));
        }
        Ok(Self {
            compiled,
            limits: limits.clone(),
        })
    }

    fn entry(&self, contract: ContractName) -> &(ContractName, Value, jsonschema::Validator) {
        // Built for every variant of ContractName::ALL, in order
        &self.compiled[contract.index()]
    }

    /// The JSON Schema handed to the repair prompt
    pub fn schema(&self, contract: ContractName) -> &Value {
        &self.entry(contract).1
    }

    pub fn validate(
        &self,
        contract: ContractName,
        payload: &Value,
        expect: &Expectations,
    ) -> std::result::Result<(), Vec<Violation>> {
        if let Value::String(_) = payload {
            return Err(vec![Violation::new("", "output is not a JSON document")]);
        }

        let (_, _, validator) = self.entry(contract);
        let structural: Vec<Violation> = validator
            .iter_errors(payload)
            .map(|e| {
                let path = e.instance_path.to_string();
                let violation = Violation::new(path.clone(), truncate_chars(&e.to_string(), MAX_FOUND_CHARS));
                match payload.pointer(&path) {
                    Some(found) if !path.is_empty() => violation.with_found(found),
                    _ => violation,
                }
            })
            .collect();
        if !structural.is_empty() {
            return Err(structural);
        }

        let semantic = contracts::semantic_violations(contract, payload, expect, &self.limits);
        if semantic.is_empty() {
            Ok(())
        } else {
            Err(semantic)
        }
    }
}

/// Parse model text into JSON, tolerating code fences and surrounding prose.
/// Returns `None` when no JSON document can be recovered.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = strip_fences(text.trim());
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find(|c: char| c == '{' || c == '[')?;
    let end = trimmed.rfind(|c: char| c == '}' || c == ']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> ContractValidator {
        ContractValidator::new(&RequestLimits::default()).unwrap()
    }

    #[test]
    fn test_extract_plain_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "```json\n{\"is_sufficient\": true}\n```";
        assert_eq!(extract_json(text), Some(json!({"is_sufficient": true})));
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Here you go:\n{\"criteria\": []}\nHope that helps.";
        assert_eq!(extract_json(text), Some(json!({"criteria": []})));
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert_eq!(extract_json("I cannot answer that."), None);
    }

    #[test]
    fn test_found_is_truncated() {
        let long = "x".repeat(500);
        let v = Violation::new("/a", "too long").with_found(&json!(long));
        let found = v.found.unwrap();
        assert_eq!(found.as_str().unwrap().chars().count(), MAX_FOUND_CHARS + 1);
    }

    #[test]
    fn test_structural_violation_has_path_and_found() {
        let payload = json!({
            "bias_findings": [{"type": "anchoring", "description": "d", "evidence": "e"}]
        });
        let violations = validator()
            .validate(ContractName::BiasOutput, &payload, &Expectations::none())
            .unwrap_err();
        assert_eq!(violations[0].path, "/bias_findings/0/type");
        assert_eq!(violations[0].found, Some(json!("anchoring")));
    }

    #[test]
    fn test_non_json_is_single_root_violation() {
        let violations = validator()
            .validate(
                ContractName::ClarifierOutput,
                &Value::String("sorry".into()),
                &Expectations::none(),
            )
            .unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "");
    }

    #[test]
    fn test_violation_display() {
        assert_eq!(Violation::new("", "not JSON").to_string(), "(root): not JSON");
        assert_eq!(
            Violation::new("/x", "bad").with_found(&json!(2)).to_string(),
            "/x: bad (found: 2)"
        );
    }
}
