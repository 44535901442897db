//! Contract definitions
//!
//! Each contract is a JSON Schema plus a handful of semantic rules the
//! schema language cannot express (distinct options, full coverage of
//! the criteria grid, winner membership).

use super::{Expectations, Violation};
use crate::config::RequestLimits;
use crate::state::StageName;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Every validated boundary in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractName {
    DecisionRequest,
    ClarifierOutput,
    CriteriaOutput,
    BiasOutput,
    EvaluationOutput,
    /// Narrative part of the synthesizer output; numbers are computed locally
    SynthesisOutput,
    DecisionResponse,
    ClarificationResponse,
}

impl ContractName {
    pub const ALL: [ContractName; 8] = [
        ContractName::DecisionRequest,
        ContractName::ClarifierOutput,
        ContractName::CriteriaOutput,
        ContractName::BiasOutput,
        ContractName::EvaluationOutput,
        ContractName::SynthesisOutput,
        ContractName::DecisionResponse,
        ContractName::ClarificationResponse,
    ];

    /// Position in `ALL`
    pub fn index(self) -> usize {
        match self {
            ContractName::DecisionRequest => 0,
            ContractName::ClarifierOutput => 1,
            ContractName::CriteriaOutput => 2,
            ContractName::BiasOutput => 3,
            ContractName::EvaluationOutput => 4,
            ContractName::SynthesisOutput => 5,
            ContractName::DecisionResponse => 6,
            ContractName::ClarificationResponse => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractName::DecisionRequest => "decision_request",
            ContractName::ClarifierOutput => "clarifier_output",
            ContractName::CriteriaOutput => "criteria_output",
            ContractName::BiasOutput => "bias_output",
            ContractName::EvaluationOutput => "evaluation_output",
            ContractName::SynthesisOutput => "synthesis_output",
            ContractName::DecisionResponse => "decision_response",
            ContractName::ClarificationResponse => "clarification_response",
        }
    }

    pub fn for_stage(stage: StageName) -> ContractName {
        match stage {
            StageName::Clarifier => ContractName::ClarifierOutput,
            StageName::CriteriaBuilder => ContractName::CriteriaOutput,
            StageName::BiasChecker => ContractName::BiasOutput,
            StageName::OptionEvaluator => ContractName::EvaluationOutput,
            StageName::DecisionSynthesizer => ContractName::SynthesisOutput,
        }
    }

    pub fn schema(self, limits: &RequestLimits) -> Value {
        match self {
            ContractName::DecisionRequest => request_schema(limits),
            ContractName::ClarifierOutput => json!({
                "type": "object",
                "required": ["is_sufficient", "missing_fields", "questions"],
                "properties": {
                    "is_sufficient": {"type": "boolean"},
                    "missing_fields": string_list(),
                    "questions": string_list()
                }
            }),
            ContractName::CriteriaOutput => json!({
                "type": "object",
                "required": ["criteria"],
                "properties": {
                    "criteria": {
                        "type": "array",
                        "minItems": 1,
                        "items": criterion_schema(json!({"type": "number", "minimum": 0}))
                    }
                }
            }),
            ContractName::BiasOutput => json!({
                "type": "object",
                "required": ["bias_findings"],
                "properties": {
                    "bias_findings": {"type": "array", "items": bias_finding_schema()}
                }
            }),
            ContractName::EvaluationOutput => json!({
                "type": "object",
                "required": ["evaluations"],
                "properties": {
                    "evaluations": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "required": ["option", "scores"],
                            "properties": {
                                "option": non_empty_string(),
                                "scores": {"type": "array", "minItems": 1, "items": criterion_score_schema()}
                            }
                        }
                    }
                }
            }),
            ContractName::SynthesisOutput => json!({
                "type": "object",
                "required": ["trade_offs", "assumptions", "what_would_change_decision"],
                "properties": {
                    "trade_offs": {"type": "array", "items": trade_off_schema()},
                    "assumptions": string_list(),
                    "what_would_change_decision": string_list()
                }
            }),
            ContractName::DecisionResponse => response_schema(),
            ContractName::ClarificationResponse => json!({
                "type": "object",
                "required": ["status", "missing_fields", "questions", "meta"],
                "additionalProperties": false,
                "properties": {
                    "status": {"const": "NEEDS_INFO"},
                    "missing_fields": string_list(),
                    "questions": {"type": "array", "minItems": 1, "items": non_empty_string()},
                    "meta": meta_schema()
                }
            }),
        }
    }
}

// ============================================================================
// SCHEMA FRAGMENTS
// ============================================================================

fn non_empty_string() -> Value {
    json!({"type": "string", "minLength": 1})
}

fn string_list() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

fn unit_interval() -> Value {
    json!({"type": "number", "minimum": 0, "maximum": 1})
}

fn criterion_schema(weight: Value) -> Value {
    json!({
        "type": "object",
        "required": ["name", "weight", "rationale"],
        "properties": {
            "name": non_empty_string(),
            "weight": weight,
            "rationale": {"type": "string"}
        }
    })
}

fn bias_finding_schema() -> Value {
    json!({
        "type": "object",
        "required": ["type", "description", "evidence"],
        "properties": {
            "type": {"enum": ["sunk_cost", "confirmation", "optimism", "authority"]},
            "description": non_empty_string(),
            "evidence": {"type": "string"}
        }
    })
}

fn criterion_score_schema() -> Value {
    json!({
        "type": "object",
        "required": ["criterion_name", "score", "justification"],
        "properties": {
            "criterion_name": non_empty_string(),
            "score": unit_interval(),
            "justification": {"type": "string"}
        }
    })
}

fn trade_off_schema() -> Value {
    json!({
        "type": "object",
        "required": ["option", "upside", "downside"],
        "properties": {
            "option": non_empty_string(),
            "upside": {"type": "string"},
            "downside": {"type": "string"}
        }
    })
}

fn meta_schema() -> Value {
    json!({
        "type": "object",
        "required": ["api_version", "logic_version", "schema_version", "request_id"],
        "properties": {
            "api_version": non_empty_string(),
            "logic_version": non_empty_string(),
            "schema_version": non_empty_string(),
            "request_id": non_empty_string()
        }
    })
}

fn request_schema(limits: &RequestLimits) -> Value {
    json!({
        "type": "object",
        "required": ["decision_context", "options"],
        "additionalProperties": false,
        "properties": {
            "decision_context": {
                "type": "string",
                "minLength": limits.min_context_chars,
                "maxLength": limits.max_context_chars
            },
            "options": {
                "type": "array",
                "minItems": limits.min_options,
                "maxItems": limits.max_options,
                "items": {"type": "string", "minLength": 1, "maxLength": limits.max_option_chars}
            },
            "constraints": {"type": ["object", "null"]},
            "criteria_preferences": {
                "type": ["array", "null"],
                "items": {"type": "string"}
            },
            "context_metadata": {"type": ["object", "null"]}
        }
    })
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "required": [
            "status", "winner", "confidence", "confidence_breakdown", "criteria",
            "option_scores", "bias_findings", "trade_offs", "assumptions",
            "what_would_change_decision", "meta"
        ],
        "additionalProperties": false,
        "properties": {
            "status": {"const": "COMPLETED"},
            "winner": non_empty_string(),
            "confidence": unit_interval(),
            "confidence_breakdown": {
                "type": "object",
                "required": ["completeness", "agreement", "evidence_strength", "bias_penalty", "aggregate"],
                "properties": {
                    "completeness": unit_interval(),
                    "agreement": unit_interval(),
                    "evidence_strength": unit_interval(),
                    "bias_penalty": unit_interval(),
                    "aggregate": unit_interval()
                }
            },
            "criteria": {"type": "array", "minItems": 1, "items": criterion_schema(unit_interval())},
            "option_scores": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["option", "scores", "total_score"],
                    "properties": {
                        "option": non_empty_string(),
                        "scores": {"type": "array", "items": criterion_score_schema()},
                        "total_score": unit_interval()
                    }
                }
            },
            "bias_findings": {"type": "array", "items": bias_finding_schema()},
            "trade_offs": {"type": "array", "items": trade_off_schema()},
            "assumptions": string_list(),
            "what_would_change_decision": string_list(),
            "meta": meta_schema()
        }
    })
}

// ============================================================================
// SEMANTIC RULES - run only once the schema passes
// ============================================================================

/// Case- and whitespace-insensitive identity for option and criterion names
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub(crate) fn semantic_violations(
    contract: ContractName,
    payload: &Value,
    expect: &Expectations,
    limits: &RequestLimits,
) -> Vec<Violation> {
    match contract {
        ContractName::DecisionRequest => request_rules(payload, limits),
        ContractName::ClarifierOutput => clarifier_rules(payload),
        ContractName::CriteriaOutput => distinct_names(payload, "criteria", "name"),
        ContractName::BiasOutput => Vec::new(),
        ContractName::EvaluationOutput => evaluation_rules(payload, expect),
        // Trade-offs naming unknown options are dropped when the output is finalized
        ContractName::SynthesisOutput => Vec::new(),
        ContractName::DecisionResponse => response_rules(payload, expect),
        ContractName::ClarificationResponse => Vec::new(),
    }
}

fn array<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload[key].as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn request_rules(payload: &Value, limits: &RequestLimits) -> Vec<Violation> {
    let mut violations = Vec::new();

    // Length bounds apply to the text that survives normalization
    let context = payload["decision_context"].as_str().unwrap_or("").trim();
    if context.is_empty() {
        violations.push(Violation::new("/decision_context", "must not be blank"));
    } else if context.chars().count() < limits.min_context_chars {
        violations.push(
            Violation::new(
                "/decision_context",
                format!(
                    "must be at least {} characters once trimmed",
                    limits.min_context_chars
                ),
            )
            .with_found(&payload["decision_context"]),
        );
    }

    let mut seen: Vec<String> = Vec::new();
    for (i, option) in array(payload, "options").iter().enumerate() {
        let label = option.as_str().unwrap_or("");
        let key = name_key(label);
        let path = format!("/options/{}", i);
        if key.is_empty() {
            violations.push(Violation::new(path, "option must not be blank").with_found(option));
        } else if let Some(first) = seen.iter().position(|k| *k == key) {
            violations.push(
                Violation::new(path, format!("duplicates option {}", first)).with_found(option),
            );
        }
        seen.push(key);
    }
    violations
}

fn clarifier_rules(payload: &Value) -> Vec<Violation> {
    let sufficient = payload["is_sufficient"].as_bool().unwrap_or(true);
    let has_question = array(payload, "questions")
        .iter()
        .any(|q| q.as_str().is_some_and(|q| !q.trim().is_empty()));
    if !sufficient && !has_question {
        vec![Violation::new(
            "/questions",
            "insufficient input must come with at least one question",
        )]
    } else {
        Vec::new()
    }
}

fn distinct_names(payload: &Value, list: &str, field: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut seen = HashSet::new();
    for (i, item) in array(payload, list).iter().enumerate() {
        let name = item[field].as_str().unwrap_or("");
        let path = format!("/{}/{}/{}", list, i, field);
        if name.trim().is_empty() {
            violations.push(Violation::new(path, "must not be blank"));
        } else if !seen.insert(name_key(name)) {
            violations.push(Violation::new(path, "duplicate name").with_found(&item[field]));
        }
    }
    violations
}

/// Every input option, in input order, scored exactly once on every criterion
fn evaluation_rules(payload: &Value, expect: &Expectations) -> Vec<Violation> {
    let mut violations = Vec::new();
    let evaluations = array(payload, "evaluations");

    if evaluations.len() != expect.options.len() {
        violations.push(Violation::new(
            "/evaluations",
            format!(
                "expected {} evaluations, got {}",
                expect.options.len(),
                evaluations.len()
            ),
        ));
    }

    let criteria: Vec<String> = expect.criteria.iter().map(|c| name_key(c)).collect();
    for (i, evaluation) in evaluations.iter().enumerate() {
        if let Some(expected) = expect.options.get(i) {
            let option = evaluation["option"].as_str().unwrap_or("");
            if name_key(option) != name_key(expected) {
                violations.push(
                    Violation::new(
                        format!("/evaluations/{}/option", i),
                        format!("expected option '{}' at this position", expected),
                    )
                    .with_found(&evaluation["option"]),
                );
            }
        }

        let mut covered = vec![false; criteria.len()];
        for (j, score) in array(evaluation, "scores").iter().enumerate() {
            let name = name_key(score["criterion_name"].as_str().unwrap_or(""));
            let path = format!("/evaluations/{}/scores/{}/criterion_name", i, j);
            match criteria.iter().position(|c| *c == name) {
                Some(k) if covered[k] => {
                    violations.push(Violation::new(path, "criterion scored twice").with_found(&score["criterion_name"]));
                }
                Some(k) => covered[k] = true,
                None => {
                    violations.push(Violation::new(path, "unknown criterion").with_found(&score["criterion_name"]));
                }
            }
        }
        for (k, done) in covered.iter().enumerate() {
            if !done {
                violations.push(Violation::new(
                    format!("/evaluations/{}/scores", i),
                    format!("missing score for criterion '{}'", expect.criteria[k]),
                ));
            }
        }
    }
    violations
}

fn trade_off_rules(payload: &Value, expect: &Expectations) -> Vec<Violation> {
    let options: HashSet<String> = expect.options.iter().map(|o| name_key(o)).collect();
    array(payload, "trade_offs")
        .iter()
        .enumerate()
        .filter(|(_, t)| !options.contains(&name_key(t["option"].as_str().unwrap_or(""))))
        .map(|(i, t)| {
            Violation::new(
                format!("/trade_offs/{}/option", i),
                format!("not one of the input options: {}", expect.options.join(", ")),
            )
            .with_found(&t["option"])
        })
        .collect()
}

fn response_rules(payload: &Value, expect: &Expectations) -> Vec<Violation> {
    let mut violations = Vec::new();

    let winner = payload["winner"].as_str().unwrap_or("");
    if !expect.options.iter().any(|o| o == winner) {
        violations.push(
            Violation::new("/winner", "winner is not one of the input options")
                .with_found(&payload["winner"]),
        );
    }

    let order: Vec<&str> = array(payload, "option_scores")
        .iter()
        .map(|s| s["option"].as_str().unwrap_or(""))
        .collect();
    let expected: Vec<&str> = expect.options.iter().map(String::as_str).collect();
    if order != expected {
        violations.push(Violation::new(
            "/option_scores",
            "option scores are not in input option order",
        ));
    }

    let weight_sum: f64 = array(payload, "criteria")
        .iter()
        .filter_map(|c| c["weight"].as_f64())
        .sum();
    if (weight_sum - 1.0).abs() > 1e-6 {
        violations.push(Violation::new(
            "/criteria",
            format!("criterion weights sum to {}, expected 1", weight_sum),
        ));
    }

    violations.extend(trade_off_rules(payload, expect));
    violations
}
