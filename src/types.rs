//! Core types for the decisionflow pipeline
//!
//! Three families live here:
//! - the inbound request and its normalized form
//! - the typed outputs each stage commits to the ledger
//! - the outbound response (completed or needs-info)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decision request as received from the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DecisionRequest {
    /// Problem description and decision context
    pub decision_context: String,
    /// Options to evaluate, in caller order
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_preferences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_metadata: Option<Map<String, Value>>,
}

impl DecisionRequest {
    pub fn new(decision_context: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            decision_context: decision_context.into(),
            options,
            constraints: None,
            criteria_preferences: None,
            context_metadata: None,
        }
    }
}

/// Sanitized input the pipeline actually reasons over
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedInput {
    pub decision_context: String,
    /// Order-significant; preserved by every downstream stage
    pub options: Vec<String>,
    pub constraints: Map<String, Value>,
    pub criteria_preferences: Option<Vec<String>>,
}

impl NormalizedInput {
    /// Trim every string and drop blank preference entries.
    ///
    /// Option order is never changed.
    pub fn from_request(request: &DecisionRequest) -> Self {
        let constraints = request
            .constraints
            .as_ref()
            .map(|c| {
                c.iter()
                    .map(|(k, v)| (k.trim().to_string(), trim_value(v)))
                    .collect()
            })
            .unwrap_or_default();

        let criteria_preferences = request
            .criteria_preferences
            .as_ref()
            .map(|prefs| {
                prefs
                    .iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|prefs| !prefs.is_empty());

        Self {
            decision_context: request.decision_context.trim().to_string(),
            options: request.options.iter().map(|o| o.trim().to_string()).collect(),
            constraints,
            criteria_preferences,
        }
    }
}

fn trim_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(trim_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.trim().to_string(), trim_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Evaluation criterion with a normalized weight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    pub name: String,
    pub weight: f64,
    pub rationale: String,
}

/// The closed bias taxonomy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BiasType {
    /// Continuing because of what has already been spent
    SunkCost,
    /// Favoring evidence that supports a preferred option
    Confirmation,
    /// Underestimating cost, time or risk
    Optimism,
    /// Deferring to a source because of its status
    Authority,
}

impl BiasType {
    pub const ALL: [BiasType; 4] = [
        BiasType::SunkCost,
        BiasType::Confirmation,
        BiasType::Optimism,
        BiasType::Authority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BiasType::SunkCost => "sunk_cost",
            BiasType::Confirmation => "confirmation",
            BiasType::Optimism => "optimism",
            BiasType::Authority => "authority",
        }
    }
}

/// A typed, evidenced bias flag, kept apart from the recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BiasFinding {
    #[serde(rename = "type")]
    pub bias_type: BiasType,
    pub description: String,
    pub evidence: String,
}

/// Score of one option against one criterion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub criterion_name: String,
    pub score: f64,
    pub justification: String,
}

/// All criterion scores for a single option plus the weighted total
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionScores {
    pub option: String,
    pub scores: Vec<CriterionScore>,
    pub total_score: f64,
}

/// The four confidence signals and their weighted aggregate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceBreakdown {
    pub completeness: f64,
    pub agreement: f64,
    pub evidence_strength: f64,
    /// Higher means more bias was found
    pub bias_penalty: f64,
    pub aggregate: f64,
}

/// What choosing an option buys and what it costs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeOff {
    pub option: String,
    pub upside: String,
    pub downside: String,
}

// ============================================================================
// STAGE OUTPUTS - committed to the ledger exactly once each
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarifierOutput {
    pub is_sufficient: bool,
    pub missing_fields: Vec<String>,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriteriaOutput {
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BiasOutput {
    pub bias_findings: Vec<BiasFinding>,
}

/// Per-option scores in original option order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationOutput {
    pub option_scores: Vec<OptionScores>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisOutput {
    pub winner: String,
    pub confidence: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub trade_offs: Vec<TradeOff>,
    pub assumptions: Vec<String>,
    pub what_would_change_decision: Vec<String>,
}

// ============================================================================
// RESPONSE
// ============================================================================

/// Externally visible request status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Initiated,
    NeedsInfo,
    Failed,
    Completed,
}

/// Version triplet plus correlation id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMeta {
    pub api_version: String,
    pub logic_version: String,
    pub schema_version: String,
    pub request_id: String,
}

/// Fully validated recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionResponse {
    pub status: RunStatus,
    pub winner: String,
    pub confidence: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub criteria: Vec<Criterion>,
    pub option_scores: Vec<OptionScores>,
    pub bias_findings: Vec<BiasFinding>,
    pub trade_offs: Vec<TradeOff>,
    pub assumptions: Vec<String>,
    pub what_would_change_decision: Vec<String>,
    pub meta: ResponseMeta,
}

/// Early halt: the request lacks information the pipeline needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarificationResponse {
    pub status: RunStatus,
    pub missing_fields: Vec<String>,
    pub questions: Vec<String>,
    pub meta: ResponseMeta,
}

/// What `Orchestrator::run` returns when no error occurred
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DecisionOutcome {
    Completed(DecisionResponse),
    NeedsInfo(ClarificationResponse),
}

impl DecisionOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            DecisionOutcome::Completed(r) => r.status,
            DecisionOutcome::NeedsInfo(r) => r.status,
        }
    }

    pub fn meta(&self) -> &ResponseMeta {
        match self {
            DecisionOutcome::Completed(r) => &r.meta,
            DecisionOutcome::NeedsInfo(r) => &r.meta,
        }
    }

    pub fn as_completed(&self) -> Option<&DecisionResponse> {
        match self {
            DecisionOutcome::Completed(r) => Some(r),
            DecisionOutcome::NeedsInfo(_) => None,
        }
    }
}
