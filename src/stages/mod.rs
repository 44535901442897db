//! The five analysis stages
//!
//! Each stage is a pure unit: it reads its projection of the ledger, asks
//! the model, and hands back a raw JSON document. It never writes state.
//! The orchestrator validates (and if needed repairs) that document, then
//! calls `finalize` to turn it into the typed output it commits.

pub mod bias_checker;
pub mod clarifier;
pub mod criteria_builder;
pub mod decision_synthesizer;
pub mod option_evaluator;

use crate::config::{ModelSettings, ScoringConstants};
use crate::error::{ModelError, PipelineError};
use crate::model::{PromptSpec, RetryingCaller};
use crate::prompts::{PromptError, PromptProvider};
use crate::state::{StageName, StageOutput, StageView};
use crate::types::Criterion;
use crate::validation::{extract_json, Expectations, Violation};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// A validated document still could not be shaped into the typed output
    #[error("output has an unexpected shape: {0}")]
    Shape(String),

    #[error("{0}")]
    Internal(String),
}

impl StageError {
    pub fn into_pipeline(self, stage: StageName) -> PipelineError {
        match self {
            StageError::Model(err) => PipelineError::model(stage.as_str(), err),
            StageError::Prompt(err) => PipelineError::internal(err.to_string()),
            StageError::Shape(reason) => PipelineError::SchemaValidationFailed {
                stage: stage.as_str().to_string(),
                violations: vec![Violation::new("", reason)],
            },
            StageError::Internal(message) => PipelineError::internal(message),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        StageError::Shape(err.to_string())
    }
}

/// Everything a stage may use besides its projection
pub struct StageContext<'a> {
    pub caller: &'a RetryingCaller,
    pub prompts: &'a dyn PromptProvider,
    pub logic_version: &'a str,
    pub model: &'a ModelSettings,
    pub scoring: &'a ScoringConstants,
    pub cancel: &'a CancellationToken,
}

impl StageContext<'_> {
    /// Render a named template into a prompt spec
    pub fn render(
        &self,
        name: &str,
        part: Option<usize>,
        vars: &[(&str, &str)],
    ) -> Result<PromptSpec, StageError> {
        let template = self.prompts.get(name, self.logic_version)?;
        Ok(PromptSpec {
            name: name.to_string(),
            logic_version: self.logic_version.to_string(),
            part,
            prompt: template.render(vars)?,
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
        })
    }

    /// Call the model and parse its reply
    pub async fn ask(&self, spec: &PromptSpec) -> Result<Value, StageError> {
        let text = self.caller.call(spec, self.cancel).await?;
        Ok(parse_model_output(&text))
    }
}

/// Model text as JSON. Text that holds no JSON is kept as a string so that
/// validation reports it and repair gets a chance.
pub fn parse_model_output(text: &str) -> Value {
    extract_json(text).unwrap_or_else(|| Value::String(text.to_string()))
}

/// Run one stage against its projection
pub async fn execute(view: StageView<'_>, ctx: &StageContext<'_>) -> Result<Value, StageError> {
    match view {
        StageView::Clarifier(v) => clarifier::execute(v, ctx).await,
        StageView::CriteriaBuilder(v) => criteria_builder::execute(v, ctx).await,
        StageView::BiasChecker(v) => bias_checker::execute(v, ctx).await,
        StageView::OptionEvaluator(v) => option_evaluator::execute(v, ctx).await,
        StageView::DecisionSynthesizer(v) => decision_synthesizer::execute(v, ctx).await,
    }
}

/// What the stage's contract is checked against
pub fn expectations(view: &StageView<'_>) -> Expectations {
    match view {
        StageView::Clarifier(_) | StageView::CriteriaBuilder(_) | StageView::BiasChecker(_) => {
            Expectations::none()
        }
        StageView::OptionEvaluator(v) => {
            Expectations::with_options(v.options).criteria(criterion_names(v.criteria))
        }
        StageView::DecisionSynthesizer(v) => {
            Expectations::with_options(v.options).criteria(criterion_names(v.criteria))
        }
    }
}

/// Turn a validated document into the typed output for the ledger
pub fn finalize(
    view: StageView<'_>,
    value: Value,
    scoring: &ScoringConstants,
) -> Result<StageOutput, StageError> {
    let output = match view {
        StageView::Clarifier(_) => StageOutput::Clarifier(clarifier::finalize(value)?),
        StageView::CriteriaBuilder(_) => StageOutput::CriteriaBuilder(criteria_builder::finalize(value)?),
        StageView::BiasChecker(_) => StageOutput::BiasChecker(bias_checker::finalize(value)?),
        StageView::OptionEvaluator(v) => StageOutput::OptionEvaluator(option_evaluator::finalize(v, value)?),
        StageView::DecisionSynthesizer(v) => {
            StageOutput::DecisionSynthesizer(decision_synthesizer::finalize(v, value, scoring)?)
        }
    };
    Ok(output)
}

// ============================================================================
// PROMPT FORMATTING
// ============================================================================

fn criterion_names(criteria: &[Criterion]) -> Vec<String> {
    criteria.iter().map(|c| c.name.clone()).collect()
}

pub(crate) fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_constraints(constraints: &Map<String, Value>) -> String {
    if constraints.is_empty() {
        return "(none)".to_string();
    }
    constraints
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("- {}: {}", k, s),
            other => format!("- {}: {}", k, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_criteria(criteria: &[Criterion]) -> String {
    criteria
        .iter()
        .map(|c| format!("- {} (weight {:.2}): {}", c.name, c.weight, c.rationale))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::model::scripted::ScriptedCaller;
    use crate::prompts::BuiltinPrompts;
    use std::sync::Arc;
    use std::time::Duration;

    /// Owns everything a `StageContext` borrows
    pub struct Harness {
        pub scripted: Arc<ScriptedCaller>,
        pub caller: RetryingCaller,
        pub model: ModelSettings,
        pub scoring: ScoringConstants,
        pub cancel: CancellationToken,
    }

    impl Harness {
        pub fn new() -> Self {
            let scripted = Arc::new(ScriptedCaller::new());
            let caller = RetryingCaller::new(scripted.clone(), RetryPolicy::default(), Duration::from_secs(30));
            Self {
                scripted,
                caller,
                model: ModelSettings::default(),
                scoring: ScoringConstants::v1(),
                cancel: CancellationToken::new(),
            }
        }

        pub fn ctx(&self) -> StageContext<'_> {
            StageContext {
                caller: &self.caller,
                prompts: &BuiltinPrompts,
                logic_version: "v1.0.0",
                model: &self.model,
                scoring: &self.scoring,
                cancel: &self.cancel,
            }
        }
    }

    pub fn criterion(name: &str, weight: f64) -> Criterion {
        Criterion {
            name: name.to_string(),
            weight,
            rationale: format!("{} matters", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unparseable_text_is_kept_as_string() {
        assert_eq!(parse_model_output("no idea"), Value::String("no idea".into()));
        assert_eq!(parse_model_output("{\"a\": 1}"), json!({"a": 1}));
    }

    #[test]
    fn test_shape_error_maps_to_schema_failure() {
        let err = StageError::Shape("missing field".into()).into_pipeline(StageName::BiasChecker);
        assert_eq!(err.code(), crate::error::ErrorCode::SchemaValidationFailed);
    }

    #[test]
    fn test_formatting_helpers() {
        assert_eq!(numbered(&["a".into(), "b".into()]), "1. a\n2. b");
        assert_eq!(bullets(&[]), "(none)");
        let constraints = json!({"budget": "10k", "team": 4});
        assert_eq!(
            format_constraints(constraints.as_object().unwrap()),
            "- budget: 10k\n- team: 4"
        );
    }
}
