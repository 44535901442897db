//! Criteria builder: weighted evaluation criteria
//!
//! The model proposes raw non-negative weights; they are normalized here
//! so the committed weights always sum to 1.

use super::{bullets, format_constraints, numbered, StageContext, StageError};
use crate::state::CriteriaView;
use crate::types::{ClarifierOutput, CriteriaOutput, Criterion};
use serde_json::Value;

pub async fn execute(view: CriteriaView<'_>, ctx: &StageContext<'_>) -> Result<Value, StageError> {
    let options = numbered(view.options);
    let constraints = format_constraints(view.constraints);
    let preferences = view
        .criteria_preferences
        .map(bullets)
        .unwrap_or_else(|| "(none)".to_string());
    let clarification = describe(view.clarification);

    let spec = ctx.render(
        "criteria_builder",
        None,
        &[
            ("decision_context", view.decision_context),
            ("options", options.as_str()),
            ("constraints", constraints.as_str()),
            ("criteria_preferences", preferences.as_str()),
            ("clarification", clarification.as_str()),
        ],
    )?;
    ctx.ask(&spec).await
}

fn describe(clarification: &ClarifierOutput) -> String {
    if clarification.missing_fields.is_empty() {
        return "Input judged sufficient.".to_string();
    }
    format!(
        "Input judged sufficient with gaps in: {}",
        clarification.missing_fields.join(", ")
    )
}

pub fn finalize(value: Value) -> Result<CriteriaOutput, StageError> {
    let raw: CriteriaOutput = serde_json::from_value(value)?;
    let criteria = raw
        .criteria
        .into_iter()
        .map(|c| Criterion {
            name: c.name.trim().to_string(),
            weight: c.weight,
            rationale: c.rationale.trim().to_string(),
        })
        .collect();
    Ok(CriteriaOutput {
        criteria: normalize_weights(criteria),
    })
}

/// Scale weights to sum to 1. All-zero weights become equal weights.
pub fn normalize_weights(mut criteria: Vec<Criterion>) -> Vec<Criterion> {
    if criteria.is_empty() {
        return criteria;
    }
    let sum: f64 = criteria.iter().map(|c| c.weight.max(0.0)).sum();
    if sum <= 0.0 || !sum.is_finite() {
        let equal = 1.0 / criteria.len() as f64;
        for c in &mut criteria {
            c.weight = equal;
        }
    } else {
        for c in &mut criteria {
            c.weight = c.weight.max(0.0) / sum;
        }
    }
    criteria
}

#[cfg(test)]
mod tests {
    use super::super::testing::criterion;
    use super::*;
    use serde_json::json;

    fn weight_sum(criteria: &[Criterion]) -> f64 {
        criteria.iter().map(|c| c.weight).sum()
    }

    #[test]
    fn test_weights_normalize_to_one() {
        let criteria = normalize_weights(vec![
            criterion("cost", 3.0),
            criterion("latency", 1.0),
            criterion("support", 4.0),
        ]);
        assert!((weight_sum(&criteria) - 1.0).abs() < 1e-9);
        assert!((criteria[0].weight - 0.375).abs() < 1e-12);
        assert!(criteria.iter().all(|c| (0.0..=1.0).contains(&c.weight)));
    }

    #[test]
    fn test_zero_weights_become_equal() {
        let criteria = normalize_weights(vec![criterion("a", 0.0), criterion("b", 0.0)]);
        assert_eq!(criteria[0].weight, 0.5);
        assert_eq!(criteria[1].weight, 0.5);
    }

    #[test]
    fn test_finalize_trims_and_normalizes() {
        let output = finalize(json!({"criteria": [
            {"name": " cost ", "weight": 2, "rationale": "budget is tight"},
            {"name": "speed", "weight": 2, "rationale": "launch in Q3"}
        ]}))
        .unwrap();
        assert_eq!(output.criteria[0].name, "cost");
        assert_eq!(output.criteria[0].weight, 0.5);
    }

    #[test]
    fn test_describe_mentions_gaps() {
        let clarification = ClarifierOutput {
            is_sufficient: true,
            missing_fields: vec!["timeline".into()],
            questions: vec![],
        };
        assert!(describe(&clarification).contains("timeline"));
    }
}
