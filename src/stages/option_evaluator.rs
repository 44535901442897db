//! Option evaluator: scores every option on every criterion
//!
//! One model call per option, run concurrently. Results are reassembled
//! by option index, so completion order never leaks into the output.
//! Totals are recomputed locally from the committed weights.

use super::{format_criteria, parse_model_output, StageContext, StageError};
use crate::scoring::clamp_unit;
use crate::state::EvaluatorView;
use crate::types::{Criterion, CriterionScore, EvaluationOutput, OptionScores};
use crate::validation::contracts::name_key;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinSet;

pub async fn execute(view: EvaluatorView<'_>, ctx: &StageContext<'_>) -> Result<Value, StageError> {
    let criteria = format_criteria(view.criteria);

    let mut specs = Vec::with_capacity(view.options.len());
    for (i, option) in view.options.iter().enumerate() {
        specs.push(ctx.render(
            "option_evaluator",
            Some(i),
            &[
                ("decision_context", view.decision_context),
                ("option", option.as_str()),
                ("criteria", criteria.as_str()),
            ],
        )?);
    }

    // Dropping the set (deadline, early error) aborts the remaining calls
    let mut tasks = JoinSet::new();
    for (i, spec) in specs.into_iter().enumerate() {
        let caller = ctx.caller.clone();
        let cancel = ctx.cancel.clone();
        tasks.spawn(async move { (i, caller.call(&spec, &cancel).await) });
    }

    let mut replies: Vec<Option<String>> = vec![None; view.options.len()];
    while let Some(joined) = tasks.join_next().await {
        let (i, result) = joined
            .map_err(|e| StageError::Internal(format!("option evaluation task failed: {}", e)))?;
        replies[i] = Some(result?);
    }

    let evaluations: Vec<Value> = view
        .options
        .iter()
        .zip(replies)
        .map(|(option, reply)| {
            let parsed = reply
                .map(|text| parse_model_output(&text))
                .unwrap_or(Value::Null);
            json!({"option": option, "scores": scores_of(parsed)})
        })
        .collect();

    Ok(json!({ "evaluations": evaluations }))
}

/// Accept `{"scores": [...]}` or a bare array
fn scores_of(parsed: Value) -> Value {
    match parsed {
        Value::Object(mut map) if map.contains_key("scores") => {
            map.remove("scores").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct RawEvaluation {
    option: String,
    scores: Vec<CriterionScore>,
}

#[derive(Debug, Deserialize)]
struct RawEvaluations {
    evaluations: Vec<RawEvaluation>,
}

pub fn finalize(view: EvaluatorView<'_>, value: Value) -> Result<EvaluationOutput, StageError> {
    let raw: RawEvaluations = serde_json::from_value(value)?;

    let mut option_scores = Vec::with_capacity(view.options.len());
    for (option, evaluation) in view.options.iter().zip(raw.evaluations) {
        if name_key(&evaluation.option) != name_key(option) {
            return Err(StageError::Shape(format!(
                "evaluation for '{}' found where '{}' was expected",
                evaluation.option, option
            )));
        }
        let scores = align_scores(view.criteria, evaluation.scores)?;
        let total_score = weighted_total(&scores, view.criteria);
        option_scores.push(OptionScores {
            option: option.clone(),
            scores,
            total_score,
        });
    }

    if option_scores.len() != view.options.len() {
        return Err(StageError::Shape(format!(
            "expected {} evaluations, got {}",
            view.options.len(),
            option_scores.len()
        )));
    }
    Ok(EvaluationOutput { option_scores })
}

/// Scores reordered to criteria order, with canonical criterion names
fn align_scores(
    criteria: &[Criterion],
    scores: Vec<CriterionScore>,
) -> Result<Vec<CriterionScore>, StageError> {
    let mut slots: Vec<Option<CriterionScore>> = vec![None; criteria.len()];
    for score in scores {
        let key = name_key(&score.criterion_name);
        let Some(i) = criteria.iter().position(|c| name_key(&c.name) == key) else {
            return Err(StageError::Shape(format!(
                "score for unknown criterion '{}'",
                score.criterion_name
            )));
        };
        slots[i] = Some(CriterionScore {
            criterion_name: criteria[i].name.clone(),
            score: clamp_unit(score.score),
            justification: score.justification.trim().to_string(),
        });
    }

    slots
        .into_iter()
        .zip(criteria)
        .map(|(slot, c)| {
            slot.ok_or_else(|| StageError::Shape(format!("missing score for criterion '{}'", c.name)))
        })
        .collect()
}

/// Σ weight × score over aligned scores
pub fn weighted_total(scores: &[CriterionScore], criteria: &[Criterion]) -> f64 {
    let total: f64 = scores
        .iter()
        .zip(criteria)
        .map(|(s, c)| c.weight * s.score)
        .sum();
    clamp_unit(total)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{criterion, Harness};
    use super::*;
    use crate::error::ModelError;
    use std::time::Duration;

    fn reply(cost: f64, latency: f64) -> String {
        json!({"scores": [
            {"criterion_name": "cost", "score": cost, "justification": "Pricing compared against budget"},
            {"criterion_name": "latency", "score": latency, "justification": "Measured from the EU region"}
        ]})
        .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_input_order_not_completion_order() {
        let harness = Harness::new();
        // AWS answers last, GCP first
        harness
            .scripted
            .push_delayed("option_evaluator#0", Duration::from_millis(300), reply(0.2, 0.4));
        harness
            .scripted
            .push_delayed("option_evaluator#1", Duration::from_millis(10), reply(0.9, 0.8));

        let options = vec!["AWS".to_string(), "GCP".to_string()];
        let criteria = vec![criterion("cost", 0.5), criterion("latency", 0.5)];
        let view = EvaluatorView {
            decision_context: "Pick a cloud provider",
            options: &options,
            criteria: &criteria,
        };

        let value = execute(view, &harness.ctx()).await.unwrap();
        assert_eq!(value["evaluations"][0]["option"], "AWS");
        assert_eq!(value["evaluations"][1]["option"], "GCP");

        let output = finalize(view, value).unwrap();
        assert_eq!(output.option_scores[0].option, "AWS");
        assert!((output.option_scores[0].total_score - 0.3).abs() < 1e-12);
        assert!((output.option_scores[1].total_score - 0.85).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_failed_option_call_fails_the_stage() {
        let harness = Harness::new();
        harness.scripted.push_text("option_evaluator#0", reply(0.5, 0.5));
        harness
            .scripted
            .push_error("option_evaluator#1", ModelError::permanent("400 bad request"));

        let options = vec!["AWS".to_string(), "GCP".to_string()];
        let criteria = vec![criterion("cost", 0.5), criterion("latency", 0.5)];
        let view = EvaluatorView {
            decision_context: "Pick a cloud provider",
            options: &options,
            criteria: &criteria,
        };

        let err = execute(view, &harness.ctx()).await.unwrap_err();
        assert!(matches!(err, StageError::Model(ModelError::Permanent { .. })));
    }

    #[test]
    fn test_finalize_aligns_scores_to_criteria_order() {
        let options = vec!["A".to_string(), "B".to_string()];
        let criteria = vec![criterion("Cost", 0.25), criterion("Latency", 0.75)];
        let view = EvaluatorView {
            decision_context: "ctx",
            options: &options,
            criteria: &criteria,
        };
        let value = json!({"evaluations": [
            {"option": "A", "scores": [
                {"criterion_name": "latency", "score": 1.0, "justification": "fast"},
                {"criterion_name": "cost", "score": 0.0, "justification": "pricey"}
            ]},
            {"option": "B", "scores": [
                {"criterion_name": "cost", "score": 1.0, "justification": "cheap"},
                {"criterion_name": "latency", "score": 0.0, "justification": "slow"}
            ]}
        ]});

        let output = finalize(view, value).unwrap();
        assert_eq!(output.option_scores[0].scores[0].criterion_name, "Cost");
        assert_eq!(output.option_scores[0].total_score, 0.75);
        assert_eq!(output.option_scores[1].total_score, 0.25);
    }

    #[test]
    fn test_unparseable_reply_lands_in_scores() {
        assert_eq!(scores_of(Value::String("nope".into())), Value::String("nope".into()));
        assert_eq!(scores_of(json!({"scores": []})), json!([]));
    }
}
