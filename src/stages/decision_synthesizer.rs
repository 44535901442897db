//! Decision synthesizer
//!
//! The winner and the confidence breakdown are computed locally from the
//! ledger. The model only writes the narrative around them: trade-offs,
//! assumptions and what would change the decision.

use super::{format_criteria, StageContext, StageError};
use crate::config::ScoringConstants;
use crate::scoring::{select_winner, ConfidenceScorer, ScoringInputs};
use crate::state::SynthesizerView;
use crate::types::{ConfidenceBreakdown, SynthesisOutput, TradeOff};
use crate::validation::contracts::name_key;
use serde::Deserialize;
use serde_json::Value;

/// Winner index and confidence for this ledger
pub fn decide(
    view: &SynthesizerView<'_>,
    scoring: &ScoringConstants,
) -> Result<(usize, ConfidenceBreakdown), StageError> {
    let winner = select_winner(view.option_scores, scoring.tie_epsilon)
        .ok_or_else(|| StageError::Internal("no option scores to choose from".to_string()))?;
    let breakdown = ConfidenceScorer::new(scoring).score(ScoringInputs {
        missing_fields: view.missing_fields,
        option_scores: view.option_scores,
        criteria_count: view.criteria.len(),
        bias_findings: view.bias_findings,
    });
    Ok((winner, breakdown))
}

pub async fn execute(view: SynthesizerView<'_>, ctx: &StageContext<'_>) -> Result<Value, StageError> {
    let (winner, _) = decide(&view, ctx.scoring)?;
    let winner = view.option_scores[winner].option.as_str();

    let totals = view
        .option_scores
        .iter()
        .map(|o| format!("- {}: {:.3}", o.option, o.total_score))
        .collect::<Vec<_>>()
        .join("\n");
    let criteria = format_criteria(view.criteria);
    let biases = if view.bias_findings.is_empty() {
        "(none)".to_string()
    } else {
        view.bias_findings
            .iter()
            .map(|b| format!("- {}: {}", b.bias_type.as_str(), b.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let spec = ctx.render(
        "decision_synthesizer",
        None,
        &[
            ("decision_context", view.decision_context),
            ("winner", winner),
            ("option_totals", totals.as_str()),
            ("criteria", criteria.as_str()),
            ("bias_findings", biases.as_str()),
        ],
    )?;
    ctx.ask(&spec).await
}

#[derive(Debug, Deserialize)]
struct Narrative {
    trade_offs: Vec<TradeOff>,
    assumptions: Vec<String>,
    what_would_change_decision: Vec<String>,
}

pub fn finalize(
    view: SynthesizerView<'_>,
    value: Value,
    scoring: &ScoringConstants,
) -> Result<SynthesisOutput, StageError> {
    let narrative: Narrative = serde_json::from_value(value)?;
    let (winner, breakdown) = decide(&view, scoring)?;

    // Trade-offs name options exactly as the caller spelled them
    let trade_offs = narrative
        .trade_offs
        .into_iter()
        .filter_map(|t| {
            let key = name_key(&t.option);
            view.options
                .iter()
                .find(|o| name_key(o) == key)
                .map(|o| TradeOff {
                    option: o.clone(),
                    upside: t.upside,
                    downside: t.downside,
                })
        })
        .collect();

    Ok(SynthesisOutput {
        winner: view.option_scores[winner].option.clone(),
        confidence: breakdown.aggregate,
        confidence_breakdown: breakdown,
        trade_offs,
        assumptions: narrative.assumptions,
        what_would_change_decision: narrative.what_would_change_decision,
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::{criterion, Harness};
    use super::*;
    use crate::types::{BiasFinding, BiasType, CriterionScore, OptionScores};
    use serde_json::json;

    fn scored(option: &str, total: f64) -> OptionScores {
        OptionScores {
            option: option.to_string(),
            scores: vec![CriterionScore {
                criterion_name: "value".to_string(),
                score: total,
                justification: "Weighed against the roadmap".to_string(),
            }],
            total_score: total,
        }
    }

    fn narrative() -> Value {
        json!({
            "trade_offs": [
                {"option": "build now", "upside": "Ships in Q3", "downside": "Team stretched"},
                {"option": "Postpone", "upside": "More data", "downside": "Competitor lead"}
            ],
            "assumptions": ["Hiring plan holds"],
            "what_would_change_decision": ["A cheaper vendor appears"]
        })
    }

    #[test]
    fn test_tie_picks_first_option_and_halves_agreement() {
        let options = vec!["Build now".to_string(), "Postpone".to_string()];
        let criteria = vec![criterion("value", 1.0)];
        let scores = vec![scored("Build now", 0.66), scored("Postpone", 0.66)];
        let view = SynthesizerView {
            decision_context: "Build the feature now or later?",
            options: &options,
            criteria: &criteria,
            option_scores: &scores,
            bias_findings: &[],
            missing_fields: &[],
        };

        let output = finalize(view, narrative(), &ScoringConstants::v1()).unwrap();
        assert_eq!(output.winner, "Build now");
        assert_eq!(output.confidence_breakdown.agreement, 0.5);
        assert_eq!(output.confidence, output.confidence_breakdown.aggregate);
        assert_eq!(output.trade_offs[0].option, "Build now");
    }

    #[test]
    fn test_bias_lowers_confidence_but_not_winner() {
        let options = vec!["Build now".to_string(), "Postpone".to_string()];
        let criteria = vec![criterion("value", 1.0)];
        let scores = vec![scored("Build now", 0.4), scored("Postpone", 0.7)];
        let findings = vec![BiasFinding {
            bias_type: BiasType::SunkCost,
            description: "Prior spend".into(),
            evidence: "we already invested".into(),
        }];
        let base = SynthesizerView {
            decision_context: "Build the feature now or later?",
            options: &options,
            criteria: &criteria,
            option_scores: &scores,
            bias_findings: &[],
            missing_fields: &[],
        };
        let biased = SynthesizerView {
            bias_findings: &findings,
            ..base
        };

        let scoring = ScoringConstants::v1();
        let clean = finalize(base, narrative(), &scoring).unwrap();
        let flagged = finalize(biased, narrative(), &scoring).unwrap();
        assert_eq!(clean.winner, "Postpone");
        assert_eq!(flagged.winner, "Postpone");
        assert!(clean.confidence > flagged.confidence);
    }

    #[tokio::test]
    async fn test_prompt_names_precomputed_winner() {
        let harness = Harness::new();
        harness.scripted.push_text("decision_synthesizer", narrative().to_string());

        let options = vec!["Build now".to_string(), "Postpone".to_string()];
        let criteria = vec![criterion("value", 1.0)];
        let scores = vec![scored("Build now", 0.3), scored("Postpone", 0.9)];
        let view = SynthesizerView {
            decision_context: "Build the feature now or later?",
            options: &options,
            criteria: &criteria,
            option_scores: &scores,
            bias_findings: &[],
            missing_fields: &[],
        };

        let value = execute(view, &harness.ctx()).await.unwrap();
        assert!(value["trade_offs"].is_array());
        assert_eq!(harness.scripted.calls_for("decision_synthesizer"), 1);
    }
}
