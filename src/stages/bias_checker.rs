//! Bias checker: flags framing bias, never touches the recommendation

use super::{format_criteria, numbered, StageContext, StageError};
use crate::state::BiasView;
use crate::types::BiasOutput;
use serde_json::Value;

pub async fn execute(view: BiasView<'_>, ctx: &StageContext<'_>) -> Result<Value, StageError> {
    let options = numbered(view.options);
    let criteria = format_criteria(view.criteria);

    let spec = ctx.render(
        "bias_checker",
        None,
        &[
            ("decision_context", view.decision_context),
            ("options", options.as_str()),
            ("criteria", criteria.as_str()),
        ],
    )?;
    ctx.ask(&spec).await
}

pub fn finalize(value: Value) -> Result<BiasOutput, StageError> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{criterion, Harness};
    use super::*;
    use crate::types::BiasType;
    use serde_json::json;

    #[tokio::test]
    async fn test_bias_findings_round_through_finalize() {
        let harness = Harness::new();
        harness.scripted.push_text(
            "bias_checker",
            r#"Sure. {"bias_findings": [{"type": "sunk_cost", "description": "Prior spend cited", "evidence": "we already spent 200k"}]}"#,
        );

        let options = vec!["Keep building".to_string(), "Buy".to_string()];
        let criteria = vec![criterion("cost", 1.0)];
        let view = BiasView {
            decision_context: "We already spent 200k, should we keep building?",
            options: &options,
            criteria: &criteria,
        };

        let value = execute(view, &harness.ctx()).await.unwrap();
        let output = finalize(value).unwrap();
        assert_eq!(output.bias_findings.len(), 1);
        assert_eq!(output.bias_findings[0].bias_type, BiasType::SunkCost);
    }

    #[test]
    fn test_empty_findings() {
        let output = finalize(json!({"bias_findings": []})).unwrap();
        assert!(output.bias_findings.is_empty());
    }
}
