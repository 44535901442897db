//! Clarifier: is there enough here to decide?

use super::{bullets, format_constraints, numbered, StageContext, StageError};
use crate::state::ClarifierView;
use crate::types::ClarifierOutput;
use serde_json::Value;

pub async fn execute(view: ClarifierView<'_>, ctx: &StageContext<'_>) -> Result<Value, StageError> {
    let options = numbered(view.options);
    let constraints = format_constraints(view.constraints);
    let preferences = view
        .criteria_preferences
        .map(bullets)
        .unwrap_or_else(|| "(none)".to_string());

    let spec = ctx.render(
        "clarifier",
        None,
        &[
            ("decision_context", view.decision_context),
            ("options", options.as_str()),
            ("constraints", constraints.as_str()),
            ("criteria_preferences", preferences.as_str()),
        ],
    )?;
    ctx.ask(&spec).await
}

pub fn finalize(value: Value) -> Result<ClarifierOutput, StageError> {
    let mut output: ClarifierOutput = serde_json::from_value(value)?;
    output.missing_fields = trimmed(output.missing_fields);
    output.questions = trimmed(output.questions);
    Ok(output)
}

fn trimmed(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use serde_json::{json, Map};

    #[tokio::test]
    async fn test_clarifier_prompt_and_reply() {
        let harness = Harness::new();
        harness
            .scripted
            .push_text("clarifier", r#"{"is_sufficient": true, "missing_fields": [], "questions": []}"#);

        let options = vec!["AWS".to_string(), "GCP".to_string()];
        let constraints = Map::new();
        let view = ClarifierView {
            decision_context: "Pick a cloud provider for the analytics platform",
            options: &options,
            constraints: &constraints,
            criteria_preferences: None,
        };

        let value = execute(view, &harness.ctx()).await.unwrap();
        assert_eq!(value["is_sufficient"], json!(true));
        assert_eq!(harness.scripted.calls_for("clarifier"), 1);
    }

    #[test]
    fn test_finalize_drops_blank_entries() {
        let output = finalize(json!({
            "is_sufficient": false,
            "missing_fields": [" budget ", ""],
            "questions": ["What is the budget?", "  "]
        }))
        .unwrap();
        assert_eq!(output.missing_fields, vec!["budget"]);
        assert_eq!(output.questions, vec!["What is the budget?"]);
    }
}
