//! One-shot repair of an invalid stage output
//!
//! The model sees the contract's schema and the violations, nothing else.
//! The decision context is never resent.

use super::{extract_json, ContractName, Violation};
use crate::config::ModelSettings;
use crate::error::ModelError;
use crate::model::{PromptSpec, RetryingCaller};
use crate::prompts::{PromptError, PromptProvider};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("repair output is not a JSON document")]
    Unparseable,
}

pub struct Repairer<'a> {
    caller: &'a RetryingCaller,
    prompts: &'a dyn PromptProvider,
    logic_version: &'a str,
    model: &'a ModelSettings,
}

impl<'a> Repairer<'a> {
    pub fn new(
        caller: &'a RetryingCaller,
        prompts: &'a dyn PromptProvider,
        logic_version: &'a str,
        model: &'a ModelSettings,
    ) -> Self {
        Self {
            caller,
            prompts,
            logic_version,
            model,
        }
    }

    /// Ask for a corrected document. The caller revalidates it.
    pub async fn repair(
        &self,
        contract: ContractName,
        schema: &Value,
        violations: &[Violation],
        cancel: &CancellationToken,
    ) -> Result<Value, RepairError> {
        let spec = self.prompt(contract, schema, violations)?;
        let text = self.caller.call(&spec, cancel).await?;
        extract_json(&text).ok_or(RepairError::Unparseable)
    }

    fn prompt(
        &self,
        contract: ContractName,
        schema: &Value,
        violations: &[Violation],
    ) -> Result<PromptSpec, PromptError> {
        let template = self.prompts.get("repair", self.logic_version)?;
        let schema_text = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
        let violation_text = violations
            .iter()
            .map(|v| format!("- {}", v))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = template.render(&[
            ("contract", contract.as_str()),
            ("json_schema", schema_text.as_str()),
            ("violations", violation_text.as_str()),
        ])?;

        Ok(PromptSpec {
            name: "repair".to_string(),
            logic_version: self.logic_version.to_string(),
            part: None,
            prompt,
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
        })
    }
}
