//! Pipeline orchestrator
//!
//! Drives one request through the fixed stage order:
//!
//! ```text
//! request ─validate─> Clarifier ──insufficient──> NEEDS_INFO
//!                         │
//!                         └─> CriteriaBuilder -> BiasChecker -> OptionEvaluator -> DecisionSynthesizer
//!                                                                                        │
//!                                                              response <─validate───────┘
//! ```
//!
//! Per stage: execute, validate, repair at most once, revalidate, commit.
//! Nothing is committed unless it validated. Any failure stops the run.

use crate::audit::{payload_hash, AuditChain, ObservabilitySink, ValidationOutcome};
use crate::config::PipelineConfig;
use crate::error::{ModelError, PipelineError, RunError};
use crate::model::{ModelCaller, RetryingCaller};
use crate::prompts::{PromptProvider, PROMPT_NAMES};
use crate::stages::{self, StageContext};
use crate::state::{PipelineState, StageName, StageOutput};
use crate::types::*;
use crate::validation::{ContractName, ContractValidator, Expectations, RepairError, Repairer, Violation};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How validation went for one committed stage
#[derive(Debug, Clone, Copy)]
struct StageReport {
    outcome: ValidationOutcome,
    violation_count: usize,
}

/// Runs decision requests. Cheap to share; holds no per-request state.
pub struct Orchestrator {
    config: PipelineConfig,
    caller: RetryingCaller,
    prompts: Arc<dyn PromptProvider>,
    sink: Arc<dyn ObservabilitySink>,
    validator: ContractValidator,
}

impl Orchestrator {
    /// Validates the configuration and checks every prompt exists for the
    /// configured logic version before accepting any request.
    pub fn new(
        config: PipelineConfig,
        model: Arc<dyn ModelCaller>,
        prompts: Arc<dyn PromptProvider>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let logic_version = &config.versions.logic_version;
        for name in PROMPT_NAMES {
            prompts
                .get(name, logic_version)
                .with_context(|| format!("prompt bundle {} is incomplete", logic_version))?;
        }

        let validator = ContractValidator::new(&config.limits)?;
        let caller = RetryingCaller::new(model, config.retry.clone(), config.call_timeout);

        Ok(Self {
            config,
            caller,
            prompts,
            sink,
            validator,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn validator(&self) -> &ContractValidator {
        &self.validator
    }

    /// Run a typed request under a fresh request id
    pub async fn run(&self, request: DecisionRequest) -> Result<DecisionOutcome, RunError> {
        let request_id = Uuid::new_v4().to_string();
        match serde_json::to_value(&request) {
            Ok(payload) => self.run_with_id(request_id, payload).await,
            Err(e) => Err(RunError {
                request_id,
                error: PipelineError::internal(format!("request did not serialize: {}", e)),
            }),
        }
    }

    /// Run a raw JSON request under a fresh request id
    pub async fn run_json(&self, payload: Value) -> Result<DecisionOutcome, RunError> {
        self.run_with_id(Uuid::new_v4().to_string(), payload).await
    }

    /// Run a raw JSON request under a caller-supplied request id
    pub async fn run_with_id(
        &self,
        request_id: impl Into<String>,
        payload: Value,
    ) -> Result<DecisionOutcome, RunError> {
        let request_id = request_id.into();
        let started = Instant::now();
        let mut chain = AuditChain::new(&request_id);

        tracing::info!(
            request_id = %request_id,
            logic_version = %self.config.versions.logic_version,
            "decision run started"
        );

        let result = self.execute(&request_id, payload, &mut chain).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => tracing::info!(
                request_id = %request_id,
                status = ?outcome.status(),
                duration_ms,
                audit_head = %chain.head(),
                "decision run finished"
            ),
            Err(err) => tracing::warn!(
                request_id = %request_id,
                code = err.code().as_str(),
                duration_ms,
                error = %err,
                "decision run failed"
            ),
        }

        result.map_err(|error| RunError { request_id, error })
    }

    async fn execute(
        &self,
        request_id: &str,
        payload: Value,
        chain: &mut AuditChain,
    ) -> Result<DecisionOutcome, PipelineError> {
        let input = self.admit(payload, chain)?;
        let mut state = PipelineState::new(request_id, self.config.versions.clone(), input);

        // Any exit from this scope cancels in-flight model calls
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();
        let deadline = Instant::now() + self.config.global_deadline;

        let result = self.drive(&mut state, &cancel, deadline, chain).await;
        if result.is_err() {
            state.fail();
        }
        result
    }

    /// Inbound boundary: validate, then normalize. No repair here.
    fn admit(&self, payload: Value, chain: &mut AuditChain) -> Result<NormalizedInput, PipelineError> {
        let started = Instant::now();

        if let Err(violations) =
            self.validator
                .validate(ContractName::DecisionRequest, &payload, &Expectations::none())
        {
            self.audit(chain, "request", started.elapsed(), ValidationOutcome::Invalid, violations.len(), None);
            return Err(PipelineError::Validation { violations });
        }

        let request: DecisionRequest = serde_json::from_value(payload).map_err(|e| {
            PipelineError::Validation {
                violations: vec![Violation::new("", e.to_string())],
            }
        })?;
        let input = NormalizedInput::from_request(&request);
        self.audit(chain, "request", started.elapsed(), ValidationOutcome::Valid, 0, payload_hash(&input));
        Ok(input)
    }

    async fn drive(
        &self,
        state: &mut PipelineState,
        cancel: &CancellationToken,
        deadline: Instant,
        chain: &mut AuditChain,
    ) -> Result<DecisionOutcome, PipelineError> {
        state.begin()?;

        self.run_stage(state, StageName::Clarifier, cancel, deadline, chain)
            .await?;

        let clarification = state
            .clarification()
            .cloned()
            .ok_or_else(|| PipelineError::internal("clarifier output missing after commit"))?;
        if !clarification.is_sufficient {
            state.halt_needs_info()?;
            tracing::info!(
                request_id = %state.request_id(),
                missing = clarification.missing_fields.len(),
                "input insufficient, halting for clarification"
            );
            let response = ClarificationResponse {
                status: state.status(),
                missing_fields: clarification.missing_fields,
                questions: clarification.questions,
                meta: state.meta(),
            };
            self.check_outbound(ContractName::ClarificationResponse, &response, &Expectations::none(), chain)?;
            return Ok(DecisionOutcome::NeedsInfo(response));
        }

        for stage in &StageName::ORDER[1..] {
            self.run_stage(state, *stage, cancel, deadline, chain).await?;
        }

        let response = assemble(state)?;
        let expect = Expectations::with_options(&state.input().options);
        self.check_outbound(ContractName::DecisionResponse, &response, &expect, chain)?;
        Ok(DecisionOutcome::Completed(response))
    }

    /// One stage under its timeout (bounded by the global deadline), then commit
    async fn run_stage(
        &self,
        state: &mut PipelineState,
        stage: StageName,
        cancel: &CancellationToken,
        deadline: Instant,
        chain: &mut AuditChain,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        let stage_deadline = deadline.min(started + self.config.stage_timeout);

        let produced = tokio::time::timeout_at(stage_deadline, self.produce(state, stage, cancel)).await;
        let elapsed = started.elapsed();

        match produced {
            Ok(Ok((output, report))) => {
                let hash = payload_hash(&output);
                state.commit(stage, output)?;
                self.audit(chain, stage.as_str(), elapsed, report.outcome, report.violation_count, hash);
                Ok(())
            }
            Ok(Err(err)) => {
                let (outcome, violation_count) = failure_outcome(&err);
                self.audit(chain, stage.as_str(), elapsed, outcome, violation_count, None);
                Err(err)
            }
            Err(_) => {
                cancel.cancel();
                self.audit(chain, stage.as_str(), elapsed, ValidationOutcome::TimedOut, 0, None);
                Err(PipelineError::Timeout {
                    stage: stage.as_str().to_string(),
                    elapsed_ms: elapsed.as_millis() as u64,
                })
            }
        }
    }

    async fn produce(
        &self,
        state: &PipelineState,
        stage: StageName,
        cancel: &CancellationToken,
    ) -> Result<(StageOutput, StageReport), PipelineError> {
        let view = state.project(stage)?;
        let ctx = self.stage_context(cancel);

        let raw = stages::execute(view, &ctx)
            .await
            .map_err(|e| e.into_pipeline(stage))?;
        let expect = stages::expectations(&view);
        let (value, report) = self.validate_or_repair(stage, raw, &expect, cancel).await?;

        let output = stages::finalize(view, value, &self.config.scoring)
            .map_err(|e| e.into_pipeline(stage))?;
        Ok((output, report))
    }

    fn stage_context<'a>(&'a self, cancel: &'a CancellationToken) -> StageContext<'a> {
        StageContext {
            caller: &self.caller,
            prompts: self.prompts.as_ref(),
            logic_version: &self.config.versions.logic_version,
            model: &self.config.model,
            scoring: &self.config.scoring,
            cancel,
        }
    }

    /// Validate; on failure make exactly one repair attempt and revalidate
    async fn validate_or_repair(
        &self,
        stage: StageName,
        raw: Value,
        expect: &Expectations,
        cancel: &CancellationToken,
    ) -> Result<(Value, StageReport), PipelineError> {
        let contract = ContractName::for_stage(stage);

        let violations = match self.validator.validate(contract, &raw, expect) {
            Ok(()) => {
                return Ok((
                    raw,
                    StageReport {
                        outcome: ValidationOutcome::Valid,
                        violation_count: 0,
                    },
                ))
            }
            Err(violations) => violations,
        };

        tracing::warn!(
            stage = %stage,
            violations = violations.len(),
            first_path = violations.first().map(|v| v.path.as_str()).unwrap_or(""),
            "stage output failed validation, attempting repair"
        );

        let repairer = Repairer::new(
            &self.caller,
            self.prompts.as_ref(),
            &self.config.versions.logic_version,
            &self.config.model,
        );
        let candidate = match repairer
            .repair(contract, self.validator.schema(contract), &violations, cancel)
            .await
        {
            Ok(candidate) => candidate,
            Err(RepairError::Model(err)) => return Err(PipelineError::model(stage.as_str(), err)),
            Err(RepairError::Prompt(err)) => return Err(PipelineError::internal(err.to_string())),
            Err(RepairError::Unparseable) => {
                return Err(PipelineError::SchemaValidationFailed {
                    stage: stage.as_str().to_string(),
                    violations: vec![Violation::new("", "repair output is not a JSON document")],
                })
            }
        };

        match self.validator.validate(contract, &candidate, expect) {
            Ok(()) => {
                tracing::info!(stage = %stage, "stage output repaired");
                Ok((
                    candidate,
                    StageReport {
                        outcome: ValidationOutcome::Repaired,
                        violation_count: violations.len(),
                    },
                ))
            }
            Err(remaining) => Err(PipelineError::SchemaValidationFailed {
                stage: stage.as_str().to_string(),
                violations: remaining,
            }),
        }
    }

    /// Outbound boundary: a response that breaks its contract is never returned
    fn check_outbound<T: Serialize>(
        &self,
        contract: ContractName,
        response: &T,
        expect: &Expectations,
        chain: &mut AuditChain,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        let value = serde_json::to_value(response)
            .map_err(|e| PipelineError::internal(format!("response did not serialize: {}", e)))?;

        match self.validator.validate(contract, &value, expect) {
            Ok(()) => {
                self.audit(chain, "response", started.elapsed(), ValidationOutcome::Valid, 0, payload_hash(&value));
                Ok(())
            }
            Err(violations) => {
                self.audit(chain, "response", started.elapsed(), ValidationOutcome::Invalid, violations.len(), None);
                Err(PipelineError::SchemaValidationFailed {
                    stage: "response".to_string(),
                    violations,
                })
            }
        }
    }

    fn audit(
        &self,
        chain: &mut AuditChain,
        stage: &str,
        elapsed: Duration,
        outcome: ValidationOutcome,
        violation_count: usize,
        payload_hash: Option<String>,
    ) {
        let record = chain.link(stage, elapsed.as_millis() as u64, outcome, violation_count, payload_hash);
        self.sink.record(&record);
    }
}

fn failure_outcome(err: &PipelineError) -> (ValidationOutcome, usize) {
    match err {
        PipelineError::Validation { violations } | PipelineError::SchemaValidationFailed { violations, .. } => {
            (ValidationOutcome::Invalid, violations.len())
        }
        PipelineError::Model {
            source: ModelError::Cancelled,
            ..
        }
        | PipelineError::Timeout { .. } => (ValidationOutcome::TimedOut, 0),
        PipelineError::Model { .. } => (ValidationOutcome::ModelError, 0),
        PipelineError::Internal(_) => (ValidationOutcome::InternalError, 0),
    }
}

/// Build the outbound response from a fully synthesized ledger
fn assemble(state: &PipelineState) -> Result<DecisionResponse, PipelineError> {
    let missing = |what: &str| PipelineError::internal(format!("{} missing from a synthesized ledger", what));

    let criteria = state.criteria().ok_or_else(|| missing("criteria"))?;
    let bias = state.bias().ok_or_else(|| missing("bias findings"))?;
    let evaluation = state.evaluation().ok_or_else(|| missing("option scores"))?;
    let synthesis = state.synthesis().ok_or_else(|| missing("synthesis"))?;

    Ok(DecisionResponse {
        status: state.status(),
        winner: synthesis.winner.clone(),
        confidence: synthesis.confidence,
        confidence_breakdown: synthesis.confidence_breakdown,
        criteria: criteria.criteria.clone(),
        option_scores: evaluation.option_scores.clone(),
        bias_findings: bias.bias_findings.clone(),
        trade_offs: synthesis.trade_offs.clone(),
        assumptions: synthesis.assumptions.clone(),
        what_would_change_decision: synthesis.what_would_change_decision.clone(),
        meta: state.meta(),
    })
}
