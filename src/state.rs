//! Request-scoped pipeline ledger
//!
//! One `PipelineState` per in-flight request, owned by its orchestrator run.
//! Stage outputs live in an arena of write-once slots indexed by stage;
//! each stage reads a narrow projection instead of the whole ledger.

use crate::config::VersionInfo;
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The five stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Clarifier,
    CriteriaBuilder,
    BiasChecker,
    OptionEvaluator,
    DecisionSynthesizer,
}

impl StageName {
    pub const ORDER: [StageName; 5] = [
        StageName::Clarifier,
        StageName::CriteriaBuilder,
        StageName::BiasChecker,
        StageName::OptionEvaluator,
        StageName::DecisionSynthesizer,
    ];

    pub fn index(self) -> usize {
        match self {
            StageName::Clarifier => 0,
            StageName::CriteriaBuilder => 1,
            StageName::BiasChecker => 2,
            StageName::OptionEvaluator => 3,
            StageName::DecisionSynthesizer => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Clarifier => "clarifier",
            StageName::CriteriaBuilder => "criteria_builder",
            StageName::BiasChecker => "bias_checker",
            StageName::OptionEvaluator => "option_evaluator",
            StageName::DecisionSynthesizer => "decision_synthesizer",
        }
    }

    fn previous(self) -> Option<StageName> {
        self.index().checked_sub(1).map(|i| Self::ORDER[i])
    }

    /// Phase the ledger must be in for this stage to commit
    fn phase_before_commit(self) -> Phase {
        match self {
            StageName::Clarifier | StageName::CriteriaBuilder => Phase::Clarifying,
            StageName::BiasChecker => Phase::CriteriaBuilt,
            StageName::OptionEvaluator => Phase::BiasChecked,
            StageName::DecisionSynthesizer => Phase::OptionsEvaluated,
        }
    }

    /// Phase reached once this stage's output is committed.
    /// The clarifier leaves the run in `Clarifying`; the orchestrator
    /// decides between `NeedsInfo` and continuing.
    fn phase_after_commit(self) -> Phase {
        match self {
            StageName::Clarifier => Phase::Clarifying,
            StageName::CriteriaBuilder => Phase::CriteriaBuilt,
            StageName::BiasChecker => Phase::BiasChecked,
            StageName::OptionEvaluator => Phase::OptionsEvaluated,
            StageName::DecisionSynthesizer => Phase::Synthesized,
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state machine
///
/// ```text
/// Initiated -> Clarifying -> NeedsInfo (terminal)
///                         -> CriteriaBuilt -> BiasChecked -> OptionsEvaluated -> Synthesized (terminal)
/// any non-terminal -> Failed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Initiated,
    Clarifying,
    NeedsInfo,
    CriteriaBuilt,
    BiasChecked,
    OptionsEvaluated,
    Synthesized,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::NeedsInfo | Phase::Synthesized | Phase::Failed)
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Phase::Failed)
                | (Phase::Initiated, Phase::Clarifying)
                | (Phase::Clarifying, Phase::Clarifying)
                | (Phase::Clarifying, Phase::NeedsInfo)
                | (Phase::Clarifying, Phase::CriteriaBuilt)
                | (Phase::CriteriaBuilt, Phase::BiasChecked)
                | (Phase::BiasChecked, Phase::OptionsEvaluated)
                | (Phase::OptionsEvaluated, Phase::Synthesized)
        )
    }

    /// Coarse status exposed to callers
    pub fn status(self) -> RunStatus {
        match self {
            Phase::NeedsInfo => RunStatus::NeedsInfo,
            Phase::Failed => RunStatus::Failed,
            Phase::Synthesized => RunStatus::Completed,
            _ => RunStatus::Initiated,
        }
    }
}

/// A validated stage output, tagged by the stage that produced it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    Clarifier(ClarifierOutput),
    CriteriaBuilder(CriteriaOutput),
    BiasChecker(BiasOutput),
    OptionEvaluator(EvaluationOutput),
    DecisionSynthesizer(SynthesisOutput),
}

impl StageOutput {
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Clarifier(_) => StageName::Clarifier,
            StageOutput::CriteriaBuilder(_) => StageName::CriteriaBuilder,
            StageOutput::BiasChecker(_) => StageName::BiasChecker,
            StageOutput::OptionEvaluator(_) => StageName::OptionEvaluator,
            StageOutput::DecisionSynthesizer(_) => StageName::DecisionSynthesizer,
        }
    }
}

/// Programming errors in ledger usage. Never a business outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("stage {0} already committed its output")]
    SlotOccupied(StageName),

    #[error("stage {stage} was handed output produced by {produced_by}")]
    WrongOutput {
        stage: StageName,
        produced_by: StageName,
    },

    #[error("stage {stage} needs {missing} to have committed first")]
    MissingUpstream {
        stage: StageName,
        missing: StageName,
    },

    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition { from: Phase, to: Phase },
}

// ============================================================================
// PROJECTIONS - what each stage is allowed to see
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ClarifierView<'a> {
    pub decision_context: &'a str,
    pub options: &'a [String],
    pub constraints: &'a Map<String, Value>,
    pub criteria_preferences: Option<&'a [String]>,
}

#[derive(Debug, Clone, Copy)]
pub struct CriteriaView<'a> {
    pub decision_context: &'a str,
    pub options: &'a [String],
    pub constraints: &'a Map<String, Value>,
    pub criteria_preferences: Option<&'a [String]>,
    pub clarification: &'a ClarifierOutput,
}

#[derive(Debug, Clone, Copy)]
pub struct BiasView<'a> {
    pub decision_context: &'a str,
    pub options: &'a [String],
    pub criteria: &'a [Criterion],
}

/// Options and criteria only; no bias findings
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorView<'a> {
    pub decision_context: &'a str,
    pub options: &'a [String],
    pub criteria: &'a [Criterion],
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesizerView<'a> {
    pub decision_context: &'a str,
    pub options: &'a [String],
    pub criteria: &'a [Criterion],
    pub option_scores: &'a [OptionScores],
    pub bias_findings: &'a [BiasFinding],
    /// Completeness signal from the clarifier
    pub missing_fields: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub enum StageView<'a> {
    Clarifier(ClarifierView<'a>),
    CriteriaBuilder(CriteriaView<'a>),
    BiasChecker(BiasView<'a>),
    OptionEvaluator(EvaluatorView<'a>),
    DecisionSynthesizer(SynthesizerView<'a>),
}

// ============================================================================
// LEDGER
// ============================================================================

/// Append-only ledger for a single request
#[derive(Debug)]
pub struct PipelineState {
    request_id: String,
    versions: VersionInfo,
    input: NormalizedInput,
    slots: [Option<StageOutput>; 5],
    phase: Phase,
}

impl PipelineState {
    /// Fresh ledger: only the normalized input is populated
    pub fn new(request_id: impl Into<String>, versions: VersionInfo, input: NormalizedInput) -> Self {
        Self {
            request_id: request_id.into(),
            versions,
            input,
            slots: Default::default(),
            phase: Phase::Initiated,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn versions(&self) -> &VersionInfo {
        &self.versions
    }

    pub fn input(&self) -> &NormalizedInput {
        &self.input
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> RunStatus {
        self.phase.status()
    }

    pub fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            api_version: self.versions.api_version.clone(),
            logic_version: self.versions.logic_version.clone(),
            schema_version: self.versions.schema_version.clone(),
            request_id: self.request_id.clone(),
        }
    }

    pub fn output(&self, stage: StageName) -> Option<&StageOutput> {
        self.slots[stage.index()].as_ref()
    }

    pub fn is_committed(&self, stage: StageName) -> bool {
        self.slots[stage.index()].is_some()
    }

    pub fn clarification(&self) -> Option<&ClarifierOutput> {
        match self.output(StageName::Clarifier) {
            Some(StageOutput::Clarifier(out)) => Some(out),
            _ => None,
        }
    }

    pub fn criteria(&self) -> Option<&CriteriaOutput> {
        match self.output(StageName::CriteriaBuilder) {
            Some(StageOutput::CriteriaBuilder(out)) => Some(out),
            _ => None,
        }
    }

    pub fn bias(&self) -> Option<&BiasOutput> {
        match self.output(StageName::BiasChecker) {
            Some(StageOutput::BiasChecker(out)) => Some(out),
            _ => None,
        }
    }

    pub fn evaluation(&self) -> Option<&EvaluationOutput> {
        match self.output(StageName::OptionEvaluator) {
            Some(StageOutput::OptionEvaluator(out)) => Some(out),
            _ => None,
        }
    }

    pub fn synthesis(&self) -> Option<&SynthesisOutput> {
        match self.output(StageName::DecisionSynthesizer) {
            Some(StageOutput::DecisionSynthesizer(out)) => Some(out),
            _ => None,
        }
    }

    pub fn confidence_breakdown(&self) -> Option<&ConfidenceBreakdown> {
        self.synthesis().map(|s| &s.confidence_breakdown)
    }

    /// Narrow read-only view for `stage`
    pub fn project(&self, stage: StageName) -> Result<StageView<'_>, StateError> {
        let input = &self.input;
        let missing = |missing: StageName| StateError::MissingUpstream { stage, missing };

        let view = match stage {
            StageName::Clarifier => StageView::Clarifier(ClarifierView {
                decision_context: &input.decision_context,
                options: &input.options,
                constraints: &input.constraints,
                criteria_preferences: input.criteria_preferences.as_deref(),
            }),
            StageName::CriteriaBuilder => StageView::CriteriaBuilder(CriteriaView {
                decision_context: &input.decision_context,
                options: &input.options,
                constraints: &input.constraints,
                criteria_preferences: input.criteria_preferences.as_deref(),
                clarification: self
                    .clarification()
                    .ok_or_else(|| missing(StageName::Clarifier))?,
            }),
            StageName::BiasChecker => StageView::BiasChecker(BiasView {
                decision_context: &input.decision_context,
                options: &input.options,
                criteria: &self
                    .criteria()
                    .ok_or_else(|| missing(StageName::CriteriaBuilder))?
                    .criteria,
            }),
            StageName::OptionEvaluator => StageView::OptionEvaluator(EvaluatorView {
                decision_context: &input.decision_context,
                options: &input.options,
                criteria: &self
                    .criteria()
                    .ok_or_else(|| missing(StageName::CriteriaBuilder))?
                    .criteria,
            }),
            StageName::DecisionSynthesizer => StageView::DecisionSynthesizer(SynthesizerView {
                decision_context: &input.decision_context,
                options: &input.options,
                criteria: &self
                    .criteria()
                    .ok_or_else(|| missing(StageName::CriteriaBuilder))?
                    .criteria,
                option_scores: &self
                    .evaluation()
                    .ok_or_else(|| missing(StageName::OptionEvaluator))?
                    .option_scores,
                bias_findings: &self
                    .bias()
                    .ok_or_else(|| missing(StageName::BiasChecker))?
                    .bias_findings,
                missing_fields: &self
                    .clarification()
                    .ok_or_else(|| missing(StageName::Clarifier))?
                    .missing_fields,
            }),
        };
        Ok(view)
    }

    /// Enter the pipeline proper
    pub fn begin(&mut self) -> Result<(), StateError> {
        self.transition(Phase::Clarifying)
    }

    /// Store a validated output in its slot. Each slot takes exactly one write.
    pub fn commit(&mut self, stage: StageName, output: StageOutput) -> Result<(), StateError> {
        if output.stage() != stage {
            return Err(StateError::WrongOutput {
                stage,
                produced_by: output.stage(),
            });
        }
        if self.is_committed(stage) {
            return Err(StateError::SlotOccupied(stage));
        }
        if let Some(prev) = stage.previous() {
            if !self.is_committed(prev) {
                return Err(StateError::MissingUpstream {
                    stage,
                    missing: prev,
                });
            }
        }

        let next = stage.phase_after_commit();
        if self.phase != stage.phase_before_commit() || !self.phase.can_transition_to(next) {
            return Err(StateError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }

        self.slots[stage.index()] = Some(output);
        self.phase = next;
        Ok(())
    }

    /// Clarifier said the input is insufficient; nothing else runs
    pub fn halt_needs_info(&mut self) -> Result<(), StateError> {
        self.transition(Phase::NeedsInfo)
    }

    /// Mark the run failed. No-op if already terminal.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = Phase::Failed;
        }
    }

    fn transition(&mut self, next: Phase) -> Result<(), StateError> {
        if !self.phase.can_transition_to(next) {
            return Err(StateError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> PipelineState {
        PipelineState::new(
            "req-1",
            VersionInfo::default(),
            NormalizedInput {
                decision_context: "Pick a cloud provider".into(),
                options: vec!["AWS".into(), "GCP".into()],
                constraints: Map::new(),
                criteria_preferences: None,
            },
        )
    }

    fn clarifier(sufficient: bool) -> StageOutput {
        StageOutput::Clarifier(ClarifierOutput {
            is_sufficient: sufficient,
            missing_fields: vec![],
            questions: vec![],
        })
    }

    fn criteria() -> StageOutput {
        StageOutput::CriteriaBuilder(CriteriaOutput {
            criteria: vec![Criterion {
                name: "cost".into(),
                weight: 1.0,
                rationale: "budget".into(),
            }],
        })
    }

    #[test]
    fn test_new_state_has_only_input() {
        let state = sample_state();
        assert_eq!(state.phase(), Phase::Initiated);
        assert_eq!(state.status(), RunStatus::Initiated);
        assert!(StageName::ORDER.iter().all(|s| !state.is_committed(*s)));
    }

    #[test]
    fn test_commit_twice_fails_fast() {
        let mut state = sample_state();
        state.begin().unwrap();
        state.commit(StageName::Clarifier, clarifier(true)).unwrap();

        let err = state.commit(StageName::Clarifier, clarifier(true)).unwrap_err();
        assert_eq!(err, StateError::SlotOccupied(StageName::Clarifier));
    }

    #[test]
    fn test_commit_rejects_out_of_order() {
        let mut state = sample_state();
        state.begin().unwrap();
        let err = state.commit(StageName::CriteriaBuilder, criteria()).unwrap_err();
        assert_eq!(
            err,
            StateError::MissingUpstream {
                stage: StageName::CriteriaBuilder,
                missing: StageName::Clarifier
            }
        );
    }

    #[test]
    fn test_commit_rejects_mismatched_output() {
        let mut state = sample_state();
        state.begin().unwrap();
        let err = state.commit(StageName::Clarifier, criteria()).unwrap_err();
        assert!(matches!(err, StateError::WrongOutput { .. }));
    }

    #[test]
    fn test_commit_before_begin_is_illegal() {
        let mut state = sample_state();
        let err = state.commit(StageName::Clarifier, clarifier(true)).unwrap_err();
        assert_eq!(
            err,
            StateError::IllegalTransition {
                from: Phase::Initiated,
                to: Phase::Clarifying
            }
        );
        assert!(!state.is_committed(StageName::Clarifier));
    }

    #[test]
    fn test_commit_requires_predecessor_phase() {
        let mut state = sample_state();
        state.begin().unwrap();
        state.commit(StageName::Clarifier, clarifier(false)).unwrap();
        state.halt_needs_info().unwrap();

        let err = state.commit(StageName::CriteriaBuilder, criteria()).unwrap_err();
        assert_eq!(
            err,
            StateError::IllegalTransition {
                from: Phase::NeedsInfo,
                to: Phase::CriteriaBuilt
            }
        );
    }

    #[test]
    fn test_needs_info_is_terminal() {
        let mut state = sample_state();
        state.begin().unwrap();
        state.commit(StageName::Clarifier, clarifier(false)).unwrap();
        state.halt_needs_info().unwrap();

        assert_eq!(state.status(), RunStatus::NeedsInfo);
        assert!(state.commit(StageName::CriteriaBuilder, criteria()).is_err());
        state.fail();
        assert_eq!(state.phase(), Phase::NeedsInfo);
    }

    #[test]
    fn test_failed_from_any_live_phase() {
        for phase in [
            Phase::Initiated,
            Phase::Clarifying,
            Phase::CriteriaBuilt,
            Phase::BiasChecked,
            Phase::OptionsEvaluated,
        ] {
            assert!(phase.can_transition_to(Phase::Failed), "{:?}", phase);
        }
        assert!(!Phase::Synthesized.can_transition_to(Phase::Failed));
    }

    #[test]
    fn test_commit_advances_phase() {
        let mut state = sample_state();
        state.begin().unwrap();
        state.commit(StageName::Clarifier, clarifier(true)).unwrap();
        assert_eq!(state.phase(), Phase::Clarifying);
        state.commit(StageName::CriteriaBuilder, criteria()).unwrap();
        assert_eq!(state.phase(), Phase::CriteriaBuilt);
    }

    #[test]
    fn test_projection_requires_upstream() {
        let state = sample_state();
        assert!(matches!(
            state.project(StageName::OptionEvaluator),
            Err(StateError::MissingUpstream { .. })
        ));
        assert!(matches!(
            state.project(StageName::Clarifier),
            Ok(StageView::Clarifier(_))
        ));
    }

    #[test]
    fn test_evaluator_projection_sees_criteria_and_options() {
        let mut state = sample_state();
        state.begin().unwrap();
        state.commit(StageName::Clarifier, clarifier(true)).unwrap();
        state.commit(StageName::CriteriaBuilder, criteria()).unwrap();

        match state.project(StageName::OptionEvaluator).unwrap() {
            StageView::OptionEvaluator(view) => {
                assert_eq!(view.options, ["AWS".to_string(), "GCP".to_string()]);
                assert_eq!(view.criteria.len(), 1);
            }
            other => panic!("unexpected view {:?}", other),
        }
    }
}
