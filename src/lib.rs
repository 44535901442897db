//! decisionflow - Staged Decision Analysis
//!
//! Turns a decision context and a list of options into a validated,
//! auditable recommendation by running a fixed five-stage pipeline.
//!
//! # Principles
//!
//! - **Contracts at every boundary**: inbound request, each stage output and
//!   the outbound response are schema-checked; invalid output gets exactly
//!   one repair attempt
//! - **Write-once ledger**: each stage commits once and never sees more than
//!   its projection of earlier outputs
//! - **Numbers are computed, not generated**: weights are normalized, totals
//!   recomputed, the winner and confidence derived locally
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use decisionflow::{AnthropicCaller, BuiltinPrompts, DecisionRequest, Orchestrator, PipelineConfig, TracingSink};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::from_env()?;
//! let model = Arc::new(AnthropicCaller::from_env(config.model.model.clone())?);
//! let orchestrator = Orchestrator::new(config, model, Arc::new(BuiltinPrompts), Arc::new(TracingSink))?;
//!
//! let request = DecisionRequest::new(
//!     "Pick a cloud provider for the analytics platform",
//!     vec!["AWS".into(), "GCP".into()],
//! );
//! match orchestrator.run(request).await {
//!     Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
//!     Err(err) => eprintln!("{}", serde_json::to_string_pretty(&err.envelope())?),
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  request ─▶ Clarifier ─▶ CriteriaBuilder ─▶ BiasChecker      │
//! │                │            ─▶ OptionEvaluator (per option)  │
//! │                │            ─▶ DecisionSynthesizer ─▶ response│
//! │                └─▶ NEEDS_INFO                                │
//! └───────┬──────────────────┬──────────────────┬────────────────┘
//!         │                  │                  │
//!   PipelineState      ContractValidator    RetryingCaller
//!   (write-once)       (+ one repair)       (timeout, retry, cancel)
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod scoring;
pub mod stages;
pub mod state;
pub mod types;
pub mod validation;

// Core types
pub use types::*;

// Pipeline
pub use config::{PipelineConfig, RetryPolicy, ScoringConstants, VersionInfo};
pub use error::{ErrorCode, ErrorEnvelope, ModelError, PipelineError, RunError};
pub use orchestrator::Orchestrator;
pub use state::{PipelineState, StageName};

// Model access
pub use model::{AnthropicCaller, ModelCaller, PromptSpec, RetryingCaller};
pub use prompts::{BuiltinPrompts, DirectoryPrompts, PromptProvider, PromptTemplate};

// Validation, scoring, audit
pub use audit::{MemorySink, ObservabilitySink, StageAuditRecord, TracingSink, ValidationOutcome};
pub use scoring::ConfidenceScorer;
pub use validation::{ContractName, ContractValidator, Violation};
