//! Error types for the decision pipeline.
//!
//! A request ends in exactly one of these, or in a validated outcome.

use crate::state::StateError;
use crate::validation::Violation;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Why a transient failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    Timeout,
    Network,
    /// 5xx from the provider
    Server,
}

/// Failures reported by a model caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// Worth retrying: timeouts, network failures, 5xx.
    #[error("transient model failure ({kind:?}): {message}")]
    Transient { kind: TransientKind, message: String },

    /// Never retried: 4xx, malformed prompt spec, unusable body.
    #[error("permanent model failure: {message}")]
    Permanent { message: String },

    /// The surrounding deadline cancelled the call.
    #[error("model call cancelled")]
    Cancelled,
}

impl ModelError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short code for logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transient {
                kind: TransientKind::Timeout,
                ..
            } => "timeout",
            Self::Transient {
                kind: TransientKind::Network,
                ..
            } => "network",
            Self::Transient {
                kind: TransientKind::Server,
                ..
            } => "server_error",
            Self::Permanent { .. } => "permanent",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The externally visible error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    SchemaValidationFailed,
    ModelTransientError,
    ModelPermanentError,
    Timeout,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            ErrorCode::ModelTransientError => "MODEL_TRANSIENT_ERROR",
            ErrorCode::ModelPermanentError => "MODEL_PERMANENT_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Everything that can stop a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The inbound request broke its contract.
    #[error("request validation failed with {} violation(s)", violations.len())]
    Validation { violations: Vec<Violation> },

    /// A stage output (or the assembled response) was still invalid after repair.
    #[error("{stage} output failed schema validation after repair")]
    SchemaValidationFailed {
        stage: String,
        violations: Vec<Violation>,
    },

    /// Model failure that survived the retry wrapper.
    #[error("model call failed during {stage}: {source}")]
    Model {
        stage: String,
        #[source]
        source: ModelError,
    },

    /// Stage timeout or global deadline.
    #[error("deadline exceeded during {stage} after {elapsed_ms}ms")]
    Timeout { stage: String, elapsed_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn model(stage: impl Into<String>, source: ModelError) -> Self {
        Self::Model {
            stage: stage.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::SchemaValidationFailed { .. } => ErrorCode::SchemaValidationFailed,
            Self::Model {
                source: ModelError::Transient { .. },
                ..
            } => ErrorCode::ModelTransientError,
            Self::Model {
                source: ModelError::Permanent { .. },
                ..
            } => ErrorCode::ModelPermanentError,
            // Only a deadline cancels calls
            Self::Model {
                source: ModelError::Cancelled,
                ..
            } => ErrorCode::Timeout,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Structured context for the error envelope
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { violations } => Some(json!({ "violations": violations })),
            Self::SchemaValidationFailed { stage, violations } => Some(json!({
                "stage": stage,
                "violations": violations,
            })),
            Self::Model { stage, source } => Some(json!({
                "stage": stage,
                "reason": source.code(),
            })),
            Self::Timeout { stage, elapsed_ms } => Some(json!({
                "stage": stage,
                "elapsed_ms": elapsed_ms,
            })),
            Self::Internal(_) => None,
        }
    }
}

impl From<StateError> for PipelineError {
    fn from(err: StateError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A failed run: the typed error plus the request it belongs to
#[derive(Debug, Error)]
#[error("request {request_id} failed: {error}")]
pub struct RunError {
    pub request_id: String,
    #[source]
    pub error: PipelineError,
}

impl RunError {
    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.code(),
                message: self.error.to_string(),
                details: self.error.details(),
            },
            request_id: self.request_id.clone(),
        }
    }
}

/// Serializable error body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
