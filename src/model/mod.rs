//! Model access
//!
//! Stages never talk to a provider directly. They hand a `PromptSpec` to a
//! `RetryingCaller`, which owns the per-call timeout, the retry policy for
//! transient failures and cancellation.

pub mod anthropic;
#[cfg(test)]
pub(crate) mod scripted;

use crate::config::RetryPolicy;
use crate::error::{ModelError, TransientKind};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use anthropic::AnthropicCaller;

/// A fully rendered prompt plus generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptSpec {
    /// Template the prompt came from ("clarifier", "repair", ...)
    pub name: String,
    pub logic_version: String,
    /// Sub-call index when a stage fans out (one per option)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<usize>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl PromptSpec {
    /// Stable key for logs and test scripts, e.g. `option_evaluator#1`
    pub fn key(&self) -> String {
        match self.part {
            Some(part) => format!("{}#{}", self.name, part),
            None => self.name.clone(),
        }
    }
}

/// Turns a prompt spec into raw model text.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, spec: &PromptSpec) -> Result<String, ModelError>;
}

/// Central retry/timeout/cancellation wrapper around a `ModelCaller`
#[derive(Clone)]
pub struct RetryingCaller {
    inner: Arc<dyn ModelCaller>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl RetryingCaller {
    pub fn new(inner: Arc<dyn ModelCaller>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            call_timeout,
        }
    }

    /// Call the model, retrying transient failures with backoff + jitter.
    ///
    /// Permanent failures return immediately. Cancellation wins over both
    /// an in-flight call and a pending backoff sleep.
    pub async fn call(
        &self,
        spec: &PromptSpec,
        cancel: &CancellationToken,
    ) -> Result<String, ModelError> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                outcome = tokio::time::timeout(self.call_timeout, self.inner.call(spec)) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::transient(
                        TransientKind::Timeout,
                        format!("no response within {}ms", self.call_timeout.as_millis()),
                    )),
                },
            };

            match result {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.jittered_backoff(attempt);
                    tracing::warn!(
                        prompt = %spec.key(),
                        attempt = attempt + 1,
                        code = err.code(),
                        delay_ms = delay.as_millis() as u64,
                        "transient model failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::warn!(prompt = %spec.key(), attempts = attempt + 1, code = err.code(), "model retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff(attempt);
        let extra = rand::thread_rng().gen_range(0.0..=self.policy.jitter_ratio);
        base.mul_f64(1.0 + extra)
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedCaller;
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn spec(name: &str) -> PromptSpec {
        PromptSpec {
            name: name.to_string(),
            logic_version: "v1.0.0".to_string(),
            part: None,
            prompt: "prompt".to_string(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_ratio: 0.1,
        }
    }

    #[test]
    fn test_prompt_key_includes_part() {
        let mut s = spec("option_evaluator");
        assert_eq!(s.key(), "option_evaluator");
        s.part = Some(2);
        assert_eq!(s.key(), "option_evaluator#2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let scripted = Arc::new(ScriptedCaller::new());
        scripted.push_error("clarifier", ModelError::transient(TransientKind::Server, "502"));
        scripted.push_error("clarifier", ModelError::transient(TransientKind::Network, "reset"));
        scripted.push_text("clarifier", "ok");

        let caller = RetryingCaller::new(scripted.clone(), fast_policy(2), Duration::from_secs(5));
        let text = assert_ok!(caller.call(&spec("clarifier"), &CancellationToken::new()).await);

        assert_eq!(text, "ok");
        assert_eq!(scripted.calls_for("clarifier"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let scripted = Arc::new(ScriptedCaller::new());
        for _ in 0..5 {
            scripted.push_error("clarifier", ModelError::transient(TransientKind::Server, "503"));
        }

        let caller = RetryingCaller::new(scripted.clone(), fast_policy(2), Duration::from_secs(5));
        let err = assert_err!(caller.call(&spec("clarifier"), &CancellationToken::new()).await);

        assert!(matches!(err, ModelError::Transient { .. }));
        assert_eq!(scripted.calls_for("clarifier"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried() {
        let scripted = Arc::new(ScriptedCaller::new());
        scripted.push_error("clarifier", ModelError::permanent("400 bad request"));
        scripted.push_text("clarifier", "never reached");

        let caller = RetryingCaller::new(scripted.clone(), fast_policy(2), Duration::from_secs(5));
        let err = assert_err!(caller.call(&spec("clarifier"), &CancellationToken::new()).await);

        assert!(matches!(err, ModelError::Permanent { .. }));
        assert_eq!(scripted.calls_for("clarifier"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_as_transient() {
        let scripted = Arc::new(ScriptedCaller::new());
        scripted.push_delayed("clarifier", Duration::from_secs(60), "late");

        let caller = RetryingCaller::new(scripted.clone(), fast_policy(0), Duration::from_secs(1));
        let err = assert_err!(caller.call(&spec("clarifier"), &CancellationToken::new()).await);

        assert_eq!(err.code(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_call() {
        let scripted = Arc::new(ScriptedCaller::new());
        scripted.push_delayed("clarifier", Duration::from_secs(60), "late");

        let caller = RetryingCaller::new(scripted, fast_policy(2), Duration::from_secs(120));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = assert_err!(caller.call(&spec("clarifier"), &cancel).await);
        assert_eq!(err, ModelError::Cancelled);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_calls() {
        let scripted = Arc::new(ScriptedCaller::new());
        scripted.push_text("clarifier", "ok");
        let caller = RetryingCaller::new(scripted.clone(), fast_policy(2), Duration::from_secs(5));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(caller.call(&spec("clarifier"), &cancel).await, Err(ModelError::Cancelled));
        assert_eq!(scripted.calls_for("clarifier"), 0);
    }
}
