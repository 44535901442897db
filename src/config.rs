//! Pipeline configuration
//!
//! Built once, validated, then shared read-only by the orchestrator.
//! The scoring constants belong to a logic version: changing any of them
//! means shipping a new logic version.

use crate::types::BiasType;
use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_LOGIC_VERSION: &str = "v1.0.0";

/// Upper bound on retries after the first model call
pub const MAX_RETRIES: u32 = 2;

/// API / logic / schema version triplet stamped on every response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub api_version: String,
    /// Prompt bundle + scoring constants version
    pub logic_version: String,
    pub schema_version: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            api_version: "v1".to_string(),
            logic_version: DEFAULT_LOGIC_VERSION.to_string(),
            schema_version: "v1.0.0".to_string(),
        }
    }
}

/// Tunable confidence constants for one logic version
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConstants {
    pub logic_version: String,
    pub completeness_weight: f64,
    pub agreement_weight: f64,
    pub evidence_weight: f64,
    pub bias_weight: f64,
    /// Number of input fields the clarifier can report missing
    pub expected_field_count: usize,
    /// Top-two margin at which agreement saturates at 1.0
    pub agreement_margin_saturation: f64,
    /// Shorter justifications do not count as evidence
    pub min_justification_chars: usize,
    pub sunk_cost_severity: f64,
    pub confirmation_severity: f64,
    pub optimism_severity: f64,
    pub authority_severity: f64,
    /// Totals closer than this are tied
    pub tie_epsilon: f64,
}

impl ScoringConstants {
    pub fn v1() -> Self {
        Self {
            logic_version: DEFAULT_LOGIC_VERSION.to_string(),
            completeness_weight: 0.3,
            agreement_weight: 0.3,
            evidence_weight: 0.2,
            bias_weight: 0.2,
            expected_field_count: 4,
            agreement_margin_saturation: 0.25,
            min_justification_chars: 12,
            sunk_cost_severity: 0.25,
            confirmation_severity: 0.20,
            optimism_severity: 0.15,
            authority_severity: 0.15,
            tie_epsilon: 1e-9,
        }
    }

    /// Constants shipped for `logic_version`, if any
    pub fn for_version(logic_version: &str) -> Option<Self> {
        match logic_version {
            DEFAULT_LOGIC_VERSION => Some(Self::v1()),
            _ => None,
        }
    }

    pub fn severity(&self, bias: BiasType) -> f64 {
        match bias {
            BiasType::SunkCost => self.sunk_cost_severity,
            BiasType::Confirmation => self.confirmation_severity,
            BiasType::Optimism => self.optimism_severity,
            BiasType::Authority => self.authority_severity,
        }
    }

    fn validate(&self) -> Result<()> {
        let weights = [
            self.completeness_weight,
            self.agreement_weight,
            self.evidence_weight,
            self.bias_weight,
        ];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            anyhow::bail!("confidence weights must lie in [0,1]: {:?}", weights);
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            anyhow::bail!("confidence weights must sum to 1.0, got {}", sum);
        }
        if self.expected_field_count == 0 {
            anyhow::bail!("expected_field_count must be positive");
        }
        if self.agreement_margin_saturation <= 0.0 {
            anyhow::bail!("agreement_margin_saturation must be positive");
        }
        if BiasType::ALL.iter().any(|b| self.severity(*b) < 0.0) {
            anyhow::bail!("bias severities must be non-negative");
        }
        Ok(())
    }
}

impl Default for ScoringConstants {
    fn default() -> Self {
        Self::v1()
    }
}

/// Retry policy for transient model failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (2 => 3 attempts total)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the delay
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Generation settings passed through to the model caller
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
    /// 0.0 keeps runs reproducible
    pub temperature: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 2000,
            temperature: 0.0,
        }
    }
}

/// Bounds enforced by the request contract
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLimits {
    pub min_context_chars: usize,
    pub max_context_chars: usize,
    pub min_options: usize,
    pub max_options: usize,
    pub max_option_chars: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            min_context_chars: 10,
            max_context_chars: 10_000,
            min_options: 2,
            max_options: 20,
            max_option_chars: 200,
        }
    }
}

/// Everything the orchestrator needs, fixed for its lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub versions: VersionInfo,
    pub scoring: ScoringConstants,
    pub retry: RetryPolicy,
    pub model: ModelSettings,
    pub limits: RequestLimits,
    /// Bound on a single model call
    pub call_timeout: Duration,
    /// Bound on one stage, including its repair pass
    pub stage_timeout: Duration,
    /// Bound on the whole run
    pub global_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            versions: VersionInfo::default(),
            scoring: ScoringConstants::v1(),
            retry: RetryPolicy::default(),
            model: ModelSettings::default(),
            limits: RequestLimits::default(),
            call_timeout: Duration::from_secs(30),
            stage_timeout: Duration::from_secs(60),
            global_deadline: Duration::from_secs(180),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `DECISIONFLOW_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("DECISIONFLOW_API_VERSION") {
            config.versions.api_version = v;
        }
        if let Some(v) = lookup("DECISIONFLOW_LOGIC_VERSION") {
            config.scoring = ScoringConstants::for_version(&v)
                .with_context(|| format!("no scoring constants ship for logic version {}", v))?;
            config.versions.logic_version = v;
        }
        if let Some(v) = lookup("DECISIONFLOW_SCHEMA_VERSION") {
            config.versions.schema_version = v;
        }
        if let Some(v) = lookup("DECISIONFLOW_MODEL") {
            config.model.model = v;
        }
        if let Some(v) = lookup("DECISIONFLOW_MAX_TOKENS") {
            config.model.max_tokens = v
                .parse()
                .with_context(|| format!("DECISIONFLOW_MAX_TOKENS is not a number: {}", v))?;
        }
        if let Some(v) = lookup("DECISIONFLOW_MAX_RETRIES") {
            config.retry.max_retries = v
                .parse()
                .with_context(|| format!("DECISIONFLOW_MAX_RETRIES is not a number: {}", v))?;
        }
        if let Some(secs) = parse_secs(&lookup, "DECISIONFLOW_CALL_TIMEOUT_SECS")? {
            config.call_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "DECISIONFLOW_STAGE_TIMEOUT_SECS")? {
            config.stage_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "DECISIONFLOW_DEADLINE_SECS")? {
            config.global_deadline = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent configurations before any request runs
    pub fn validate(&self) -> Result<()> {
        if self.scoring.logic_version != self.versions.logic_version {
            anyhow::bail!(
                "scoring constants belong to logic version {} but pipeline runs {}",
                self.scoring.logic_version,
                self.versions.logic_version
            );
        }
        self.scoring.validate()?;
        if self.call_timeout.is_zero() || self.stage_timeout.is_zero() || self.global_deadline.is_zero() {
            anyhow::bail!("timeouts must be non-zero");
        }
        if self.retry.max_retries > MAX_RETRIES {
            anyhow::bail!(
                "max_retries is {} but at most {} retries are allowed",
                self.retry.max_retries,
                MAX_RETRIES
            );
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            anyhow::bail!("jitter_ratio must lie in [0,1]");
        }
        if self.limits.min_options < 2 || self.limits.min_options > self.limits.max_options {
            anyhow::bail!(
                "option limits are inconsistent: {}..={}",
                self.limits.min_options,
                self.limits.max_options
            );
        }
        Ok(())
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    match lookup(key) {
        Some(v) => {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("{} is not a whole number of seconds: {}", key, v))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_weights() {
        let s = ScoringConstants::v1();
        assert_eq!(s.completeness_weight, 0.3);
        assert_eq!(s.agreement_weight, 0.3);
        assert_eq!(s.evidence_weight, 0.2);
        assert_eq!(s.bias_weight, 0.2);
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("DECISIONFLOW_MAX_RETRIES", "1"),
            ("DECISIONFLOW_DEADLINE_SECS", "42"),
            ("DECISIONFLOW_MODEL", "claude-test"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.global_deadline, Duration::from_secs(42));
        assert_eq!(config.model.model, "claude-test");
    }

    #[test]
    fn test_logic_version_override_loads_its_constants() {
        let config = PipelineConfig::from_lookup(lookup_from(&[(
            "DECISIONFLOW_LOGIC_VERSION",
            "v1.0.0",
        )]))
        .unwrap();
        assert_eq!(config.scoring, ScoringConstants::v1());
        assert_eq!(config.versions.logic_version, "v1.0.0");
    }

    #[test]
    fn test_unknown_logic_version_rejected() {
        let err = PipelineConfig::from_lookup(lookup_from(&[(
            "DECISIONFLOW_LOGIC_VERSION",
            "v1.1.0",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("v1.1.0"));
    }

    #[test]
    fn test_retries_capped_at_two() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("DECISIONFLOW_MAX_RETRIES", "5")]))
            .unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        let mut config = PipelineConfig::default();
        config.retry.max_retries = MAX_RETRIES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_number_is_reported() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("DECISIONFLOW_MAX_RETRIES", "two")]))
            .unwrap_err();
        assert!(err.to_string().contains("DECISIONFLOW_MAX_RETRIES"));
    }

    #[test]
    fn test_mismatched_scoring_version_rejected() {
        let mut config = PipelineConfig::default();
        config.scoring.logic_version = "v0.9.0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = PipelineConfig::default();
        config.scoring.bias_weight = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(10));
    }
}
