//! Confidence scoring and winner selection
//!
//! Pure arithmetic over committed stage outputs. No model is consulted
//! here, so the same ledger always yields the same numbers.
//!
//! aggregate = 0.3·completeness + 0.3·agreement + 0.2·evidence + 0.2·(1 − bias_penalty)

use crate::config::ScoringConstants;
use crate::types::{BiasFinding, ConfidenceBreakdown, OptionScores};
use std::collections::HashSet;

/// Inputs the scorer reads, all borrowed from the ledger
#[derive(Debug, Clone, Copy)]
pub struct ScoringInputs<'a> {
    pub missing_fields: &'a [String],
    pub option_scores: &'a [OptionScores],
    pub criteria_count: usize,
    pub bias_findings: &'a [BiasFinding],
}

pub struct ConfidenceScorer<'a> {
    constants: &'a ScoringConstants,
}

impl<'a> ConfidenceScorer<'a> {
    pub fn new(constants: &'a ScoringConstants) -> Self {
        Self { constants }
    }

    /// 1 when nothing is missing, falling linearly to 0 at `expected_field_count`
    pub fn completeness(&self, missing_fields: &[String]) -> f64 {
        let expected = self.constants.expected_field_count.max(1);
        let missing: HashSet<String> = missing_fields
            .iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        let missing = missing.len().min(expected);
        clamp_unit(1.0 - missing as f64 / expected as f64)
    }

    /// How clearly the winner beats the runner-up.
    /// A dead heat scores 0.5; a margin of `agreement_margin_saturation` or more scores 1.
    pub fn agreement(&self, option_scores: &[OptionScores]) -> f64 {
        let mut totals: Vec<f64> = option_scores.iter().map(|o| o.total_score).collect();
        if totals.len() < 2 {
            return 1.0;
        }
        totals.sort_by(|a, b| b.total_cmp(a));
        let margin = totals[0] - totals[1];
        if margin <= self.constants.tie_epsilon {
            return 0.5;
        }
        let saturation = self.constants.agreement_margin_saturation;
        clamp_unit(0.5 + 0.5 * (margin / saturation).min(1.0))
    }

    /// Share of (option, criterion) cells backed by a substantive justification
    pub fn evidence_strength(&self, option_scores: &[OptionScores], criteria_count: usize) -> f64 {
        let cells = option_scores.len() * criteria_count;
        if cells == 0 {
            return 0.0;
        }
        let min_chars = self.constants.min_justification_chars;
        let backed = option_scores
            .iter()
            .flat_map(|o| o.scores.iter())
            .filter(|s| s.justification.trim().chars().count() >= min_chars)
            .count();
        clamp_unit(backed as f64 / cells as f64)
    }

    /// Sum of per-type severities, capped at 1
    pub fn bias_penalty(&self, findings: &[BiasFinding]) -> f64 {
        let total: f64 = findings
            .iter()
            .map(|f| self.constants.severity(f.bias_type))
            .sum();
        clamp_unit(total)
    }

    pub fn score(&self, inputs: ScoringInputs<'_>) -> ConfidenceBreakdown {
        let completeness = self.completeness(inputs.missing_fields);
        let agreement = self.agreement(inputs.option_scores);
        let evidence_strength = self.evidence_strength(inputs.option_scores, inputs.criteria_count);
        let bias_penalty = self.bias_penalty(inputs.bias_findings);

        let c = self.constants;
        let aggregate = clamp_unit(
            c.completeness_weight * completeness
                + c.agreement_weight * agreement
                + c.evidence_weight * evidence_strength
                + c.bias_weight * (1.0 - bias_penalty),
        );

        ConfidenceBreakdown {
            completeness,
            agreement,
            evidence_strength,
            bias_penalty,
            aggregate,
        }
    }
}

/// Index of the highest total. Ties go to the earliest option in input order.
pub fn select_winner(option_scores: &[OptionScores], tie_epsilon: f64) -> Option<usize> {
    let best = option_scores
        .iter()
        .map(|o| o.total_score)
        .fold(f64::NEG_INFINITY, f64::max);
    option_scores
        .iter()
        .position(|o| o.total_score >= best - tie_epsilon)
}

pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
