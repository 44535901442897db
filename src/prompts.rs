//! Prompt templates, versioned by logic version
//!
//! Stages ask a `PromptProvider` for a named template and render it with
//! their projection. Placeholders look like `{decision_context}`; anything
//! else in braces (JSON examples) passes through untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Every template a logic version has to ship
pub const PROMPT_NAMES: [&str; 6] = [
    "clarifier",
    "criteria_builder",
    "bias_checker",
    "option_evaluator",
    "decision_synthesizer",
    "repair",
];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no prompt '{name}' for logic version {logic_version}")]
    NotFound { name: String, logic_version: String },

    #[error("failed to read prompt file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt '{name}' references unknown variable {{{variable}}}")]
    MissingVariable { name: String, variable: String },
}

/// A raw template body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: String,
    pub logic_version: String,
    pub body: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, logic_version: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logic_version: logic_version.into(),
            body: body.into(),
        }
    }

    /// Substitute `{var}` placeholders. Unknown placeholders are an error.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match placeholder(after) {
                Some(var) => {
                    let value = vars
                        .iter()
                        .find(|(k, _)| *k == var)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| PromptError::MissingVariable {
                            name: self.name.clone(),
                            variable: var.to_string(),
                        })?;
                    out.push_str(value);
                    rest = &after[var.len() + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// `name}` at the start of `s`, where name is a lowercase identifier
fn placeholder(s: &str) -> Option<&str> {
    let end = s.find('}')?;
    let candidate = &s[..end];
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !(first.is_ascii_lowercase() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Some(candidate)
    } else {
        None
    }
}

/// Source of prompt templates
pub trait PromptProvider: Send + Sync {
    fn get(&self, name: &str, logic_version: &str) -> Result<PromptTemplate, PromptError>;
}

// ============================================================================
// BUILT-IN TEMPLATES
// ============================================================================

/// Templates compiled into the binary
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPrompts;

impl BuiltinPrompts {
    pub const LOGIC_VERSION: &'static str = "v1.0.0";
}

impl PromptProvider for BuiltinPrompts {
    fn get(&self, name: &str, logic_version: &str) -> Result<PromptTemplate, PromptError> {
        let body = if logic_version == Self::LOGIC_VERSION {
            builtin_v1(name)
        } else {
            None
        };
        body.map(|b| PromptTemplate::new(name, logic_version, b))
            .ok_or_else(|| PromptError::NotFound {
                name: name.to_string(),
                logic_version: logic_version.to_string(),
            })
    }
}

fn builtin_v1(name: &str) -> Option<&'static str> {
    let body = match name {
        "clarifier" => CLARIFIER_V1,
        "criteria_builder" => CRITERIA_BUILDER_V1,
        "bias_checker" => BIAS_CHECKER_V1,
        "option_evaluator" => OPTION_EVALUATOR_V1,
        "decision_synthesizer" => DECISION_SYNTHESIZER_V1,
        "repair" => REPAIR_V1,
        _ => return None,
    };
    Some(body)
}

const CLARIFIER_V1: &str = r#"You are reviewing a decision request before it is analyzed.

Decision context:
{decision_context}

Options (in order):
{options}

Constraints:
{constraints}

Criteria preferences:
{criteria_preferences}

Decide whether there is enough information to compare the options.
Only report a field as missing when the analysis genuinely cannot proceed without it.
If information is missing, ask one explicit question per gap.

Respond with JSON only:
{"is_sufficient": true, "missing_fields": [], "questions": []}"#;

const CRITERIA_BUILDER_V1: &str = r#"You are defining how a decision should be judged.

Decision context:
{decision_context}

Options:
{options}

Constraints:
{constraints}

Criteria the requester cares about:
{criteria_preferences}

Clarifier notes:
{clarification}

Propose between 3 and 7 evaluation criteria. Give each a non-negative weight
reflecting its importance (weights will be normalized) and a one-sentence rationale.
Include every requested criterion.

Respond with JSON only:
{"criteria": [{"name": "...", "weight": 0.3, "rationale": "..."}]}"#;

const BIAS_CHECKER_V1: &str = r#"You are auditing a decision framing for cognitive bias.

Decision context:
{decision_context}

Options:
{options}

Criteria:
{criteria}

Check only for these bias types: sunk_cost, confirmation, optimism, authority.
Report a finding only when the framing itself shows it, and quote the evidence.
Do not recommend an option.

Respond with JSON only:
{"bias_findings": [{"type": "sunk_cost", "description": "...", "evidence": "..."}]}"#;

const OPTION_EVALUATOR_V1: &str = r#"You are scoring one option of a decision against fixed criteria.

Decision context:
{decision_context}

Option under evaluation:
{option}

Criteria:
{criteria}

Score the option on every criterion from 0.0 (worst) to 1.0 (best).
Judge this option on its own merits. Justify each score in one or two sentences.

Respond with JSON only:
{"scores": [{"criterion_name": "...", "score": 0.5, "justification": "..."}]}"#;

const DECISION_SYNTHESIZER_V1: &str = r#"You are explaining a decision that has already been scored.

Decision context:
{decision_context}

Recommended option: {winner}

Weighted totals:
{option_totals}

Criteria:
{criteria}

Bias findings:
{bias_findings}

Do not change the recommendation. For each option give its main upside and downside,
list the assumptions the recommendation rests on, and list what would change the decision.

Respond with JSON only:
{"trade_offs": [{"option": "...", "upside": "...", "downside": "..."}], "assumptions": ["..."], "what_would_change_decision": ["..."]}"#;

const REPAIR_V1: &str = r#"A previous answer did not satisfy the {contract} contract.

JSON schema:
{json_schema}

Violations:
{violations}

Return a corrected JSON document that satisfies the schema and fixes every violation.
Respond with JSON only."#;

// ============================================================================
// DIRECTORY TEMPLATES
// ============================================================================

/// Templates loaded from `<root>/<logic_version>/<name>.txt`, cached after first read
#[derive(Debug)]
pub struct DirectoryPrompts {
    root: PathBuf,
    cache: Mutex<HashMap<(String, String), PromptTemplate>>,
}

impl DirectoryPrompts {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, name: &str, logic_version: &str) -> PathBuf {
        self.root.join(logic_version).join(format!("{}.txt", name))
    }

    /// Names from `PROMPT_NAMES` with no file for this version
    pub fn missing(&self, logic_version: &str) -> Vec<&'static str> {
        PROMPT_NAMES
            .iter()
            .copied()
            .filter(|name| !self.path_for(name, logic_version).is_file())
            .collect()
    }
}

impl PromptProvider for DirectoryPrompts {
    fn get(&self, name: &str, logic_version: &str) -> Result<PromptTemplate, PromptError> {
        let key = (name.to_string(), logic_version.to_string());
        if let Ok(cache) = self.cache.lock() {
            if let Some(template) = cache.get(&key) {
                return Ok(template.clone());
            }
        }

        let path = self.path_for(name, logic_version);
        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PromptError::NotFound {
                    name: name.to_string(),
                    logic_version: logic_version.to_string(),
                })
            }
            Err(source) => return Err(PromptError::Io { path, source }),
        };

        let template = PromptTemplate::new(name, logic_version, body);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, template.clone());
        }
        Ok(template)
    }
}
