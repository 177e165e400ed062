//! Intake, validation and merging of externally proposed rules.
//!
//! Proposals come from an untrusted collaborator (typically a language
//! model shown the failure list). Nothing reaches the rule store before it
//! has passed a structural check and a regression run over a corpus.

mod diff;
mod validator;

pub use diff::{FieldChange, ReportDiff, diff_reports};
pub use validator::{MergeEvaluation, MergeValidator};

use serde::{Deserialize, Serialize};

use crate::rules::RuleSpec;

/// A candidate rule as received from the external collaborator.
///
/// Every field is optional on the wire so that malformed candidates can be
/// rejected individually instead of failing the whole batch at parse time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposedRule {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, alias = "regex")]
    pub pattern: String,

    /// Expected to be a list of non-empty strings when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl ProposedRule {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| serde_json::Value::String(k.into()))
            .collect();
        self.keywords = Some(serde_json::Value::Array(keywords));
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl From<RuleSpec> for ProposedRule {
    fn from(spec: RuleSpec) -> Self {
        Self {
            name: spec.name,
            field: spec.field,
            pattern: spec.pattern,
            keywords: Some(serde_json::Value::from(spec.keywords)),
            priority: Some(spec.priority),
        }
    }
}

/// Candidate rules tagged with the revision they were generated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedRuleBatch {
    pub base_revision: u64,
    #[serde(default)]
    pub rules: Vec<ProposedRule>,
}

impl ProposedRuleBatch {
    pub fn new(base_revision: u64, rules: Vec<ProposedRule>) -> Self {
        Self {
            base_revision,
            rules,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A proposed rule that failed the structural check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRule {
    /// Name as proposed (may be empty).
    pub name: String,
    pub reason: String,
}

/// Outcome class of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStatus {
    /// No regressions; the merged rule set was (or may be) published.
    Accepted,
    /// Regressions found; nothing is published until a caller confirms.
    NeedsConfirmation,
    /// Nothing to merge: empty batch or every rule rejected.
    NoChange,
}

/// What the validator decided and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub status: MergeStatus,

    /// Revision the proposal was validated against.
    pub base_revision: u64,

    /// Revision published for this merge, once committed.
    pub revision: Option<u64>,

    /// Whether the merge was committed through an explicit confirmation.
    #[serde(default)]
    pub confirmed: bool,

    /// Names of rules added.
    pub additions: Vec<String>,

    /// Names of existing rules superseded.
    pub replacements: Vec<String>,

    pub rejected: Vec<RejectedRule>,

    /// Fields that extracted before and fail after.
    pub regressions: Vec<FieldChange>,

    /// Fields that start extracting, or move from LOW to HIGH.
    pub improvements: Vec<FieldChange>,

    /// Fields whose value changed, or that dropped from HIGH to LOW.
    ///
    /// A LOW to HIGH move that also changes the value is listed here as well
    /// as under `improvements`, so the value-change policy still sees it.
    pub changes: Vec<FieldChange>,
}

impl MergeDecision {
    pub fn is_committed(&self) -> bool {
        self.revision.is_some()
    }

    pub(crate) fn no_change(base_revision: u64, rejected: Vec<RejectedRule>) -> Self {
        Self {
            status: MergeStatus::NoChange,
            base_revision,
            revision: None,
            confirmed: false,
            additions: Vec::new(),
            replacements: Vec::new(),
            rejected,
            regressions: Vec::new(),
            improvements: Vec::new(),
            changes: Vec::new(),
        }
    }
}

/// A validated merge: the decision plus the full candidate rule list.
///
/// Serializable so a `NEEDS_CONFIRMATION` outcome can be kept and confirmed
/// in a later, separate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub base_revision: u64,
    pub candidate: Vec<RuleSpec>,
    pub decision: MergeDecision,
}

