//! Structural check, regression run and commit of proposed rule batches.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::error::{MergeError, Result, StoreError};
use crate::extraction::{ExtractionRunner, RuleMatcher, RunReport};
use crate::models::config::MergeConfig;
use crate::models::document::Document;
use crate::rules::{RevisionOrigin, RuleSet, RuleSpec, RuleStore, compile_pattern};

use super::diff::diff_reports;
use super::{MergeDecision, MergePlan, MergeStatus, ProposedRule, ProposedRuleBatch, RejectedRule};

/// A merge plan together with the two regression runs behind it.
#[derive(Debug, Clone)]
pub struct MergeEvaluation {
    pub plan: MergePlan,
    /// Current rule set over the corpus. Absent when nothing was run.
    pub before: Option<RunReport>,
    /// Candidate rule set over the corpus. Absent when nothing was run.
    pub after: Option<RunReport>,
}

/// Guards the rule store against proposals that break working extractions.
#[derive(Debug, Clone, Default)]
pub struct MergeValidator {
    policy: MergeConfig,
}

impl MergeValidator {
    pub fn new(policy: MergeConfig) -> Self {
        Self { policy }
    }

    /// Validate `batch` against `current` without touching any store.
    ///
    /// Fails only on a stale batch. Structural problems reject individual
    /// rules; regressions are reported in the decision.
    pub fn evaluate<M: RuleMatcher>(
        &self,
        runner: &ExtractionRunner<M>,
        current: &RuleSet,
        batch: &ProposedRuleBatch,
        corpus: &[Document],
    ) -> std::result::Result<MergeEvaluation, MergeError> {
        let base_revision = current.revision();
        if batch.base_revision != base_revision {
            warn!(
                "Rejecting proposal for revision {}, current is {}",
                batch.base_revision, base_revision
            );
            return Err(MergeError::StaleProposal {
                proposed: batch.base_revision,
                current: base_revision,
            });
        }

        let (accepted, rejected) = structural_check(current, &batch.rules);
        for rule in &rejected {
            warn!("Rejected proposed rule '{}': {}", rule.name, rule.reason);
        }

        if accepted.is_empty() {
            info!(
                "Proposal against revision {} has nothing to merge ({} rejected)",
                base_revision,
                rejected.len()
            );
            return Ok(MergeEvaluation {
                plan: MergePlan {
                    base_revision,
                    candidate: current.specs(),
                    decision: MergeDecision::no_change(base_revision, rejected),
                },
                before: None,
                after: None,
            });
        }

        let mut candidate = current.specs();
        let mut additions = Vec::new();
        let mut replacements = Vec::new();
        let mut attribution: HashMap<String, Vec<String>> = HashMap::new();

        for spec in accepted {
            let attribute = |attribution: &mut HashMap<String, Vec<String>>, field: &str| {
                let names = attribution.entry(field.to_string()).or_default();
                if !names.contains(&spec.name) {
                    names.push(spec.name.clone());
                }
            };
            attribute(&mut attribution, spec.field_name());

            match replacement_index(current, &spec.name) {
                Some(index) => {
                    attribute(&mut attribution, candidate[index].field_name());
                    replacements.push(spec.name.clone());
                    candidate[index] = spec;
                }
                None => {
                    additions.push(spec.name.clone());
                    candidate.push(spec);
                }
            }
        }

        let candidate_set = RuleSet::new(base_revision + 1, RevisionOrigin::Merge, candidate.clone());
        let (before, after) = runner.run_pair(current, &candidate_set, corpus);
        let diff = diff_reports(&before, &after, &attribution);

        let needs_confirmation = !diff.regressions.is_empty()
            || (self.policy.confirm_value_changes && !diff.changes.is_empty());
        let status = if needs_confirmation {
            MergeStatus::NeedsConfirmation
        } else {
            MergeStatus::Accepted
        };

        info!(
            "Proposal against revision {}: {} added, {} replaced, {} rejected, {} regressions, {} improvements -> {:?}",
            base_revision,
            additions.len(),
            replacements.len(),
            rejected.len(),
            diff.regressions.len(),
            diff.improvements.len(),
            status
        );

        Ok(MergeEvaluation {
            plan: MergePlan {
                base_revision,
                candidate,
                decision: MergeDecision {
                    status,
                    base_revision,
                    revision: None,
                    confirmed: false,
                    additions,
                    replacements,
                    rejected,
                    regressions: diff.regressions,
                    improvements: diff.improvements,
                    changes: diff.changes,
                },
            },
            before: Some(before),
            after: Some(after),
        })
    }

    /// Validate `batch` against the store's active revision and publish the
    /// merged rule set when it is auto-accepted.
    pub fn validate_and_merge<M: RuleMatcher>(
        &self,
        store: &RuleStore,
        runner: &ExtractionRunner<M>,
        batch: &ProposedRuleBatch,
        corpus: &[Document],
    ) -> Result<MergeEvaluation> {
        let current = store.get_active();
        let mut evaluation = self.evaluate(runner, &current, batch, corpus)?;

        if evaluation.plan.decision.status == MergeStatus::Accepted {
            let revision = publish(store, &evaluation.plan)?;
            evaluation.plan.decision.revision = Some(revision);
        }

        Ok(evaluation)
    }

    /// Commit a plan that was waiting for confirmation.
    ///
    /// Plans in any other state are returned unchanged. Fails with
    /// [`MergeError::StaleProposal`] if the store moved on since the plan
    /// was validated.
    pub fn confirm(&self, store: &RuleStore, plan: &MergePlan) -> Result<MergeDecision> {
        let mut decision = plan.decision.clone();
        if decision.status != MergeStatus::NeedsConfirmation {
            return Ok(decision);
        }

        let revision = publish(store, plan)?;
        info!(
            "Confirmed merge against revision {} with {} regressions",
            plan.base_revision,
            decision.regressions.len()
        );

        decision.status = MergeStatus::Accepted;
        decision.revision = Some(revision);
        decision.confirmed = true;
        Ok(decision)
    }
}

fn publish(store: &RuleStore, plan: &MergePlan) -> Result<u64> {
    store
        .publish(plan.base_revision, RevisionOrigin::Merge, plan.candidate.clone())
        .map_err(|e| match e {
            StoreError::RevisionConflict { expected, current } => MergeError::StaleProposal {
                proposed: expected,
                current,
            }
            .into(),
            other => other.into(),
        })
}

/// Index of the existing rule a proposal with `name` supersedes: the enabled
/// rule of that name, or failing that a disabled one.
fn replacement_index(current: &RuleSet, name: &str) -> Option<usize> {
    let rules = current.rules();
    rules
        .iter()
        .position(|r| r.is_enabled() && r.name() == name)
        .or_else(|| rules.iter().position(|r| r.name() == name))
}

/// Split proposals into well-formed specs and rejections. Later duplicates
/// of a name within the batch are rejected.
fn structural_check(current: &RuleSet, proposed: &[ProposedRule]) -> (Vec<RuleSpec>, Vec<RejectedRule>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    let mut seen = HashSet::new();

    for rule in proposed {
        let name = rule.name.trim();
        let outcome = if name.is_empty() {
            Err("name is empty".to_string())
        } else if !seen.insert(name.to_string()) {
            Err(format!("duplicate name '{}' in batch", name))
        } else {
            to_spec(current, name, rule)
        };

        match outcome {
            Ok(spec) => accepted.push(spec),
            Err(reason) => rejected.push(RejectedRule {
                name: rule.name.clone(),
                reason,
            }),
        }
    }

    (accepted, rejected)
}

fn to_spec(current: &RuleSet, name: &str, rule: &ProposedRule) -> std::result::Result<RuleSpec, String> {
    if rule.pattern.is_empty() {
        return Err("pattern is empty".to_string());
    }
    let regex = compile_pattern(name, &rule.pattern).map_err(|e| e.to_string())?;
    if regex.is_match("") {
        return Err("pattern matches empty text".to_string());
    }

    let keywords = match &rule.keywords {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item.as_str().map(str::trim) {
                Some(k) if !k.is_empty() => Ok(k.to_string()),
                _ => Err(format!("keyword {} is not a non-empty string", item)),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?,
        Some(other) => return Err(format!("keywords must be a list, got {}", other)),
    };

    if let Some(field) = &rule.field {
        if field.trim().is_empty() {
            return Err("field is empty".to_string());
        }
    }

    // Replacements keep the superseded rule's priority unless one is given.
    let priority = rule.priority.unwrap_or_else(|| {
        replacement_index(current, name)
            .map(|i| current.rules()[i].priority())
            .unwrap_or(0)
    });

    let mut spec = RuleSpec::new(name, rule.pattern.clone())
        .with_keywords(keywords)
        .with_priority(priority);
    spec.field = rule.field.as_ref().map(|f| f.trim().to_string());
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::Confidence;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn lvef() -> RuleSpec {
        RuleSpec::new("LVEF", r"LVEF\s*(\d+)%").with_keywords(["LVEF"])
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("d1", "LVEF 55% normal"),
            Document::new("d2", "LVEF: 40%"),
            Document::new("d3", "PASP 45 mmHg"),
        ]
    }

    fn setup() -> (TempDir, RuleStore, ExtractionRunner) {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();
        let runner = ExtractionRunner::new(2).unwrap();
        (dir, store, runner)
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (_dir, store, runner) = setup();
        let batch = ProposedRuleBatch::new(1, Vec::new());

        let evaluation = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap();
        let decision = &evaluation.plan.decision;

        assert_eq!(decision.status, MergeStatus::NoChange);
        assert!(decision.regressions.is_empty());
        assert!(decision.improvements.is_empty());
        assert_eq!(store.revision(), 1);
        assert_eq!(store.get_active().specs(), vec![lvef()]);
    }

    #[test]
    fn test_addition_without_regression_is_accepted() {
        let (_dir, store, runner) = setup();
        let batch = ProposedRuleBatch::new(
            1,
            vec![ProposedRule::new("PASP", r"PASP\s*(\d+)\s*mmHg").with_keywords(["PASP"])],
        );

        let evaluation = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap();
        let decision = &evaluation.plan.decision;

        assert_eq!(decision.status, MergeStatus::Accepted);
        assert_eq!(decision.revision, Some(2));
        assert_eq!(decision.additions, vec!["PASP"]);
        assert_eq!(decision.improvements.len(), 1);
        assert_eq!(decision.improvements[0].document_id, "d3");
        assert_eq!(decision.improvements[0].field_name, "PASP");
        assert_eq!(decision.improvements[0].after, Confidence::High);
        assert_eq!(store.revision(), 2);
        assert_eq!(store.get_active().origin(), RevisionOrigin::Merge);
    }

    #[test]
    fn test_regressing_replacement_needs_confirmation() {
        let (_dir, store, runner) = setup();
        // Only matches a colon-separated value, so d1 ("LVEF 55%") regresses.
        let batch = ProposedRuleBatch::new(
            1,
            vec![ProposedRule::new("LVEF", r"LVEF:\s*(\d+)%").with_keywords(["LVEF"])],
        );

        let evaluation = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap();
        let decision = &evaluation.plan.decision;

        assert_eq!(decision.status, MergeStatus::NeedsConfirmation);
        assert_eq!(decision.replacements, vec!["LVEF"]);
        assert_eq!(decision.regressions.len(), 1);
        assert_eq!(decision.regressions[0].document_id, "d1");
        assert_eq!(decision.regressions[0].field_name, "LVEF");
        assert_eq!(decision.regressions[0].before, Confidence::High);
        assert_eq!(decision.regressions[0].rules, vec!["LVEF"]);
        assert_eq!(decision.revision, None);
        assert_eq!(store.revision(), 1);
        assert_eq!(store.get_active().specs(), vec![lvef()]);

        let confirmed = MergeValidator::default()
            .confirm(&store, &evaluation.plan)
            .unwrap();
        assert_eq!(confirmed.status, MergeStatus::Accepted);
        assert!(confirmed.confirmed);
        assert_eq!(confirmed.revision, Some(2));
        assert_eq!(store.get_active().specs()[0].pattern, r"LVEF:\s*(\d+)%");
    }

    #[test]
    fn test_stale_batch_is_rejected() {
        let (_dir, store, runner) = setup();
        for _ in 0..4 {
            store.replace(vec![lvef()]).unwrap();
        }
        assert_eq!(store.revision(), 5);

        let batch = ProposedRuleBatch::new(3, vec![ProposedRule::new("PASP", r"PASP\s*(\d+)")]);
        let err = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap_err();

        assert!(matches!(
            err,
            crate::ClinexError::Merge(MergeError::StaleProposal { proposed: 3, current: 5 })
        ));
        assert_eq!(store.revision(), 5);
    }

    #[test]
    fn test_confirm_after_store_moved_is_stale() {
        let (_dir, store, runner) = setup();
        let batch = ProposedRuleBatch::new(1, vec![ProposedRule::new("LVEF", r"LVEF:\s*(\d+)%")]);
        let evaluation = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap();
        store.replace(vec![lvef()]).unwrap();

        let err = MergeValidator::default()
            .confirm(&store, &evaluation.plan)
            .unwrap_err();

        assert!(matches!(
            err,
            crate::ClinexError::Merge(MergeError::StaleProposal { proposed: 1, current: 2 })
        ));
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_bad_rules_do_not_block_good_ones() {
        let (_dir, store, runner) = setup();
        let mut bad_keywords = ProposedRule::new("NYHA", r"NYHA\s+([IV]+)");
        bad_keywords.keywords = Some(serde_json::json!("NYHA"));
        let batch = ProposedRuleBatch::new(
            1,
            vec![
                ProposedRule::new("", r"x"),
                ProposedRule::new("broken", r"LVEF ("),
                bad_keywords,
                ProposedRule::new("PASP", r"PASP\s*(\d+)"),
                ProposedRule::new("PASP", r"PASP:(\d+)"),
                ProposedRule::new("empty_kw", r"x").with_keywords(["ok", " "]),
            ],
        );

        let evaluation = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap();
        let decision = &evaluation.plan.decision;

        let rejected: Vec<&str> = decision.rejected.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(rejected, vec!["", "broken", "NYHA", "PASP", "empty_kw"]);
        assert_eq!(decision.additions, vec!["PASP"]);
        assert_eq!(decision.status, MergeStatus::Accepted);
        let active = store.get_active();
        assert_eq!(active.specs()[1].pattern, r"PASP\s*(\d+)");
    }

    #[test]
    fn test_all_rejected_is_no_change() {
        let (_dir, store, runner) = setup();
        let batch = ProposedRuleBatch::new(1, vec![ProposedRule::new("broken", "(")]);

        let evaluation = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap();

        assert_eq!(evaluation.plan.decision.status, MergeStatus::NoChange);
        assert_eq!(evaluation.plan.decision.rejected.len(), 1);
        assert!(evaluation.before.is_none());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_pattern_matching_empty_text_is_rejected() {
        let (_dir, store, runner) = setup();
        let batch = ProposedRuleBatch::new(
            1,
            vec![
                ProposedRule::new("PASP", r"(?:PASP\s*(\d+))?"),
                ProposedRule::new("anything", r".*"),
            ],
        );

        let evaluation = MergeValidator::default()
            .validate_and_merge(&store, &runner, &batch, &corpus())
            .unwrap();
        let decision = &evaluation.plan.decision;

        assert_eq!(decision.status, MergeStatus::NoChange);
        assert!(decision.improvements.is_empty());
        let reasons: Vec<&str> = decision.rejected.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(reasons, vec!["pattern matches empty text"; 2]);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_replacement_keeps_priority_and_position() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(
            dir.path(),
            vec![lvef().with_priority(3), RuleSpec::new("PASP", r"PASP\s*(\d+)")],
        )
        .unwrap();
        let runner = ExtractionRunner::new(1).unwrap();
        let batch = ProposedRuleBatch::new(1, vec![ProposedRule::new("LVEF", r"LVEF[:\s]*(\d+)%")]);

        let evaluation = MergeValidator::default()
            .evaluate(&runner, &store.get_active(), &batch, &corpus())
            .unwrap();

        let candidate = &evaluation.plan.candidate;
        assert_eq!(candidate.len(), 2);
        assert_eq!(candidate[0].name, "LVEF");
        assert_eq!(candidate[0].priority, 3);
        assert_eq!(candidate[0].pattern, r"LVEF[:\s]*(\d+)%");
        assert!(evaluation.plan.decision.regressions.is_empty());
        // evaluate never commits
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_value_change_policy() {
        let (_dir, store, runner) = setup();
        let policy = MergeConfig {
            confirm_value_changes: true,
        };
        // Captures the percent sign too, so values change but nothing regresses.
        let batch = ProposedRuleBatch::new(1, vec![ProposedRule::new("LVEF", r"LVEF[:\s]*(\d+%)")]);

        let lenient = MergeValidator::default()
            .evaluate(&runner, &store.get_active(), &batch, &corpus())
            .unwrap();
        let strict = MergeValidator::new(policy)
            .evaluate(&runner, &store.get_active(), &batch, &corpus())
            .unwrap();

        assert_eq!(lenient.plan.decision.status, MergeStatus::Accepted);
        assert_eq!(lenient.plan.decision.changes.len(), 1);
        assert_eq!(lenient.plan.decision.changes[0].after_value.as_deref(), Some("55%"));
        assert_eq!(strict.plan.decision.status, MergeStatus::NeedsConfirmation);
    }
}
