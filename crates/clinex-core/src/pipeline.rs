//! End-to-end orchestration: run, collect failures, merge proposals, re-run.
//!
//! The pipeline never talks to the rule proposer itself. Gathering failures
//! and merging a returned batch are two separate calls, so the core does not
//! depend on the proposer's latency or availability.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::extraction::{ExtractionRunner, Failure, PatternMatcher, RuleMatcher, RunReport};
use crate::merge::{MergeDecision, MergePlan, MergeStatus, MergeValidator, ProposedRuleBatch};
use crate::models::config::ClinexConfig;
use crate::models::document::Document;
use crate::rules::{RuleSet, RuleStore};

/// Decision plus before/after results for the submitted documents.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub decision: MergeDecision,

    /// Validated plan; keep it to confirm a `NEEDS_CONFIRMATION` decision.
    pub plan: MergePlan,

    /// Results under the revision the proposal was validated against.
    pub before: RunReport,

    /// Results under the published revision, or a preview of the candidate
    /// rule set when nothing was published.
    pub after: RunReport,
}

/// Ties the rule store, runner and merge validator together.
pub struct Pipeline<M = PatternMatcher> {
    store: RuleStore,
    runner: ExtractionRunner<M>,
    validator: MergeValidator,
}

impl Pipeline<PatternMatcher> {
    /// Open the store and start the worker pool described by `config`.
    pub fn from_config(config: &ClinexConfig) -> Result<Self> {
        let store = RuleStore::open(&config.rules.store_dir, config.rules.initial.clone())?;
        let runner = ExtractionRunner::new(config.extraction.workers)?;
        let validator = MergeValidator::new(config.merge.clone());
        Ok(Self::new(store, runner, validator))
    }
}

impl<M: RuleMatcher> Pipeline<M> {
    pub fn new(store: RuleStore, runner: ExtractionRunner<M>, validator: MergeValidator) -> Self {
        Self {
            store,
            runner,
            validator,
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn runner(&self) -> &ExtractionRunner<M> {
        &self.runner
    }

    /// Run the active revision over `documents`.
    pub fn run_batch(&self, documents: &[Document]) -> RunReport {
        let snapshot = self.store.get_active();
        self.runner.run(&snapshot, documents)
    }

    /// Run the active revision and return its report with the failure list.
    pub fn failures(&self, documents: &[Document]) -> (RunReport, Vec<Failure>) {
        let report = self.run_batch(documents);
        let failures = report.failures();
        (report, failures)
    }

    /// Validate and merge a proposal, using `documents` as the regression
    /// corpus, then re-run the documents for a before/after view.
    pub fn submit_proposal(
        &self,
        batch: &ProposedRuleBatch,
        documents: &[Document],
    ) -> Result<PipelineOutcome> {
        let evaluation =
            self.validator
                .validate_and_merge(&self.store, &self.runner, batch, documents)?;
        let plan = evaluation.plan;
        let decision = plan.decision.clone();

        let before = match evaluation.before {
            Some(report) => report,
            None => {
                let snapshot = self.snapshot_at(plan.base_revision)?;
                self.runner.run(&snapshot, documents)
            }
        };

        let after = match (decision.status, decision.revision, evaluation.after) {
            (MergeStatus::Accepted, Some(revision), _) => {
                let snapshot = self.snapshot_at(revision)?;
                self.runner.run(&snapshot, documents)
            }
            (MergeStatus::NeedsConfirmation, _, Some(preview)) => preview,
            _ => before.clone(),
        };

        info!(
            "Proposal outcome {:?}: {} -> {} failures",
            decision.status,
            before.failures().len(),
            after.failures().len()
        );

        Ok(PipelineOutcome {
            decision,
            plan,
            before,
            after,
        })
    }

    /// Commit a pending plan and re-run `documents` under the result.
    pub fn confirm(&self, plan: &MergePlan, documents: &[Document]) -> Result<PipelineOutcome> {
        let before = self.run_batch(documents);
        let decision = self.validator.confirm(&self.store, plan)?;

        let after = match decision.revision {
            Some(revision) => {
                let snapshot = self.snapshot_at(revision)?;
                self.runner.run(&snapshot, documents)
            }
            None => before.clone(),
        };

        Ok(PipelineOutcome {
            decision,
            plan: plan.clone(),
            before,
            after,
        })
    }

    /// The active snapshot if it is at `revision`, otherwise that revision
    /// read back from the store.
    fn snapshot_at(&self, revision: u64) -> Result<Arc<RuleSet>> {
        let active = self.store.get_active();
        if active.revision() == revision {
            return Ok(active);
        }
        Ok(Arc::new(self.store.revision_at(revision)?))
    }
}
