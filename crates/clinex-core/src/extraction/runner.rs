//! Batch extraction over a worker pool.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::document::{Document, ExtractionResult};
use crate::rules::{Rule, RuleSet};

use super::matcher::{PatternMatcher, RuleMatcher};
use super::report::{EvaluationFault, RunReport};

/// Evaluation order for one field.
type FieldPlan<'a> = Vec<(&'a str, Vec<&'a Rule>)>;

/// Applies a rule set snapshot to document batches.
///
/// Documents are independent of each other: each one is evaluated on its
/// own against the same immutable snapshot, so results for a document do
/// not depend on the rest of the batch.
pub struct ExtractionRunner<M = PatternMatcher> {
    pool: ThreadPool,
    matcher: M,
}

impl ExtractionRunner<PatternMatcher> {
    /// Create a runner with `workers` threads (0 = one per CPU).
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_matcher(workers, PatternMatcher)
    }
}

impl<M: RuleMatcher> ExtractionRunner<M> {
    /// Create a runner using a custom matcher.
    pub fn with_matcher(workers: usize, matcher: M) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("clinex-worker-{}", i))
            .build()?;
        Ok(Self { pool, matcher })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `ruleset` over `documents`.
    pub fn run(&self, ruleset: &RuleSet, documents: &[Document]) -> RunReport {
        self.pool.install(|| self.run_in_pool(ruleset, documents))
    }

    /// Run two snapshots over the same documents concurrently.
    pub fn run_pair(
        &self,
        first: &RuleSet,
        second: &RuleSet,
        documents: &[Document],
    ) -> (RunReport, RunReport) {
        self.pool.install(|| {
            rayon::join(
                || self.run_in_pool(first, documents),
                || self.run_in_pool(second, documents),
            )
        })
    }

    fn run_in_pool(&self, ruleset: &RuleSet, documents: &[Document]) -> RunReport {
        let start = Instant::now();
        let plan: FieldPlan<'_> = ruleset
            .fields()
            .into_iter()
            .map(|field| (field, ruleset.rules_for_field(field)))
            .collect();

        let documents = unique_documents(documents);

        let evaluated: Vec<(String, Vec<ExtractionResult>, Vec<EvaluationFault>)> = documents
            .par_iter()
            .map(|doc| {
                let (results, faults) = self.evaluate_document(&plan, doc);
                (doc.id.clone(), results, faults)
            })
            .collect();

        let mut results = BTreeMap::new();
        let mut faults = Vec::new();
        for (id, doc_results, doc_faults) in evaluated {
            results.insert(id, doc_results);
            faults.extend(doc_faults);
        }
        faults.sort_by(|a, b| {
            (&a.document_id, &a.rule_name).cmp(&(&b.document_id, &b.rule_name))
        });

        let report = RunReport {
            revision: ruleset.revision(),
            results,
            faults,
        };
        let summary = report.summary();
        debug!(
            "Revision {} over {} documents: {} high, {} low, {} none, {} faults in {:?}",
            report.revision,
            summary.documents,
            summary.high,
            summary.low,
            summary.none,
            summary.faults,
            start.elapsed()
        );
        report
    }

    /// Evaluate every field of one document. Rules for a field are tried in
    /// plan order and the first extracted result wins.
    fn evaluate_document(
        &self,
        plan: &FieldPlan<'_>,
        doc: &Document,
    ) -> (Vec<ExtractionResult>, Vec<EvaluationFault>) {
        let mut results = Vec::with_capacity(plan.len());
        let mut faults = Vec::new();

        for (field, rules) in plan {
            let mut chosen = None;
            let mut field_fault = None;

            for rule in rules {
                match panic::catch_unwind(AssertUnwindSafe(|| self.matcher.apply(rule, doc))) {
                    Ok(result) if result.is_extracted() => {
                        chosen = Some(result);
                        break;
                    }
                    Ok(_) => {}
                    Err(payload) => {
                        let fault = EvaluationFault {
                            document_id: doc.id.clone(),
                            rule_name: rule.name().to_string(),
                            reason: panic_reason(payload.as_ref()),
                        };
                        warn!("{}", fault.to_error());
                        if field_fault.is_none() {
                            field_fault = Some(fault.to_error().to_string());
                        }
                        faults.push(fault);
                    }
                }
            }

            let result = chosen.unwrap_or_else(|| {
                let none = ExtractionResult::none(&doc.id, *field);
                match field_fault.take() {
                    Some(tag) => none.with_fault(tag),
                    None => none,
                }
            });
            results.push(result);
        }

        (results, faults)
    }
}

/// Keep the first occurrence of each document id.
fn unique_documents(documents: &[Document]) -> Vec<&Document> {
    let mut seen = HashSet::new();
    documents
        .iter()
        .filter(|doc| {
            let first = seen.insert(doc.id.as_str());
            if !first {
                warn!("Skipping repeated document id {}", doc.id);
            }
            first
        })
        .collect()
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::Failure;
    use crate::extraction::matcher::match_rule;
    use crate::models::document::Confidence;
    use crate::rules::{RevisionOrigin, RuleSpec};
    use pretty_assertions::assert_eq;

    fn ruleset(specs: Vec<RuleSpec>) -> RuleSet {
        RuleSet::new(7, RevisionOrigin::Initial, specs)
    }

    fn lvef_rules() -> RuleSet {
        ruleset(vec![
            RuleSpec::new("LVEF", r"LVEF\s*(\d+)%").with_keywords(["LVEF"]),
            RuleSpec::new("PASP", r"PASP\s*(\d+)\s*mmHg"),
        ])
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("a", "LVEF 55% normal, PASP 30 mmHg"),
            Document::new("b", "No LVEF mentioned"),
            Document::new("c", "PASP 48 mmHg"),
        ]
    }

    /// Panics on documents whose id starts with "bad".
    struct FaultyMatcher;

    impl RuleMatcher for FaultyMatcher {
        fn apply(&self, rule: &Rule, document: &Document) -> ExtractionResult {
            if document.id.starts_with("bad") && rule.name() == "LVEF" {
                panic!("pattern blew up");
            }
            match_rule(rule, document)
        }
    }

    #[test]
    fn test_run_produces_one_result_per_field() {
        let runner = ExtractionRunner::new(2).unwrap();
        let report = runner.run(&lvef_rules(), &corpus());

        assert_eq!(report.revision, 7);
        assert_eq!(report.results.len(), 3);
        for results in report.results.values() {
            let fields: Vec<&str> = results.iter().map(|r| r.field_name.as_str()).collect();
            assert_eq!(fields, vec!["LVEF", "PASP"]);
        }
        assert_eq!(
            report.result("a", "LVEF").unwrap().matched_value.as_deref(),
            Some("55")
        );
        assert_eq!(
            report.result("c", "PASP").unwrap().matched_value.as_deref(),
            Some("48")
        );
    }

    #[test]
    fn test_failures_list_none_results() {
        let runner = ExtractionRunner::new(2).unwrap();
        let report = runner.run(&lvef_rules(), &corpus());

        let failure = |d: &str, f: &str| Failure {
            document_id: d.to_string(),
            field_name: f.to_string(),
        };
        assert_eq!(
            report.failures(),
            vec![failure("b", "LVEF"), failure("b", "PASP"), failure("c", "LVEF")]
        );
        let summary = report.summary();
        assert_eq!(summary.fields, 6);
        assert_eq!(summary.none, 3);
        assert_eq!(summary.high, 3);
    }

    #[test]
    fn test_results_independent_of_batch_composition() {
        let runner = ExtractionRunner::new(4).unwrap();
        let rules = lvef_rules();
        let docs = corpus();

        let full = runner.run(&rules, &docs);
        let mut reversed = docs.clone();
        reversed.reverse();
        let reversed = runner.run(&rules, &reversed);
        let alone = runner.run(&rules, &docs[1..2]);

        assert_eq!(full, reversed);
        assert_eq!(full.document("b"), alone.document("b"));
    }

    #[test]
    fn test_priority_then_insertion_order_tie_break() {
        let rules = ruleset(vec![
            RuleSpec::new("ef_loose", r"(\d+)%").with_field("EF").with_priority(10),
            RuleSpec::new("ef_labelled", r"EF\s*(\d+)%").with_field("EF").with_priority(1),
            RuleSpec::new("ef_labelled_alt", r"EF\s*(\d+)").with_field("EF").with_priority(1),
        ]);
        let runner = ExtractionRunner::new(1).unwrap();

        let report = runner.run(&rules, &[Document::new("d", "HR 80%, EF 45%")]);
        let result = report.result("d", "EF").unwrap();
        assert_eq!(result.rule_name_used.as_deref(), Some("ef_labelled"));
        assert_eq!(result.matched_value.as_deref(), Some("45"));

        // Labelled rules miss; the lower-priority loose rule is the fallback.
        let report = runner.run(&rules, &[Document::new("d", "saturation 97%")]);
        let result = report.result("d", "EF").unwrap();
        assert_eq!(result.rule_name_used.as_deref(), Some("ef_loose"));
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_fault_is_isolated_to_its_document() {
        let runner = ExtractionRunner::with_matcher(2, FaultyMatcher).unwrap();
        let mut docs = corpus();
        docs.push(Document::new("bad-1", "LVEF 30% PASP 50 mmHg"));

        let report = runner.run(&lvef_rules(), &docs);

        let lvef = report.result("bad-1", "LVEF").unwrap();
        assert_eq!(lvef.confidence, Confidence::None);
        assert!(lvef.fault.as_deref().unwrap().contains("pattern blew up"));
        assert_eq!(
            report.result("bad-1", "PASP").unwrap().matched_value.as_deref(),
            Some("50")
        );
        assert_eq!(
            report.result("a", "LVEF").unwrap().matched_value.as_deref(),
            Some("55")
        );
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].rule_name, "LVEF");
    }

    #[test]
    fn test_repeated_document_ids_keep_first() {
        let runner = ExtractionRunner::new(1).unwrap();
        let docs = vec![
            Document::new("a", "LVEF 55%"),
            Document::new("a", "LVEF 20%"),
        ];

        let report = runner.run(&lvef_rules(), &docs);

        assert_eq!(report.results.len(), 1);
        assert_eq!(
            report.result("a", "LVEF").unwrap().matched_value.as_deref(),
            Some("55")
        );
    }

    #[test]
    fn test_run_pair_matches_sequential_runs() {
        let runner = ExtractionRunner::new(2).unwrap();
        let before = lvef_rules();
        let after = ruleset(vec![RuleSpec::new("LVEF", r"LVEF\s*(\d+)")]);
        let docs = corpus();

        let (left, right) = runner.run_pair(&before, &after, &docs);

        assert_eq!(left, runner.run(&before, &docs));
        assert_eq!(right, runner.run(&after, &docs));
    }
}
