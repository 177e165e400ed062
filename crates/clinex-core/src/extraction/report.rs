//! Batch run results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::models::document::{Confidence, ExtractionResult};

/// A (document, field) pair that produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Failure {
    pub document_id: String,
    pub field_name: String,
}

/// A fault raised while evaluating one rule against one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationFault {
    pub document_id: String,
    pub rule_name: String,
    pub reason: String,
}

impl EvaluationFault {
    pub fn to_error(&self) -> ExtractionError {
        ExtractionError::DocumentEvaluationFault {
            document_id: self.document_id.clone(),
            rule: self.rule_name.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Counters over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub documents: usize,
    pub fields: usize,
    pub high: usize,
    pub low: usize,
    pub none: usize,
    pub faults: usize,
}

/// Results of running one rule set revision over a batch of documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Revision of the rule set snapshot used.
    pub revision: u64,

    /// Per-document results, one per field, keyed by document id.
    pub results: BTreeMap<String, Vec<ExtractionResult>>,

    /// Isolated evaluation faults, sorted by document then rule.
    #[serde(default)]
    pub faults: Vec<EvaluationFault>,
}

impl RunReport {
    /// Every (document, field) pair with `NONE` confidence.
    pub fn failures(&self) -> Vec<Failure> {
        self.iter()
            .filter(|r| !r.is_extracted())
            .map(|r| Failure {
                document_id: r.document_id.clone(),
                field_name: r.field_name.clone(),
            })
            .collect()
    }

    /// Results for one document.
    pub fn document(&self, document_id: &str) -> Option<&[ExtractionResult]> {
        self.results.get(document_id).map(Vec::as_slice)
    }

    /// Result for one (document, field) pair.
    pub fn result(&self, document_id: &str, field_name: &str) -> Option<&ExtractionResult> {
        self.document(document_id)?
            .iter()
            .find(|r| r.field_name == field_name)
    }

    /// All results, ordered by document id then field order.
    pub fn iter(&self) -> impl Iterator<Item = &ExtractionResult> {
        self.results.values().flatten()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            documents: self.results.len(),
            faults: self.faults.len(),
            ..RunSummary::default()
        };
        for result in self.iter() {
            summary.fields += 1;
            match result.confidence {
                Confidence::High => summary.high += 1,
                Confidence::Low => summary.low += 1,
                Confidence::None => summary.none += 1,
            }
        }
        summary
    }
}
