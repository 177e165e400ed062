//! Field-level comparison of two runs over the same documents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::extraction::RunReport;
use crate::models::document::{Confidence, ExtractionResult};

/// How one (document, field) pair moved between two runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub document_id: String,
    pub field_name: String,
    pub before: Confidence,
    pub after: Confidence,
    pub before_value: Option<String>,
    pub after_value: Option<String>,

    /// Proposed rules touching this field.
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Regressions, improvements and value changes between two runs.
///
/// `improvements` and `changes` may share an entry: a field that moves from
/// LOW to HIGH with a different value is in both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDiff {
    pub regressions: Vec<FieldChange>,
    pub improvements: Vec<FieldChange>,
    pub changes: Vec<FieldChange>,
}

impl ReportDiff {
    pub fn is_empty(&self) -> bool {
        self.regressions.is_empty() && self.improvements.is_empty() && self.changes.is_empty()
    }
}

/// Compare `before` and `after`, pair by pair.
///
/// A field missing from one side counts as `NONE` there. `attribution`
/// maps a field name to the rule names responsible for changes in it.
pub fn diff_reports(
    before: &RunReport,
    after: &RunReport,
    attribution: &HashMap<String, Vec<String>>,
) -> ReportDiff {
    let mut diff = ReportDiff::default();

    let mut document_ids: Vec<&String> = before.results.keys().chain(after.results.keys()).collect();
    document_ids.sort();
    document_ids.dedup();

    for document_id in document_ids {
        let old = before.document(document_id).unwrap_or_default();
        let new = after.document(document_id).unwrap_or_default();

        let mut fields: Vec<&str> = old.iter().map(|r| r.field_name.as_str()).collect();
        for result in new {
            if !fields.contains(&result.field_name.as_str()) {
                fields.push(&result.field_name);
            }
        }

        for field in fields {
            let b = find(old, field);
            let a = find(new, field);
            let before_confidence = confidence(b);
            let after_confidence = confidence(a);
            let before_value = b.and_then(|r| r.matched_value.clone());
            let after_value = a.and_then(|r| r.matched_value.clone());

            let change = || FieldChange {
                document_id: document_id.clone(),
                field_name: field.to_string(),
                before: before_confidence,
                after: after_confidence,
                before_value: before_value.clone(),
                after_value: after_value.clone(),
                rules: attribution.get(field).cloned().unwrap_or_default(),
            };

            match (before_confidence.is_extracted(), after_confidence.is_extracted()) {
                (true, false) => diff.regressions.push(change()),
                (false, true) => diff.improvements.push(change()),
                (true, true) => {
                    if before_confidence == Confidence::Low && after_confidence == Confidence::High {
                        diff.improvements.push(change());
                    }
                    let downgraded =
                        before_confidence == Confidence::High && after_confidence == Confidence::Low;
                    if downgraded || before_value != after_value {
                        diff.changes.push(change());
                    }
                }
                (false, false) => {}
            }
        }
    }

    diff
}

fn find<'a>(results: &'a [ExtractionResult], field: &str) -> Option<&'a ExtractionResult> {
    results.iter().find(|r| r.field_name == field)
}

fn confidence(result: Option<&ExtractionResult>) -> Confidence {
    result.map(|r| r.confidence).unwrap_or(Confidence::None)
}
