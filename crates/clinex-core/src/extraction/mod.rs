//! Rule application: single-rule matching and batch runs.

mod matcher;
mod report;
mod runner;

pub use matcher::{PatternMatcher, RuleMatcher, match_rule};
pub use report::{EvaluationFault, Failure, RunReport, RunSummary};
pub use runner::ExtractionRunner;
