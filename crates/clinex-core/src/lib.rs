//! Core library for rule-based clinical text extraction.
//!
//! This crate provides:
//! - A versioned, file-backed rule store with atomic publish and rollback
//! - Regex/keyword rule matching with HIGH/LOW/NONE confidence
//! - A worker-pool batch runner with per-document fault isolation
//! - Validation and merging of externally proposed rules, guarded by a
//!   regression run over a document corpus
//! - A CSV annotation log for scoring runs against human-confirmed values

pub mod annotation;
pub mod error;
pub mod extraction;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod rules;

pub use annotation::{Annotation, AnnotationLog, AnnotationScore, score};
pub use error::{ClinexError, ExtractionError, MergeError, Result, StoreError};
pub use extraction::{ExtractionRunner, Failure, PatternMatcher, RuleMatcher, RunReport};
pub use merge::{MergeDecision, MergePlan, MergeStatus, MergeValidator, ProposedRule, ProposedRuleBatch};
pub use models::config::ClinexConfig;
pub use models::document::{Confidence, Document, ExtractionResult};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use rules::{Rule, RuleSet, RuleSpec, RuleStore};
