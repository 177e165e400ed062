//! Error types for the clinex-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the clinex library.
#[derive(Error, Debug)]
pub enum ClinexError {
    /// Rule store error.
    #[error("rule store error: {0}")]
    Store(#[from] StoreError),

    /// Rule merge error.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Rule or document evaluation error.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Worker pool could not be started.
    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors related to the persisted rule store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A persisted revision could not be read back. Fatal: the store never
    /// falls back to an empty rule set.
    #[error("rule store corrupt at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A publish was attempted against a revision that is no longer current.
    #[error("revision conflict: expected {expected}, store is at {current}")]
    RevisionConflict { expected: u64, current: u64 },

    /// More than one enabled rule carries the same name.
    #[error("duplicate enabled rule name: {0}")]
    DuplicateRule(String),

    /// Requested revision does not exist.
    #[error("unknown revision: {0}")]
    UnknownRevision(u64),

    /// Filesystem error while writing a revision.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Revision could not be encoded.
    #[error("failed to encode revision: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors related to merging proposed rules.
#[derive(Error, Debug)]
pub enum MergeError {
    /// The batch was generated against an older rule set revision.
    #[error("stale proposal: generated against revision {proposed}, current is {current}")]
    StaleProposal { proposed: u64, current: u64 },
}

/// Errors related to rule compilation and evaluation.
///
/// Neither variant is fatal: invalid patterns disable their rule and
/// evaluation faults are recorded per (document, rule) pair.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// Pattern failed to compile.
    #[error("invalid pattern for rule {rule}: {reason}")]
    RulePatternInvalid { rule: String, reason: String },

    /// Evaluating a rule against a document faulted.
    #[error("evaluation of rule {rule} on document {document_id} faulted: {reason}")]
    DocumentEvaluationFault {
        document_id: String,
        rule: String,
        reason: String,
    },
}

/// Result type for the clinex library.
pub type Result<T> = std::result::Result<T, ClinexError>;
