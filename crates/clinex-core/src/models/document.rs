//! Documents and per-field extraction results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A free-text clinical document submitted for extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque caller-supplied identifier.
    #[serde(alias = "doc_id")]
    pub id: String,

    /// Unmodified document text.
    pub raw_text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_text: raw_text.into(),
        }
    }
}

/// Qualitative trust signal on an extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    /// Exactly one candidate region, keyword hint present (or none configured).
    High,
    /// Matched, but ambiguous or without keyword support.
    Low,
    /// Nothing extracted.
    None,
}

impl Confidence {
    /// Whether a value was extracted at all.
    pub fn is_extracted(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Low => "LOW",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of extracting one field from one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Document the result belongs to.
    pub document_id: String,

    /// Field the result is for.
    pub field_name: String,

    /// Extracted value, absent when nothing matched.
    pub matched_value: Option<String>,

    /// Name of the rule that produced the value.
    pub rule_name_used: Option<String>,

    /// Confidence of the extraction.
    pub confidence: Confidence,

    /// Internal error tag when an evaluation fault forced `NONE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl ExtractionResult {
    /// A `NONE` result with no value and no rule.
    pub fn none(document_id: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            field_name: field_name.into(),
            matched_value: None,
            rule_name_used: None,
            confidence: Confidence::None,
            fault: None,
        }
    }

    pub fn with_fault(mut self, fault: impl Into<String>) -> Self {
        self.fault = Some(fault.into());
        self
    }

    pub fn is_extracted(&self) -> bool {
        self.confidence.is_extracted()
    }
}
