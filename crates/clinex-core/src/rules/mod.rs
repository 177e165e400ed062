//! Extraction rules: persisted text form, compiled form and versioned sets.
//!
//! Patterns are stored as text and compiled when a rule set is built. A
//! pattern that fails to compile disables its rule instead of failing the
//! load, so a bad rule can never take the whole rule set down with it.

pub mod defaults;
mod ruleset;
pub mod store;

pub use defaults::default_rules;
pub use ruleset::{RevisionOrigin, RevisionRecord, RuleSet};
pub use store::{RevisionSummary, RuleStore};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExtractionError;

/// Upper bound on the compiled size of a single rule pattern.
pub const PATTERN_SIZE_LIMIT: usize = 1 << 20;

fn default_enabled() -> bool {
    true
}

/// Text form of a rule, as persisted and as proposed by external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule identifier, unique among enabled rules.
    pub name: String,

    /// Field this rule extracts. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Regular expression source.
    #[serde(alias = "regex")]
    pub pattern: String,

    /// Case-insensitive pre-filter hints.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Lower numbers are tried first within a field.
    #[serde(default)]
    pub priority: i32,

    /// Manually suppressed rules are kept but never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: None,
            pattern: pattern.into(),
            keywords: Vec::new(),
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Field this rule extracts.
    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }
}

/// Compile a rule pattern, case-insensitive and with the bounded size limit.
pub fn compile_pattern(rule: &str, pattern: &str) -> Result<Regex, ExtractionError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| ExtractionError::RulePatternInvalid {
            rule: rule.to_string(),
            reason: e.to_string(),
        })
}

/// A rule with its pattern compiled.
#[derive(Debug, Clone)]
pub struct Rule {
    spec: RuleSpec,
    pattern: Result<Regex, ExtractionError>,
    keywords_lower: Vec<String>,
}

impl Rule {
    /// Compile a rule. Never fails: an invalid pattern yields a permanently
    /// disabled rule that remembers why.
    pub fn compile(spec: RuleSpec) -> Self {
        let pattern = compile_pattern(&spec.name, &spec.pattern);
        if let Err(e) = &pattern {
            warn!("Rule {} disabled: {}", spec.name, e);
        }
        let keywords_lower = spec.keywords.iter().map(|k| k.to_lowercase()).collect();

        Self {
            spec,
            pattern,
            keywords_lower,
        }
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn field(&self) -> &str {
        self.spec.field_name()
    }

    pub fn priority(&self) -> i32 {
        self.spec.priority
    }

    /// Lower-cased keywords used by the pre-filter.
    pub fn keywords(&self) -> &[String] {
        &self.keywords_lower
    }

    /// Compiled pattern, absent when compilation failed.
    pub fn regex(&self) -> Option<&Regex> {
        self.pattern.as_ref().ok()
    }

    /// Compile failure, if any.
    pub fn compile_error(&self) -> Option<&ExtractionError> {
        self.pattern.as_ref().err()
    }

    /// Enabled in its spec and carrying a usable pattern.
    pub fn is_enabled(&self) -> bool {
        self.spec.enabled && self.pattern.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_disables_rule() {
        let rule = Rule::compile(RuleSpec::new("broken", "LVEF ("));
        assert!(!rule.is_enabled());
        assert!(matches!(
            rule.compile_error(),
            Some(ExtractionError::RulePatternInvalid { rule, .. }) if rule == "broken"
        ));
    }

    #[test]
    fn test_patterns_compile_case_insensitive() {
        let regex = compile_pattern("LVEF", r"lvef\s*(\d+)%").unwrap();
        assert!(regex.is_match("LVEF 55%"));
        assert!(regex.is_match("Lvef 55%"));
    }

    #[test]
    fn test_field_defaults_to_name() {
        let spec = RuleSpec::new("LVEF", r"LVEF\s*(\d+)");
        assert_eq!(spec.field_name(), "LVEF");

        let spec = spec.with_field("ejection_fraction");
        assert_eq!(spec.field_name(), "ejection_fraction");
    }

    #[test]
    fn test_spec_accepts_regex_key() {
        let spec: RuleSpec = serde_json::from_str(
            r#"{"name": "LVEF", "keywords": ["LVEF"], "regex": "LVEF\\s*(\\d+)"}"#,
        )
        .unwrap();

        assert_eq!(spec.pattern, r"LVEF\s*(\d+)");
        assert_eq!(spec.priority, 0);
        assert!(spec.enabled);
    }

    #[test]
    fn test_keywords_are_lowercased_for_prefilter() {
        let rule = Rule::compile(RuleSpec::new("LVEF", "x").with_keywords(["LVEF", "Ejection"]));
        assert_eq!(rule.keywords(), ["lvef", "ejection"]);
        assert_eq!(rule.spec().keywords, ["LVEF", "Ejection"]);
    }
}
