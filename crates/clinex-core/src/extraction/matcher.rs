//! Single rule, single document matching.

use regex::Captures;

use crate::models::document::{Confidence, Document, ExtractionResult};
use crate::rules::Rule;

/// Applies one rule to one document.
///
/// Implementations must be pure: the same (rule, document) pair always
/// yields the same result.
pub trait RuleMatcher: Send + Sync {
    fn apply(&self, rule: &Rule, document: &Document) -> ExtractionResult;
}

/// Default matcher backed by the rule's compiled pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternMatcher;

impl RuleMatcher for PatternMatcher {
    fn apply(&self, rule: &Rule, document: &Document) -> ExtractionResult {
        match_rule(rule, document)
    }
}

/// Match `rule` against `document`.
///
/// Disabled rules (suppressed or with an invalid pattern) return `NONE`
/// without evaluating anything. Otherwise the first match by offset is
/// used; its value is the first capturing group that took part in the
/// match, or the whole match when no group did. Regions whose value trims
/// to nothing are skipped. Confidence is `HIGH` for a
/// single match region with keyword support (or no keywords configured),
/// `LOW` for multiple regions or missing keyword support.
pub fn match_rule(rule: &Rule, document: &Document) -> ExtractionResult {
    let mut result = ExtractionResult::none(&document.id, rule.field());

    if !rule.is_enabled() {
        return result;
    }
    let Some(regex) = rule.regex() else {
        return result;
    };

    let keyword_hit = keyword_hit(rule, &document.raw_text);

    let mut values = regex
        .captures_iter(&document.raw_text)
        .filter_map(|caps| region_value(&caps));
    let Some(value) = values.next() else {
        return result;
    };
    let ambiguous = values.next().is_some();

    result.matched_value = Some(value);
    result.rule_name_used = Some(rule.name().to_string());
    result.confidence = if keyword_hit && !ambiguous {
        Confidence::High
    } else {
        Confidence::Low
    };
    result
}

/// Value of one match region. Regions that are empty once trimmed do not
/// count as matches.
fn region_value(caps: &Captures<'_>) -> Option<String> {
    let value = caps
        .iter()
        .skip(1)
        .flatten()
        .next()
        .or_else(|| caps.get(0))?
        .as_str()
        .trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Case-insensitive keyword pre-filter. Rules without keywords always pass.
fn keyword_hit(rule: &Rule, text: &str) -> bool {
    if rule.keywords().is_empty() {
        return true;
    }
    let lower = text.to_lowercase();
    rule.keywords().iter().any(|k| lower.contains(k.as_str()))
}
