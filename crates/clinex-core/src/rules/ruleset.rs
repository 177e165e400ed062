//! Immutable, versioned rule sets.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Rule, RuleSpec};

/// How a revision came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionOrigin {
    /// Seeded from configuration.
    Initial,
    /// Full replacement by a caller.
    Replace,
    /// Rules added after the existing ones.
    Append,
    /// Accepted or confirmed merge of proposed rules.
    Merge,
    /// Copy of an older revision.
    Rollback,
}

/// Persisted form of one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub revision_id: u64,
    pub created_at: DateTime<Utc>,
    pub origin: RevisionOrigin,
    pub rules: Vec<RuleSpec>,
}

/// An ordered, compiled rule collection at a fixed revision.
///
/// Never mutated after construction; the store publishes new revisions
/// instead, so a run holding an `Arc<RuleSet>` sees one consistent snapshot.
#[derive(Debug, Clone)]
pub struct RuleSet {
    revision: u64,
    created_at: DateTime<Utc>,
    origin: RevisionOrigin,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile a rule set from specs.
    pub fn new(revision: u64, origin: RevisionOrigin, specs: Vec<RuleSpec>) -> Self {
        Self {
            revision,
            created_at: Utc::now(),
            origin,
            rules: specs.into_iter().map(Rule::compile).collect(),
        }
    }

    pub fn from_record(record: RevisionRecord) -> Self {
        Self {
            revision: record.revision_id,
            created_at: record.created_at,
            origin: record.origin,
            rules: record.rules.into_iter().map(Rule::compile).collect(),
        }
    }

    pub fn to_record(&self) -> RevisionRecord {
        RevisionRecord {
            revision_id: self.revision,
            created_at: self.created_at,
            origin: self.origin,
            rules: self.specs(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn origin(&self) -> RevisionOrigin {
        self.origin
    }

    /// All rules in insertion order, including disabled ones.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn specs(&self) -> Vec<RuleSpec> {
        self.rules.iter().map(|r| r.spec().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_enabled())
    }

    /// Distinct fields among enabled rules, in order of first appearance.
    pub fn fields(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.enabled_rules()
            .map(|r| r.field())
            .filter(|f| seen.insert(*f))
            .collect()
    }

    /// Enabled rules for a field in evaluation order: ascending priority,
    /// ties broken by insertion order.
    pub fn rules_for_field(&self, field: &str) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self.enabled_rules().filter(|r| r.field() == field).collect();
        // Stable sort keeps insertion order among equal priorities.
        rules.sort_by_key(|r| r.priority());
        rules
    }

    /// Enabled rule with the given name.
    pub fn enabled_rule(&self, name: &str) -> Option<&Rule> {
        self.enabled_rules().find(|r| r.name() == name)
    }

    /// Names shared by more than one enabled rule.
    pub fn duplicate_enabled_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for rule in self.enabled_rules() {
            if !seen.insert(rule.name()) && !duplicates.iter().any(|d| d == rule.name()) {
                duplicates.push(rule.name().to_string());
            }
        }
        duplicates
    }
}
