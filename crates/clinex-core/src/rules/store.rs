//! Filesystem-backed rule store with append-only revision history.
//!
//! Every revision lives in its own immutable `rev-<id>.json` file. The active
//! revision is held as an `Arc<RuleSet>`: readers clone the reference and
//! never block on matching, while publishing a new revision takes a single
//! lock around the write and the pointer swap.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StoreError;

use super::{RevisionOrigin, RevisionRecord, RuleSet, RuleSpec};

lazy_static! {
    static ref REVISION_FILE: Regex = Regex::new(r"^rev-(\d+)\.json$").unwrap();
}

type Result<T> = std::result::Result<T, StoreError>;

/// One line of revision history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionSummary {
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub origin: RevisionOrigin,
    pub rule_count: usize,
    pub active: bool,
}

/// Persistent holder of the active rule set.
pub struct RuleStore {
    dir: PathBuf,
    active: RwLock<Arc<RuleSet>>,
    publish_lock: Mutex<()>,
}

impl RuleStore {
    /// Open the store in `dir`, seeding revision 1 from `initial` when the
    /// directory holds no revisions yet.
    ///
    /// Fails with [`StoreError::Corrupt`] if any persisted revision is
    /// unreadable; the store never degrades to an empty rule set.
    pub fn open(dir: impl Into<PathBuf>, initial: Vec<RuleSpec>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let records = read_records(&dir)?;
        let active = match records.into_iter().last() {
            Some(record) => RuleSet::from_record(record),
            None => {
                let set = RuleSet::new(1, RevisionOrigin::Initial, initial);
                ensure_unique_names(&set)?;
                write_record(&dir, &set.to_record())?;
                info!("Seeded rule store at {} with {} rules", dir.display(), set.len());
                set
            }
        };

        info!(
            "Rule store opened at revision {} ({} rules)",
            active.revision(),
            active.len()
        );

        Ok(Self {
            dir,
            active: RwLock::new(Arc::new(active)),
            publish_lock: Mutex::new(()),
        })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read the latest revision from disk.
    pub fn load(&self) -> Result<RuleSet> {
        read_records(&self.dir)?
            .into_iter()
            .last()
            .map(RuleSet::from_record)
            .ok_or_else(|| StoreError::Corrupt {
                path: self.dir.clone(),
                reason: "no revisions found".to_string(),
            })
    }

    /// Snapshot of the active rule set.
    pub fn get_active(&self) -> Arc<RuleSet> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Active revision id.
    pub fn revision(&self) -> u64 {
        self.get_active().revision()
    }

    /// Publish `rules` as a new revision unconditionally.
    pub fn replace(&self, rules: Vec<RuleSpec>) -> Result<u64> {
        self.commit(None, RevisionOrigin::Replace, rules)
    }

    /// Publish the active rules followed by `rules` as a new revision.
    pub fn append(&self, rules: Vec<RuleSpec>) -> Result<u64> {
        self.commit_with(None, RevisionOrigin::Append, |active| {
            let mut specs = active.specs();
            specs.extend(rules);
            specs
        })
    }

    /// Publish `rules` as a new revision only if the store is still at
    /// `expected`.
    pub fn publish(
        &self,
        expected: u64,
        origin: RevisionOrigin,
        rules: Vec<RuleSpec>,
    ) -> Result<u64> {
        self.commit(Some(expected), origin, rules)
    }

    /// Publish a copy of an older revision's rules as a new revision.
    pub fn rollback(&self, revision: u64) -> Result<u64> {
        let target = self.revision_at(revision)?;
        info!("Rolling back to rules of revision {}", revision);
        self.commit(None, RevisionOrigin::Rollback, target.specs())
    }

    /// Read a specific revision from disk.
    pub fn revision_at(&self, revision: u64) -> Result<RuleSet> {
        let path = revision_path(&self.dir, revision);
        if !path.exists() {
            return Err(StoreError::UnknownRevision(revision));
        }
        read_record(&path, revision).map(RuleSet::from_record)
    }

    /// All revisions, oldest first.
    pub fn history(&self) -> Result<Vec<RevisionSummary>> {
        let active = self.revision();
        Ok(read_records(&self.dir)?
            .into_iter()
            .map(|r| RevisionSummary {
                revision: r.revision_id,
                created_at: r.created_at,
                origin: r.origin,
                rule_count: r.rules.len(),
                active: r.revision_id == active,
            })
            .collect())
    }

    fn commit(
        &self,
        expected: Option<u64>,
        origin: RevisionOrigin,
        rules: Vec<RuleSpec>,
    ) -> Result<u64> {
        self.commit_with(expected, origin, |_| rules)
    }

    /// Build and persist the next revision from the active one while
    /// holding the publish lock.
    fn commit_with(
        &self,
        expected: Option<u64>,
        origin: RevisionOrigin,
        build: impl FnOnce(&RuleSet) -> Vec<RuleSpec>,
    ) -> Result<u64> {
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let active = self.get_active();
        let current = active.revision();
        if let Some(expected) = expected {
            if expected != current {
                return Err(StoreError::RevisionConflict { expected, current });
            }
        }

        let set = RuleSet::new(current + 1, origin, build(&*active));
        ensure_unique_names(&set)?;
        write_record(&self.dir, &set.to_record())?;

        let revision = set.revision();
        let rule_count = set.len();
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(set);

        info!(
            "Published rule revision {} ({:?}, {} rules)",
            revision, origin, rule_count
        );
        Ok(revision)
    }
}

fn revision_path(dir: &Path, revision: u64) -> PathBuf {
    dir.join(format!("rev-{:06}.json", revision))
}

fn ensure_unique_names(set: &RuleSet) -> Result<()> {
    match set.duplicate_enabled_names().into_iter().next() {
        Some(name) => Err(StoreError::DuplicateRule(name)),
        None => Ok(()),
    }
}

/// Write a revision file through a temp file, then link it into place.
///
/// The link fails if the revision already exists, so a concurrent writer
/// can never overwrite a published revision.
fn write_record(dir: &Path, record: &RevisionRecord) -> Result<()> {
    let final_path = revision_path(dir, record.revision_id);
    let tmp_path = dir.join(format!(
        ".rev-{:06}.{}.json.tmp",
        record.revision_id,
        std::process::id()
    ));

    let json = serde_json::to_string_pretty(record)?;
    let written = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(json.as_bytes())?;
        file.sync_all()
    });
    let linked = written.and_then(|()| fs::hard_link(&tmp_path, &final_path));
    let _ = fs::remove_file(&tmp_path);

    match linked {
        Ok(()) => {
            debug!("Wrote {}", final_path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::RevisionConflict {
            expected: record.revision_id - 1,
            current: record.revision_id,
        }),
        Err(e) => Err(e.into()),
    }
}

fn read_record(path: &Path, expected_id: u64) -> Result<RevisionRecord> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    let record: RevisionRecord =
        serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;

    if record.revision_id != expected_id {
        return Err(corrupt(format!(
            "file holds revision {}, expected {}",
            record.revision_id, expected_id
        )));
    }
    let set = RuleSet::from_record(record.clone());
    if let Some(name) = set.duplicate_enabled_names().into_iter().next() {
        return Err(corrupt(format!("duplicate enabled rule name {}", name)));
    }

    Ok(record)
}

/// Read every revision file in `dir`, sorted by id, checking the history
/// has no gaps.
fn read_records(dir: &Path) -> Result<Vec<RevisionRecord>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(caps) = REVISION_FILE.captures(name) else {
            debug!("Skipping {} in rule store", name);
            continue;
        };
        let id = caps[1].parse::<u64>().map_err(|e| StoreError::Corrupt {
            path: entry.path(),
            reason: e.to_string(),
        })?;
        ids.push(id);
    }
    ids.sort_unstable();

    let mut records = Vec::with_capacity(ids.len());
    for (i, id) in ids.into_iter().enumerate() {
        let expected = i as u64 + 1;
        if id != expected {
            return Err(StoreError::Corrupt {
                path: revision_path(dir, expected),
                reason: format!("revision {} missing from history", expected),
            });
        }
        records.push(read_record(&revision_path(dir, id), id)?);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crate::error::ExtractionError;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn lvef() -> RuleSpec {
        RuleSpec::new("LVEF", r"LVEF\s*(\d+)%").with_keywords(["LVEF", "射血分数"])
    }

    #[test]
    fn test_open_seeds_initial_revision() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();

        assert_eq!(store.revision(), 1);
        assert_eq!(store.get_active().origin(), RevisionOrigin::Initial);
        assert!(dir.path().join("rev-000001.json").exists());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();
            let pasp = RuleSpec::new("PASP", r"PASP\s*(\d+)").with_priority(2);
            store.replace(vec![lvef(), pasp]).unwrap();
        }

        let store = RuleStore::open(dir.path(), Vec::new()).unwrap();
        let active = store.get_active();

        assert_eq!(active.revision(), 2);
        assert_eq!(active.specs()[1].name, "PASP");
        assert_eq!(active.specs()[1].priority, 2);
        assert_eq!(active.rules()[0].regex().unwrap().as_str(), r"LVEF\s*(\d+)%");
        assert_eq!(active.rules()[0].spec().keywords, vec!["LVEF", "射血分数"]);
    }

    #[test]
    fn test_corrupt_revision_fails_load() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();
        fs::write(dir.path().join("rev-000002.json"), "{ not json").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
        assert!(matches!(
            RuleStore::open(dir.path(), vec![lvef()]),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_in_revision_disables_rule_only() {
        let dir = TempDir::new().unwrap();
        let record = RevisionRecord {
            revision_id: 1,
            created_at: Utc::now(),
            origin: RevisionOrigin::Initial,
            rules: vec![RuleSpec::new("broken", "(unclosed"), lvef()],
        };
        fs::write(
            dir.path().join("rev-000001.json"),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        let store = RuleStore::open(dir.path(), Vec::new()).unwrap();
        let active = store.get_active();

        assert_eq!(active.revision(), 1);
        assert_eq!(active.len(), 2);
        let broken = &active.rules()[0];
        assert!(!broken.is_enabled());
        assert!(matches!(
            broken.compile_error(),
            Some(ExtractionError::RulePatternInvalid { rule, .. }) if rule == "broken"
        ));
        let enabled: Vec<&str> = active.enabled_rules().map(|r| r.name()).collect();
        assert_eq!(enabled, vec!["LVEF"]);
    }

    #[test]
    fn test_existing_revision_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();
        let original = fs::read_to_string(dir.path().join("rev-000001.json")).unwrap();

        let rival = RuleSet::new(1, RevisionOrigin::Replace, Vec::new()).to_record();
        let err = write_record(dir.path(), &rival).unwrap_err();

        assert!(matches!(err, StoreError::RevisionConflict { current: 1, .. }));
        assert_eq!(
            fs::read_to_string(dir.path().join("rev-000001.json")).unwrap(),
            original
        );
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_revision_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();
        store.replace(vec![lvef()]).unwrap();
        store.replace(vec![lvef()]).unwrap();
        fs::remove_file(dir.path().join("rev-000002.json")).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("revision 2 missing"));
    }

    #[test]
    fn test_publish_rejects_outdated_base() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();
        store.replace(vec![lvef()]).unwrap();

        let err = store
            .publish(1, RevisionOrigin::Merge, Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RevisionConflict { expected: 1, current: 2 }
        ));
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_duplicate_names_are_refused() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();

        let err = store.replace(vec![lvef(), lvef()]).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRule(name) if name == "LVEF"));
        assert_eq!(store.revision(), 1);
        assert!(!dir.path().join("rev-000002.json").exists());
    }

    #[test]
    fn test_append_keeps_existing_rules_first() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![RuleSpec::new("LVEF", r"LVEF\s*(\d+)%")]).unwrap();

        let revision = store
            .append(vec![RuleSpec::new("PASP", r"PASP\s*(\d+)")])
            .unwrap();

        assert_eq!(revision, 2);
        let active = store.get_active();
        assert_eq!(active.origin(), RevisionOrigin::Append);
        let names: Vec<&str> = active.rules().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["LVEF", "PASP"]);

        let err = store
            .append(vec![RuleSpec::new("LVEF", "x")])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRule(name) if name == "LVEF"));
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_rollback_appends_copy() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::open(dir.path(), vec![lvef()]).unwrap();
        store
            .replace(vec![RuleSpec::new("PASP", r"PASP\s*(\d+)")])
            .unwrap();

        let revision = store.rollback(1).unwrap();

        assert_eq!(revision, 3);
        assert_eq!(store.get_active().specs(), vec![lvef()]);
        let history = store.history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].origin, RevisionOrigin::Rollback);
        assert!(history[2].active);
        assert!(!history[0].active);
        assert!(matches!(
            store.rollback(9),
            Err(StoreError::UnknownRevision(9))
        ));
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_revisions() {
        let dir = TempDir::new().unwrap();
        let tagged = |tag: u64| -> Vec<RuleSpec> {
            (0..8)
                .map(|i| RuleSpec::new(format!("rule{}", i), format!("v{}", tag)))
                .collect()
        };
        let store = Arc::new(RuleStore::open(dir.path(), tagged(1)).unwrap());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.get_active();
                        let expected = format!("v{}", snapshot.revision());
                        assert!(snapshot.specs().iter().all(|s| s.pattern == expected));
                    }
                })
            })
            .collect();

        for tag in 2..=20 {
            store.replace(tagged(tag)).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.revision(), 20);
    }
}
