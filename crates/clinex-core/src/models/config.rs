//! Configuration structures for the extraction pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::rules::{RuleSpec, default_rules};

/// Main configuration for clinex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinexConfig {
    /// Rule store configuration.
    pub rules: RulesConfig,

    /// Batch extraction configuration.
    pub extraction: ExtractionConfig,

    /// Rule merge policy.
    pub merge: MergeConfig,

    /// Output file locations.
    pub output: OutputConfig,
}

/// Rule store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Directory holding rule revisions.
    pub store_dir: PathBuf,

    /// Rules used to seed an empty store.
    pub initial: Vec<RuleSpec>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("rules"),
            initial: default_rules(),
        }
    }
}

/// Batch extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Number of worker threads (0 = one per CPU).
    pub workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Rule merge policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Also require confirmation when an extracted value changes or drops
    /// from HIGH to LOW.
    pub confirm_value_changes: bool,
}

/// Output file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for generated files.
    pub dir: PathBuf,

    /// Failure log file name (JSON lines).
    pub failures_file: String,

    /// Human annotation log file name (CSV).
    pub annotations_file: String,

    /// Pending merge file name (JSON).
    pub pending_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            failures_file: "failures.jsonl".to_string(),
            annotations_file: "annotations.csv".to_string(),
            pending_file: "pending_merge.json".to_string(),
        }
    }
}

impl ClinexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Path of the failure log.
    pub fn failures_path(&self) -> PathBuf {
        self.output.dir.join(&self.output.failures_file)
    }

    /// Path of the annotation log.
    pub fn annotations_path(&self) -> PathBuf {
        self.output.dir.join(&self.output.annotations_file)
    }

    /// Path of the stored pending merge.
    pub fn pending_path(&self) -> PathBuf {
        self.output.dir.join(&self.output.pending_file)
    }
}
