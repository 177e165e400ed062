//! Human annotations: an append-only CSV log of confirmed field values,
//! and scoring of a run against it.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::extraction::RunReport;
use crate::models::document::Document;

/// One human-confirmed value for a (document, field) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub doc_id: String,
    pub raw_text: String,
    pub param_name: String,
    pub param_value: String,
}

impl Annotation {
    pub fn new(
        doc_id: impl Into<String>,
        raw_text: impl Into<String>,
        param_name: impl Into<String>,
        param_value: impl Into<String>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            raw_text: raw_text.into(),
            param_name: param_name.into(),
            param_value: param_value.into(),
        }
    }
}

/// CSV file of annotations with a `doc_id,raw_text,param_name,param_value`
/// header.
#[derive(Debug, Clone)]
pub struct AnnotationLog {
    path: PathBuf,
}

impl AnnotationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one annotation, writing the header if the file is new.
    pub fn append(&self, annotation: &Annotation) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let is_new = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(annotation)?;
        writer.flush()?;

        debug!(
            "Annotated {}/{} = {}",
            annotation.doc_id, annotation.param_name, annotation.param_value
        );
        Ok(())
    }

    /// All annotations in file order. A missing file reads as empty.
    pub fn read_all(&self) -> Result<Vec<Annotation>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut annotations = Vec::new();
        for record in reader.deserialize() {
            annotations.push(record?);
        }
        Ok(annotations)
    }

    /// Annotated documents, one per id, usable as a regression corpus.
    pub fn documents(&self) -> Result<Vec<Document>> {
        let mut seen = HashSet::new();
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|a| seen.insert(a.doc_id.clone()))
            .map(|a| Document::new(a.doc_id, a.raw_text))
            .collect())
    }
}

/// An annotated pair the run got wrong or missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub doc_id: String,
    pub param_name: String,
    pub expected: String,
    pub extracted: Option<String>,
}

/// Agreement between a run and the annotation log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationScore {
    pub correct: usize,

    /// Extracted, but not the annotated value.
    pub incorrect: Vec<Mismatch>,

    /// Annotated, but nothing extracted.
    pub missing: Vec<Mismatch>,

    /// Annotations for documents that were not part of the run.
    pub unscored: usize,
}

impl AnnotationScore {
    /// Scored annotations.
    pub fn total(&self) -> usize {
        self.correct + self.incorrect.len() + self.missing.len()
    }

    /// Share of scored annotations matched exactly, 0.0 when none were scored.
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct as f64 / total as f64,
        }
    }
}

/// Score `report` against `annotations`.
///
/// Values are compared ignoring case and whitespace, so `55 %` agrees with
/// `55%`. When a pair was annotated more than once the last entry wins.
pub fn score(report: &RunReport, annotations: &[Annotation]) -> AnnotationScore {
    let mut latest: Vec<&Annotation> = Vec::new();
    for annotation in annotations {
        match latest
            .iter_mut()
            .find(|a| a.doc_id == annotation.doc_id && a.param_name == annotation.param_name)
        {
            Some(slot) => *slot = annotation,
            None => latest.push(annotation),
        }
    }

    let mut score = AnnotationScore::default();
    for annotation in latest {
        if report.document(&annotation.doc_id).is_none() {
            score.unscored += 1;
            continue;
        }

        let extracted = report
            .result(&annotation.doc_id, &annotation.param_name)
            .and_then(|r| r.matched_value.clone());
        let mismatch = |extracted: Option<String>| Mismatch {
            doc_id: annotation.doc_id.clone(),
            param_name: annotation.param_name.clone(),
            expected: annotation.param_value.clone(),
            extracted,
        };

        match extracted {
            None => score.missing.push(mismatch(None)),
            Some(value) if normalize(&value) == normalize(&annotation.param_value) => {
                score.correct += 1
            }
            Some(value) => score.incorrect.push(mismatch(Some(value))),
        }
    }
    score
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
