//! Subcommands and the helpers they share.

pub mod annotate;
pub mod config;
pub mod propose;
pub mod rules;
pub mod run;

use std::fs;
use std::path::{Path, PathBuf};

use console::style;
use glob::glob;
use tracing::debug;

use clinex_core::models::config::ClinexConfig;
use clinex_core::models::document::Document;

/// Platform config file, e.g. `~/.config/clinex/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clinex")
        .join("config.json")
}

/// Load the config named by `--config`, else the platform config file if
/// present, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<ClinexConfig> {
    if let Some(path) = config_path {
        return Ok(ClinexConfig::from_file(Path::new(path))?);
    }

    let path = default_config_path();
    if path.exists() {
        debug!("Using config {}", path.display());
        Ok(ClinexConfig::from_file(&path)?)
    } else {
        Ok(ClinexConfig::default())
    }
}

/// Read documents from a JSON array file, or from `.txt` files matching a
/// glob (document id = file stem).
pub fn load_documents(input: &str) -> anyhow::Result<Vec<Document>> {
    let path = Path::new(input);
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        if !path.is_file() {
            anyhow::bail!("Input file not found: {}", path.display());
        }
        let content = fs::read_to_string(path)?;
        let documents: Vec<Document> = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid document file {}: {}", path.display(), e))?;
        debug!("Loaded {} documents from {}", documents.len(), path.display());
        return Ok(documents);
    }

    let mut documents = Vec::new();
    for entry in glob(input)? {
        let file = entry?;
        let is_text = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
        if !is_text || !file.is_file() {
            continue;
        }

        let id = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        documents.push(Document::new(id, fs::read_to_string(&file)?));
    }

    if documents.is_empty() {
        anyhow::bail!("No matching documents found for: {}", input);
    }
    debug!("Loaded {} text documents matching {}", documents.len(), input);
    Ok(documents)
}

/// Write `content` to `output`, or print it when no file is given.
pub fn write_output(output: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, content)?;
            eprintln!(
                "{} Output written to {}",
                style("✓").green(),
                path.display()
            );
        }
        None => println!("{}", content),
    }
    Ok(())
}
