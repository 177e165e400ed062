//! Run command - extract fields from a batch of documents.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info};

use clinex_core::extraction::RunReport;
use clinex_core::models::document::Document;
use clinex_core::pipeline::Pipeline;

use super::{load_config, load_documents, write_output};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// JSON array of documents, or a glob of .txt files
    #[arg(required = true)]
    input: String,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Print only the failures, as JSON, for the rule proposer
    #[arg(long)]
    failures_only: bool,

    /// Do not append failures to the failure log
    #[arg(long)]
    no_failure_log: bool,

    /// Number of parallel workers (overrides config)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output, one row per document field
    Csv,
    /// Plain text summary
    Text,
}

/// One line of the failure log.
#[derive(Debug, Serialize)]
pub struct FailureRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub revision: u64,
    pub document_id: &'a str,
    pub field_name: &'a str,
    pub raw_text: &'a str,
    pub reason: String,
}

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    if let Some(jobs) = args.jobs {
        config.extraction.workers = jobs;
    }

    let documents = load_documents(&args.input)?;
    let pipeline = Pipeline::from_config(&config)?;
    info!(
        "Running revision {} over {} documents",
        pipeline.store().revision(),
        documents.len()
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message(format!("Extracting {} documents...", documents.len()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = pipeline.run_batch(&documents);

    pb.finish_and_clear();

    let records = failure_records(&report, &documents);
    if !args.no_failure_log && !records.is_empty() {
        let path = config.failures_path();
        append_failure_log(&path, &records)?;
        debug!("Appended {} failures to {}", records.len(), path.display());
    }

    let output = if args.failures_only {
        serde_json::to_string_pretty(&records)?
    } else {
        format_report(&report, args.format)?
    };
    write_output(args.output.as_deref(), &output)?;

    let summary = report.summary();
    eprintln!(
        "{} Extracted {} fields from {} documents with revision {} in {:?}",
        style("✓").green(),
        summary.fields,
        summary.documents,
        report.revision,
        start.elapsed()
    );
    eprintln!(
        "   {} high, {} low, {} failed",
        style(summary.high).green(),
        style(summary.low).yellow(),
        style(summary.none).red()
    );
    if summary.faults > 0 {
        eprintln!(
            "   {} rule evaluations faulted",
            style(summary.faults).red()
        );
    }

    Ok(())
}

/// Failures joined with their source text. Faulted fields carry the fault
/// as reason.
pub fn failure_records<'a>(report: &'a RunReport, documents: &'a [Document]) -> Vec<FailureRecord<'a>> {
    let mut texts: HashMap<&str, &str> = HashMap::new();
    for document in documents {
        texts
            .entry(document.id.as_str())
            .or_insert(document.raw_text.as_str());
    }

    let timestamp = Utc::now();
    report
        .iter()
        .filter(|r| !r.is_extracted())
        .map(|r| FailureRecord {
            timestamp,
            revision: report.revision,
            document_id: &r.document_id,
            field_name: &r.field_name,
            raw_text: texts.get(r.document_id.as_str()).copied().unwrap_or(""),
            reason: r
                .fault
                .clone()
                .unwrap_or_else(|| "no rule matched".to_string()),
        })
        .collect()
}

fn append_failure_log(path: &Path, records: &[FailureRecord<'_>]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for record in records {
        writeln!(file, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

pub fn format_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Csv => format_report_csv(report),
        OutputFormat::Text => Ok(format_report_text(report)),
    }
}

fn format_report_csv(report: &RunReport) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "document_id",
        "field_name",
        "matched_value",
        "confidence",
        "rule_name_used",
        "fault",
    ])?;

    for result in report.iter() {
        wtr.write_record([
            result.document_id.as_str(),
            result.field_name.as_str(),
            result.matched_value.as_deref().unwrap_or(""),
            result.confidence.as_str(),
            result.rule_name_used.as_deref().unwrap_or(""),
            result.fault.as_deref().unwrap_or(""),
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_report_text(report: &RunReport) -> String {
    let mut output = format!("Revision: {}\n", report.revision);

    for (document_id, results) in &report.results {
        output.push_str(&format!("\n{}\n", document_id));
        for result in results {
            match (&result.matched_value, &result.rule_name_used) {
                (Some(value), Some(rule)) => output.push_str(&format!(
                    "  {}: {} ({}, rule {})\n",
                    result.field_name, value, result.confidence, rule
                )),
                _ => output.push_str(&format!("  {}: - ({})\n", result.field_name, result.confidence)),
            }
        }
    }

    for fault in &report.faults {
        output.push_str(&format!(
            "\nFault: rule {} on {}: {}\n",
            fault.rule_name, fault.document_id, fault.reason
        ));
    }

    output
}
