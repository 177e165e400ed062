//! Propose and confirm commands - merge externally proposed rules.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use tracing::{debug, info};

use clinex_core::merge::{MergeDecision, MergePlan, MergeStatus, ProposedRule, ProposedRuleBatch};
use clinex_core::pipeline::{Pipeline, PipelineOutcome};

use super::{load_config, load_documents, write_output};

/// Arguments for the propose command.
#[derive(Args)]
pub struct ProposeArgs {
    /// Proposed rules: `{base_revision, rules}` or a bare array of rules
    #[arg(required = true)]
    batch: PathBuf,

    /// Regression corpus: JSON array of documents, or a glob of .txt files
    #[arg(required = true)]
    input: String,

    /// Base revision for a bare array of rules (default: current revision)
    #[arg(long)]
    base: Option<u64>,

    /// Write the full outcome (decision, before and after runs) as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Arguments for the confirm command.
#[derive(Args)]
pub struct ConfirmArgs {
    /// Documents to re-run after publishing
    input: Option<String>,

    /// Drop the pending merge instead of publishing it
    #[arg(long)]
    discard: bool,
}

pub async fn run(args: ProposeArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let pipeline = Pipeline::from_config(&config)?;
    let documents = load_documents(&args.input)?;

    let batch = read_batch(&args.batch, args.base.unwrap_or_else(|| pipeline.store().revision()))?;
    info!(
        "Validating {} proposed rules against revision {}",
        batch.rules.len(),
        batch.base_revision
    );

    let outcome = pipeline.submit_proposal(&batch, &documents)?;
    print_decision(&outcome);

    let pending_path = config.pending_path();
    match outcome.decision.status {
        MergeStatus::NeedsConfirmation => {
            save_plan(&pending_path, &outcome.plan)?;
            println!();
            println!(
                "{} Merge needs confirmation. Pending plan saved to {}",
                style("!").yellow(),
                pending_path.display()
            );
            println!("Run 'clinex confirm' to publish it anyway.");
        }
        MergeStatus::Accepted if pending_path.exists() => {
            // A pending plan built on the old revision can no longer commit.
            fs::remove_file(&pending_path)?;
            debug!("Removed outdated pending plan {}", pending_path.display());
        }
        _ => {}
    }

    if let Some(output) = &args.output {
        write_output(Some(output), &serde_json::to_string_pretty(&outcome)?)?;
    }

    Ok(())
}

pub async fn confirm(args: ConfirmArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let pending_path = config.pending_path();

    if !pending_path.exists() {
        anyhow::bail!("No pending merge at {}", pending_path.display());
    }

    if args.discard {
        fs::remove_file(&pending_path)?;
        println!("{} Discarded pending merge", style("✓").green());
        return Ok(());
    }

    let plan: MergePlan = serde_json::from_str(&fs::read_to_string(&pending_path)?)
        .map_err(|e| anyhow::anyhow!("Invalid pending plan {}: {}", pending_path.display(), e))?;

    let pipeline = Pipeline::from_config(&config)?;
    let documents = match &args.input {
        Some(input) => load_documents(input)?,
        None => Vec::new(),
    };

    let outcome = pipeline.confirm(&plan, &documents)?;
    fs::remove_file(&pending_path)?;

    match outcome.decision.revision {
        Some(revision) => println!(
            "{} Published revision {} ({} regressions accepted)",
            style("✓").green(),
            revision,
            outcome.decision.regressions.len()
        ),
        None => println!(
            "{} Pending merge was {:?}, nothing to publish",
            style("ℹ").blue(),
            outcome.decision.status
        ),
    }

    if !documents.is_empty() {
        println!(
            "   failures: {} before, {} after",
            outcome.before.failures().len(),
            outcome.after.failures().len()
        );
    }

    Ok(())
}

/// Parse a batch file. A bare array is tagged with `base_revision`.
fn read_batch(path: &Path, base_revision: u64) -> anyhow::Result<ProposedRuleBatch> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid proposal {}: {}", path.display(), e))?;

    let batch = if value.is_array() {
        let rules: Vec<ProposedRule> = serde_json::from_value(value)?;
        ProposedRuleBatch::new(base_revision, rules)
    } else {
        serde_json::from_value(value)?
    };
    Ok(batch)
}

fn save_plan(path: &Path, plan: &MergePlan) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(plan)?)?;
    Ok(())
}

fn print_decision(outcome: &PipelineOutcome) {
    let decision: &MergeDecision = &outcome.decision;

    let status = match decision.status {
        MergeStatus::Accepted => style("ACCEPTED").green(),
        MergeStatus::NeedsConfirmation => style("NEEDS_CONFIRMATION").yellow(),
        MergeStatus::NoChange => style("NO_CHANGE").dim(),
    };
    println!("Status: {}", status);
    println!("Base revision: {}", decision.base_revision);
    if let Some(revision) = decision.revision {
        println!("Published revision: {}", revision);
    }

    if !decision.additions.is_empty() {
        println!("Added: {}", decision.additions.join(", "));
    }
    if !decision.replacements.is_empty() {
        println!("Replaced: {}", decision.replacements.join(", "));
    }
    for rejected in &decision.rejected {
        let name = if rejected.name.is_empty() {
            "<unnamed>"
        } else {
            rejected.name.as_str()
        };
        println!("{} Rejected {}: {}", style("✗").red(), name, rejected.reason);
    }

    println!();
    println!(
        "Failures: {} before, {} after",
        outcome.before.failures().len(),
        outcome.after.failures().len()
    );
    println!(
        "   {} improvements, {} regressions, {} value changes",
        style(decision.improvements.len()).green(),
        style(decision.regressions.len()).red(),
        style(decision.changes.len()).yellow()
    );

    for regression in &decision.regressions {
        println!(
            "  - {}/{}: {} -> NONE (rules: {})",
            regression.document_id,
            regression.field_name,
            regression.before_value.as_deref().unwrap_or("-"),
            regression.rules.join(", ")
        );
    }
    for change in &decision.changes {
        println!(
            "  ~ {}/{}: {} ({}) -> {} ({})",
            change.document_id,
            change.field_name,
            change.before_value.as_deref().unwrap_or("-"),
            change.before,
            change.after_value.as_deref().unwrap_or("-"),
            change.after
        );
    }
}
