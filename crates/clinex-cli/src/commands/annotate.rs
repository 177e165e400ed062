//! Annotate command - record confirmed values and score runs against them.

use clap::{Args, Subcommand};
use console::style;

use clinex_core::annotation::{Annotation, AnnotationLog, score};
use clinex_core::pipeline::Pipeline;

use super::{load_config, load_documents};

/// Arguments for the annotate command.
#[derive(Args)]
pub struct AnnotateArgs {
    #[command(subcommand)]
    command: AnnotateCommand,
}

#[derive(Subcommand)]
enum AnnotateCommand {
    /// Append a confirmed value to the annotation log
    Add {
        /// Document id
        #[arg(long)]
        doc_id: String,

        /// Document text
        #[arg(long)]
        text: String,

        /// Field name (e.g. "LVEF")
        #[arg(long)]
        field: String,

        /// Confirmed value
        #[arg(long)]
        value: String,
    },

    /// Run the active rules and compare against the annotation log
    Score {
        /// Documents to run (default: the annotated documents)
        input: Option<String>,
    },
}

pub async fn run(args: AnnotateArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let log = AnnotationLog::new(config.annotations_path());

    match args.command {
        AnnotateCommand::Add {
            doc_id,
            text,
            field,
            value,
        } => {
            log.append(&Annotation::new(doc_id, text, field, value))?;
            println!(
                "{} Annotation saved to {}",
                style("✓").green(),
                log.path().display()
            );
        }
        AnnotateCommand::Score { input } => {
            let annotations = log.read_all()?;
            if annotations.is_empty() {
                anyhow::bail!("No annotations in {}", log.path().display());
            }

            let documents = match input {
                Some(input) => load_documents(&input)?,
                None => log.documents()?,
            };
            let pipeline = Pipeline::from_config(&config)?;
            let report = pipeline.run_batch(&documents);
            let score = score(&report, &annotations);

            println!(
                "{} {}/{} annotations matched with revision {} ({:.1}%)",
                style("ℹ").blue(),
                score.correct,
                score.total(),
                report.revision,
                score.accuracy() * 100.0
            );
            for mismatch in &score.incorrect {
                println!(
                    "  {} {}/{}: expected {}, got {}",
                    style("✗").red(),
                    mismatch.doc_id,
                    mismatch.param_name,
                    mismatch.expected,
                    mismatch.extracted.as_deref().unwrap_or("-")
                );
            }
            for mismatch in &score.missing {
                println!(
                    "  {} {}/{}: expected {}, nothing extracted",
                    style("?").yellow(),
                    mismatch.doc_id,
                    mismatch.param_name,
                    mismatch.expected
                );
            }
            if score.unscored > 0 {
                println!("   {} annotations for documents not in the run", score.unscored);
            }
        }
    }

    Ok(())
}
