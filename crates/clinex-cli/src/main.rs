//! CLI application for rule-based clinical text extraction.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{annotate, config, propose, rules, run};

/// Clinex - extract structured fields from clinical text with evolving rules
#[derive(Parser)]
#[command(name = "clinex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the active rule set over a batch of documents
    Run(run::RunArgs),

    /// Validate and merge proposed rules against a document corpus
    Propose(propose::ProposeArgs),

    /// Publish the pending merge that is waiting for confirmation
    Confirm(propose::ConfirmArgs),

    /// Inspect rule revisions and roll back
    Rules(rules::RulesArgs),

    /// Record and score human annotations
    Annotate(annotate::AnnotateArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => run::run(args, config_path).await,
        Commands::Propose(args) => propose::run(args, config_path).await,
        Commands::Confirm(args) => propose::confirm(args, config_path).await,
        Commands::Rules(args) => rules::run(args, config_path).await,
        Commands::Annotate(args) => annotate::run(args, config_path).await,
        Commands::Config(args) => config::run(args, config_path).await,
    }
}
