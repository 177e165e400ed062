//! Rules command - inspect revisions and roll back.

use clap::{Args, Subcommand};
use console::style;

use clinex_core::rules::RuleStore;

use super::load_config;

/// Arguments for the rules command.
#[derive(Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    command: RulesCommand,
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Print a revision as JSON (default: the active one)
    Show {
        /// Revision to show
        #[arg(short, long)]
        revision: Option<u64>,
    },

    /// List all revisions
    History,

    /// Publish a copy of an older revision's rules
    Rollback {
        /// Revision to restore
        revision: u64,
    },
}

pub async fn run(args: RulesArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = RuleStore::open(&config.rules.store_dir, config.rules.initial.clone())?;

    match args.command {
        RulesCommand::Show { revision } => {
            let record = match revision {
                Some(revision) => store.revision_at(revision)?.to_record(),
                None => store.get_active().to_record(),
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        RulesCommand::History => {
            for entry in store.history()? {
                let marker = if entry.active {
                    style("*").green()
                } else {
                    style(" ")
                };
                println!(
                    "{} rev {:>4}  {}  {:<9} {} rules",
                    marker,
                    entry.revision,
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    format!("{:?}", entry.origin).to_lowercase(),
                    entry.rule_count
                );
            }
        }
        RulesCommand::Rollback { revision } => {
            let published = store.rollback(revision)?;
            println!(
                "{} Published revision {} with the rules of revision {}",
                style("✓").green(),
                published,
                revision
            );
        }
    }

    Ok(())
}
