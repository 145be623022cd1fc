//! `snapslot run`

use super::{connect, load_cipher};
use crate::cli::RunArgs;
use anyhow::Result;
use chrono::Local;
use snapslot_core::executor::preflight;
use snapslot_core::executor::report::{ArchiveAction, RunReport};
use snapslot_core::{Config, RunExecutor, RunOptions};

pub async fn execute(config: &Config, args: RunArgs) -> Result<()> {
    let date = args.date.unwrap_or_else(|| Local::now().date_naive());

    // Local preconditions are checked before the first remote command.
    let cipher = load_cipher(config)?;
    let archives = config.archives()?;
    preflight(&archives)?;

    let gateway = connect(config).await?;

    let mut options = RunOptions::from_config(config, date);
    if let Some(mode) = args.mode {
        options.mode = mode;
    }

    let report = RunExecutor::new(gateway.as_ref(), &cipher, options)
        .execute(&archives)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    for outcome in &report.archives {
        match &outcome.action {
            ArchiveAction::Uploaded { .. } => {
                println!("uploaded  {}  {}", outcome.fingerprint, outcome.file_name)
            }
            ArchiveAction::Linked { from } => println!(
                "linked    {}  {} (from {})",
                outcome.fingerprint, outcome.file_name, from
            ),
        }
    }
    println!("{}: {}", report.destination, report.summary());
}
