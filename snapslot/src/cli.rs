//! Command-line interface definition.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use snapslot_core::PipelineMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (default: ./snapslot.toml if present)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Take a snapshot of every configured source
    Run(RunArgs),
    /// Check the passphrase file and prepare the remote backup root
    Setup,
    /// List remote slots and the archives they hold
    Inspect(InspectArgs),
    /// Find a remote slot holding an archive with the given fingerprint
    Lookup(LookupArgs),
    /// Fingerprint a local directory the way a run would
    Fingerprint(FingerprintArgs),
    /// Download and decrypt one archive
    Download(DownloadArgs),
    /// Print the remote quota report
    Quota,
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Snapshot date (default: today, local time)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,

    /// Pipeline mode, overrides pipeline.mode
    #[arg(long, value_name = "probe|single-pass")]
    pub mode: Option<PipelineMode>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Archive file name, e.g. photos.tar
    pub file_name: String,
    /// Hex SHA-256 of the raw archive
    pub fingerprint: String,
}

#[derive(Args, Debug)]
pub struct FingerprintArgs {
    /// Directory to archive
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Archive file name, e.g. photos.tar
    pub file_name: String,
    /// Local output file
    pub output: PathBuf,
    /// Slot to read from (default: newest slot holding a complete copy)
    #[arg(long)]
    pub slot: Option<String>,
}
