//! `snapslot lookup`

use super::connect;
use crate::cli::LookupArgs;
use anyhow::{anyhow, Result};
use snapslot_core::executor::dedup::{self, Resolution};
use snapslot_core::{Config, Fingerprint};

pub async fn execute(config: &Config, args: LookupArgs) -> Result<()> {
    let fingerprint = Fingerprint::parse(&args.fingerprint).ok_or_else(|| {
        anyhow!(
            "invalid fingerprint '{}': expected 64 lowercase hex characters",
            args.fingerprint
        )
    })?;

    let gateway = connect(config).await?;
    match dedup::resolve(gateway.as_ref(), &config.remote.root, &args.file_name, &fingerprint).await? {
        Resolution::Linked { slot } => println!("{} is stored in {}", args.file_name, slot),
        Resolution::NotFound => println!("{} with this fingerprint is not stored", args.file_name),
    }
    Ok(())
}
