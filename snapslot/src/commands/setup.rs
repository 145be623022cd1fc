//! `snapslot setup`

use super::connect;
use anyhow::Result;
use snapslot_core::crypto::Passphrase;
use snapslot_core::{Config, RemoteGateway};

pub async fn execute(config: &Config) -> Result<()> {
    Passphrase::load(config.passphrase_file()?)?;
    println!("Passphrase file {} is usable", config.passphrase_file()?.display());

    let gateway = connect(config).await?;
    gateway.make_dir_all(&config.remote.root).await?;
    println!("Backup root {} ready on {}", config.remote.root, gateway.describe());

    match gateway.quota().await {
        Ok(usage) => println!("{}", usage.trim()),
        Err(e) => tracing::warn!("Quota check failed: {}", e),
    }
    Ok(())
}
