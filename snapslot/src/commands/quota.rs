//! `snapslot quota`

use super::connect;
use anyhow::Result;
use snapslot_core::{Config, RemoteGateway};

pub async fn execute(config: &Config) -> Result<()> {
    let gateway = connect(config).await?;
    println!("{}", gateway.quota().await?.trim());
    Ok(())
}
