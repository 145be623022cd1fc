//! `snapslot config`

use anyhow::Result;
use snapslot_core::Config;

pub fn execute(config: &Config) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
