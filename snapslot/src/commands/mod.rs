//! Subcommand implementations.

pub mod download;
pub mod fingerprint;
pub mod inspect;
pub mod lookup;
pub mod quota;
pub mod run;
pub mod setup;
pub mod show_config;

use anyhow::Result;
use snapslot_core::crypto::{GpgCipher, Passphrase};
use snapslot_core::{remote, Config, RemoteGateway};

/// Validate the configuration and open the configured remote.
pub async fn connect(config: &Config) -> Result<Box<dyn RemoteGateway>> {
    config.validate()?;
    Ok(remote::connect(&config.remote).await?)
}

/// Read the passphrase file and build the cipher.
pub fn load_cipher(config: &Config) -> Result<GpgCipher> {
    let passphrase = Passphrase::load(config.passphrase_file()?)?;
    Ok(GpgCipher::new(&config.pipeline.cipher_program, passphrase))
}
