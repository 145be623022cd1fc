//! `snapslot fingerprint`

use crate::cli::FingerprintArgs;
use anyhow::{anyhow, Result};
use snapslot_core::archive::{produce, ProducerOptions};
use snapslot_core::transfer::fingerprint::fingerprint_stream;
use snapslot_core::transfer::progress::format_bytes;
use snapslot_core::{Archive, Config};

pub async fn execute(config: &Config, args: FingerprintArgs) -> Result<()> {
    if !args.path.is_dir() {
        return Err(anyhow!("{} is not a directory", args.path.display()));
    }
    let name = args
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("cannot derive an archive name from {}", args.path.display()))?;

    let archive = Archive::directory(name, &args.path);
    let options = ProducerOptions {
        pipe_capacity: config.pipeline.pipe_capacity,
        idle_io_priority: config.pipeline.idle_io_priority,
    };

    let (reader, completion) = produce(&archive, &options)?.into_parts();
    let hashed = fingerprint_stream(reader).await;
    completion.wait().await?;
    let (fingerprint, bytes) = hashed?;

    tracing::info!("{} is {}", archive.file_name(), format_bytes(bytes));
    println!("{}  {}", fingerprint, archive.file_name());
    Ok(())
}
