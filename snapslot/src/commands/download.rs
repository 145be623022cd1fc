//! `snapslot download`

use super::{connect, load_cipher};
use crate::cli::DownloadArgs;
use anyhow::{Context, Result};
use snapslot_core::inventory;
use snapslot_core::layout::{encrypted_name, remote_join};
use snapslot_core::transfer::progress::TransferTimer;
use snapslot_core::transfer::transport::EncryptedTransport;
use snapslot_core::Config;

pub async fn execute(config: &Config, args: DownloadArgs) -> Result<()> {
    let cipher = load_cipher(config)?;
    let gateway = connect(config).await?;
    let root = &config.remote.root;

    let slot = match args.slot {
        Some(slot) => slot,
        None => {
            let slots = inventory::inspect(gateway.as_ref(), root).await?;
            inventory::newest_complete_slot(&slots, &args.file_name)?
                .name
                .clone()
        }
    };
    let source = remote_join(&remote_join(root, &slot), &encrypted_name(&args.file_name));

    let timer = TransferTimer::start();
    let mut output = tokio::fs::File::create(&args.output)
        .await
        .with_context(|| format!("creating {}", args.output.display()))?;

    let transport = EncryptedTransport::new(gateway.as_ref(), &cipher, config.pipeline.pipe_capacity);
    let received = transport.receive(&source, &mut output).await;
    let written = match received {
        Ok(written) => written,
        Err(e) => {
            drop(output);
            let _ = tokio::fs::remove_file(&args.output).await;
            return Err(e.into());
        }
    };
    output.sync_all().await?;

    println!(
        "{} from {} -> {}: {}",
        args.file_name,
        slot,
        args.output.display(),
        timer.summary(written)
    );
    Ok(())
}
