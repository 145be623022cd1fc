//! `snapslot inspect`

use super::connect;
use crate::cli::InspectArgs;
use anyhow::Result;
use snapslot_core::inventory::{self, SlotInventory};
use snapslot_core::Config;

pub async fn execute(config: &Config, args: InspectArgs) -> Result<()> {
    let gateway = connect(config).await?;
    let slots = inventory::inspect(gateway.as_ref(), &config.remote.root).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&slots)?);
        return Ok(());
    }

    if slots.is_empty() {
        println!("No slots under {}", config.remote.root);
    }
    for slot in &slots {
        print_slot(slot);
    }
    Ok(())
}

fn print_slot(slot: &SlotInventory) {
    println!(
        "{}  ({} of {} archives complete)",
        slot.name,
        slot.complete(),
        slot.archives.len()
    );
    for archive in &slot.archives {
        match (&archive.fingerprint, archive.encrypted) {
            (Some(fp), true) => println!("  {}  {}", fp, archive.file_name),
            (Some(fp), false) => println!("  {}  {} (ciphertext missing)", fp, archive.file_name),
            (None, _) => println!("  {:<64}  {}", "incomplete", archive.file_name),
        }
    }
    for other in &slot.other {
        println!("  {:<64}  {}", "other", other);
    }
}
