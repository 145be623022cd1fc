//! Two-slot snapshot rotation.
//!
//! At run start the destination slot `<root>/<date>` is made empty without
//! ever destroying the last good snapshot:
//!
//! | destination | backup (`<date>.bak`) | action                          |
//! |-------------|-----------------------|---------------------------------|
//! | absent      | any                   | create destination              |
//! | present     | absent                | move destination to backup      |
//! | present     | present               | delete destination (residue)    |
//!
//! A present backup slot is only ever removed by [`retain_only_destination`]
//! after a run has completed, so an interrupted run always leaves either a
//! complete destination or a complete backup behind.

use crate::layout::{remote_join, RunLayout};
use crate::remote::RemoteGateway;
use crate::utils::errors::Result;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationAction {
    /// No destination slot existed.
    Created,
    /// The destination was moved to the backup slot.
    Preserved,
    /// The destination was residue of an interrupted run and was deleted.
    DiscardedResidue,
}

/// Decide the transition for the observed slot state.
pub fn plan(destination_exists: bool, backup_exists: bool) -> RotationAction {
    match (destination_exists, backup_exists) {
        (false, _) => RotationAction::Created,
        (true, false) => RotationAction::Preserved,
        (true, true) => RotationAction::DiscardedResidue,
    }
}

/// Leave an empty destination slot behind, preserving or discarding what
/// was there according to [`plan`].
pub async fn prepare_destination(
    gateway: &dyn RemoteGateway,
    layout: &RunLayout,
) -> Result<RotationAction> {
    gateway.make_dir_all(layout.root()).await?;
    let slots = gateway.list(layout.root()).await?;

    let destination_exists = slots.contains(&layout.destination_name());
    let backup_exists = slots.contains(&layout.backup_name());
    let action = plan(destination_exists, backup_exists);

    match action {
        RotationAction::Created => {}
        RotationAction::Preserved => {
            info!(
                "Preserving previous snapshot {} as {}",
                layout.destination(),
                layout.backup()
            );
            gateway.rename(&layout.destination(), &layout.backup()).await?;
        }
        RotationAction::DiscardedResidue => {
            info!(
                "Discarding incomplete snapshot {} (last good snapshot is {})",
                layout.destination(),
                layout.backup()
            );
            gateway.remove_all(&layout.destination()).await?;
        }
    }

    gateway.make_dir_all(&layout.destination()).await?;
    Ok(action)
}

/// Delete every top-level slot except this run's destination. Returns the
/// names removed.
pub async fn retain_only_destination(
    gateway: &dyn RemoteGateway,
    layout: &RunLayout,
) -> Result<Vec<String>> {
    let keep = layout.destination_name();
    let mut removed = Vec::new();

    for name in gateway.list(layout.root()).await? {
        if name == keep {
            continue;
        }
        info!("Removing old slot {}", name);
        gateway.remove_all(&remote_join(layout.root(), &name)).await?;
        removed.push(name);
    }

    Ok(removed)
}
