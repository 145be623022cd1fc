//! Cross-slot dedup lookup.
//!
//! A sidecar `<file_name>.<fingerprint>` in any slot under the backup root
//! proves that slot holds a complete `<file_name>.gpg` with that content,
//! because sidecars are only written after a successful upload.

use crate::layout::sidecar_name;
use crate::remote::RemoteGateway;
use crate::transfer::fingerprint::Fingerprint;
use crate::utils::errors::Result;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Resolution {
    /// An identical archive exists in `slot`.
    Linked { slot: String },
    NotFound,
}

/// Look for an archive named `file_name` with `fingerprint` in every slot
/// below `root`.
///
/// Matches outside the `<root>/<slot>/<sidecar>` shape are ignored. With
/// several matches the lexicographically smallest path wins; all of them
/// hold the same content.
pub async fn resolve(
    gateway: &dyn RemoteGateway,
    root: &str,
    file_name: &str,
    fingerprint: &Fingerprint,
) -> Result<Resolution> {
    let sidecar = sidecar_name(file_name, fingerprint);
    let mut matches = gateway.find(root, &sidecar).await?;
    matches.sort();
    debug!("{} sidecar match(es) for {}", matches.len(), sidecar);

    let prefix = format!("{}/", root.trim_end_matches('/'));
    let slot = matches.iter().find_map(|path| {
        let (slot, name) = path.strip_prefix(&prefix)?.split_once('/')?;
        (name == sidecar && !slot.is_empty()).then(|| slot.to_string())
    });

    Ok(match slot {
        Some(slot) => Resolution::Linked { slot },
        None => Resolution::NotFound,
    })
}
