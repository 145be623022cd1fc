//! Read-only view of the slots under a backup root.

use crate::layout::{
    parse_sidecar, remote_join, BACKUP_SLOT_SUFFIX, ENCRYPTED_SUFFIX, STAGING_SUFFIX,
};
use crate::remote::RemoteGateway;
use crate::transfer::fingerprint::Fingerprint;
use crate::utils::errors::{Result, SnapError};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInventory {
    pub name: String,
    pub archives: Vec<ArchiveEntry>,
    /// Objects that are neither archives nor sidecars, e.g. staging leftovers.
    pub other: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub file_name: String,
    /// `<file>.gpg` is present
    pub encrypted: bool,
    /// From the sidecar; absent for an interrupted upload
    pub fingerprint: Option<Fingerprint>,
}

impl SlotInventory {
    pub fn is_backup_slot(&self) -> bool {
        self.name.ends_with(BACKUP_SLOT_SUFFIX)
    }

    /// Archives that are complete: both ciphertext and sidecar exist.
    pub fn complete(&self) -> usize {
        self.archives
            .iter()
            .filter(|a| a.encrypted && a.fingerprint.is_some())
            .count()
    }

    /// Whether `file_name` is stored here with both ciphertext and sidecar.
    pub fn holds_complete(&self, file_name: &str) -> bool {
        self.archives
            .iter()
            .any(|a| a.file_name == file_name && a.encrypted && a.fingerprint.is_some())
    }

    /// Snapshot date of the slot; a backup slot sorts just before its
    /// destination.
    fn recency(&self) -> (&str, bool) {
        let date = self
            .name
            .strip_suffix(BACKUP_SLOT_SUFFIX)
            .unwrap_or(&self.name);
        (date, !self.is_backup_slot())
    }
}

/// List every slot under `root` and classify its objects.
pub async fn inspect(gateway: &dyn RemoteGateway, root: &str) -> Result<Vec<SlotInventory>> {
    let mut slots = Vec::new();
    for name in gateway.list(root).await? {
        let objects = gateway.list(&remote_join(root, &name)).await?;
        slots.push(classify(name, objects));
    }
    Ok(slots)
}

fn classify(name: String, objects: Vec<String>) -> SlotInventory {
    let mut archives: BTreeMap<String, ArchiveEntry> = BTreeMap::new();
    let mut other = Vec::new();

    for object in objects {
        if object.ends_with(STAGING_SUFFIX) {
            other.push(object);
        } else if let Some(file_name) = object.strip_suffix(ENCRYPTED_SUFFIX) {
            entry(&mut archives, file_name).encrypted = true;
        } else if let Some((file_name, fingerprint)) = parse_sidecar(&object) {
            entry(&mut archives, file_name).fingerprint = Some(fingerprint);
        } else {
            other.push(object);
        }
    }

    SlotInventory {
        name,
        archives: archives.into_values().collect(),
        other,
    }
}

fn entry<'a>(archives: &'a mut BTreeMap<String, ArchiveEntry>, file_name: &str) -> &'a mut ArchiveEntry {
    archives
        .entry(file_name.to_string())
        .or_insert_with(|| ArchiveEntry {
            file_name: file_name.to_string(),
            encrypted: false,
            fingerprint: None,
        })
}

/// Newest slot holding a complete copy of `file_name`.
///
/// Backup slots are candidates: after an interrupted run the destination may
/// hold a truncated object while `<date>.bak` still holds the good one.
pub fn newest_complete_slot<'a>(slots: &'a [SlotInventory], file_name: &str) -> Result<&'a SlotInventory> {
    slots
        .iter()
        .filter(|s| s.holds_complete(file_name))
        .max_by(|a, b| a.recency().cmp(&b.recency()))
        .ok_or_else(|| {
            SnapError::Precondition(format!(
                "no complete copy of {file_name} found under the backup root"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::sidecar_name;
    use crate::testutil::MemoryGateway;

    #[tokio::test]
    async fn test_inspect_classifies_objects() -> Result<()> {
        let fp = Fingerprint::of_bytes(b"photos");
        let gateway = MemoryGateway::new();
        gateway.insert_file("backups/2024-03-01/photos.tar.gpg", b"c");
        gateway.insert_file(&format!("backups/2024-03-01/{}", sidecar_name("photos.tar", &fp)), b"");
        gateway.insert_file("backups/2024-03-01/music.tar.gpg", b"half");
        gateway.insert_file("backups/2024-03-01/videos.txt.gpg.partial", b"x");

        let slots = inspect(&gateway, "backups").await?;
        assert_eq!(slots.len(), 1);
        let slot = &slots[0];
        assert_eq!(slot.complete(), 1);
        assert_eq!(
            slot.archives,
            vec![
                ArchiveEntry {
                    file_name: "music.tar".to_string(),
                    encrypted: true,
                    fingerprint: None,
                },
                ArchiveEntry {
                    file_name: "photos.tar".to_string(),
                    encrypted: true,
                    fingerprint: Some(fp),
                },
            ]
        );
        assert_eq!(slot.other, vec!["videos.txt.gpg.partial"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_newest_complete_slot_prefers_destination() -> Result<()> {
        let fp = Fingerprint::of_bytes(b"photos");
        let gateway = MemoryGateway::new();
        for slot in ["2024-02-28", "2024-02-29", "2024-02-29.bak"] {
            gateway.insert_file(&format!("backups/{slot}/photos.tar.gpg"), b"c");
            gateway.insert_file(&format!("backups/{slot}/{}", sidecar_name("photos.tar", &fp)), b"");
        }

        let slots = inspect(&gateway, "backups").await?;
        assert_eq!(newest_complete_slot(&slots, "photos.tar")?.name, "2024-02-29");
        assert!(newest_complete_slot(&slots, "music.tar").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_interrupted_destination_falls_back_to_backup_slot() -> Result<()> {
        let fp = Fingerprint::of_bytes(b"photos");
        let gateway = MemoryGateway::new();
        gateway.insert_file("backups/2024-03-01.bak/photos.tar.gpg", b"complete");
        gateway.insert_file(
            &format!("backups/2024-03-01.bak/{}", sidecar_name("photos.tar", &fp)),
            b"",
        );
        gateway.insert_file("backups/2024-03-01/photos.tar.gpg", b"trunc");

        let slots = inspect(&gateway, "backups").await?;
        assert_eq!(
            newest_complete_slot(&slots, "photos.tar")?.name,
            "2024-03-01.bak"
        );
        Ok(())
    }
}
