//! Remote naming scheme.
//!
//! ```text
//! <root>/<date>/<file>.gpg        encrypted archive
//! <root>/<date>/<file>.<sha256>   zero-length fingerprint sidecar
//! <root>/<date>.bak/...           previous snapshot kept during a run
//! ```

use crate::transfer::fingerprint::Fingerprint;
use chrono::NaiveDate;

/// Suffix of encrypted archive objects.
pub const ENCRYPTED_SUFFIX: &str = ".gpg";

/// Suffix of backup-of-backup slots.
pub const BACKUP_SLOT_SUFFIX: &str = ".bak";

/// Suffix of in-flight uploads in single-pass mode.
pub const STAGING_SUFFIX: &str = ".partial";

/// Join remote path components with `/`.
pub fn remote_join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// `photos.tar` -> `photos.tar.gpg`
pub fn encrypted_name(file_name: &str) -> String {
    format!("{file_name}{ENCRYPTED_SUFFIX}")
}

/// `photos.tar` + fingerprint -> `photos.tar.<hex>`
pub fn sidecar_name(file_name: &str, fingerprint: &Fingerprint) -> String {
    format!("{}.{}", file_name, fingerprint.as_str())
}

/// Split a sidecar object name back into archive file name and fingerprint.
pub fn parse_sidecar(object_name: &str) -> Option<(&str, Fingerprint)> {
    let (file_name, hex) = object_name.rsplit_once('.')?;
    if file_name.is_empty() {
        return None;
    }
    Fingerprint::parse(hex).map(|fp| (file_name, fp))
}

/// Slot paths owned by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: String,
    date: NaiveDate,
}

impl RunLayout {
    pub fn new(root: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            date,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// `2024-03-01`
    pub fn destination_name(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `2024-03-01.bak`
    pub fn backup_name(&self) -> String {
        format!("{}{}", self.destination_name(), BACKUP_SLOT_SUFFIX)
    }

    pub fn destination(&self) -> String {
        remote_join(&self.root, &self.destination_name())
    }

    pub fn backup(&self) -> String {
        remote_join(&self.root, &self.backup_name())
    }

    /// Path of `name` inside any slot under the root.
    pub fn slot_object(&self, slot: &str, name: &str) -> String {
        remote_join(&remote_join(&self.root, slot), name)
    }

    /// Path of `name` inside this run's destination slot.
    pub fn destination_object(&self, name: &str) -> String {
        remote_join(&self.destination(), name)
    }
}
