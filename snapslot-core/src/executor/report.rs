//! Run report types.
//!
//! A report records what each archive of a run ended up as, so the CLI can
//! print it as JSON and tests can assert on it.

use crate::rotation::RotationAction;
use crate::transfer::fingerprint::Fingerprint;
use crate::transfer::progress::format_bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Outcome of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub host: String,
    pub date: NaiveDate,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub rotation: RotationAction,
    pub archives: Vec<ArchiveOutcome>,
    /// Top-level slots deleted by retention.
    pub removed_slots: Vec<String>,
    pub duration_secs: u64,
}

/// What happened to one archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveOutcome {
    pub file_name: String,
    pub fingerprint: Fingerprint,
    pub action: ArchiveAction,
    /// Raw (pre-encryption) archive size.
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveAction {
    /// Encrypted and written to the destination slot.
    Uploaded { encrypted_bytes: u64 },
    /// Hardlinked from an identical archive in `from`.
    Linked { from: String },
}

impl RunReport {
    pub fn uploaded(&self) -> usize {
        self.archives
            .iter()
            .filter(|a| matches!(a.action, ArchiveAction::Uploaded { .. }))
            .count()
    }

    pub fn linked(&self) -> usize {
        self.archives.len() - self.uploaded()
    }

    /// Raw bytes of every archive in the snapshot.
    pub fn total_bytes(&self) -> u64 {
        self.archives.iter().map(|a| a.bytes).sum()
    }

    /// Ciphertext bytes actually sent.
    pub fn uploaded_bytes(&self) -> u64 {
        self.archives
            .iter()
            .map(|a| match a.action {
                ArchiveAction::Uploaded { encrypted_bytes } => encrypted_bytes,
                ArchiveAction::Linked { .. } => 0,
            })
            .sum()
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} archives ({} uploaded, {} linked), {} in snapshot, {} sent, {}s",
            self.archives.len(),
            self.uploaded(),
            self.linked(),
            format_bytes(self.total_bytes()),
            format_bytes(self.uploaded_bytes()),
            self.duration_secs
        )
    }
}
