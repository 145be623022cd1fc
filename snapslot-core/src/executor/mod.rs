//! Run executor - Orchestrates one backup run.
//!
//! This module ties together:
//! - Slot rotation at run start
//! - Archive production and fingerprinting
//! - Dedup lookup and hardlinking
//! - Encrypted upload
//! - Retention cleanup and quota checkpoints

pub mod dedup;
pub mod report;

use crate::archive::{produce, Archive, ArchiveSource, ProducerOptions};
use crate::config::Config;
use crate::crypto::Cipher;
use crate::layout::{encrypted_name, sidecar_name, RunLayout, STAGING_SUFFIX};
use crate::remote::RemoteGateway;
use crate::rotation;
use crate::transfer::fingerprint::{fingerprint_stream, Fingerprint, FingerprintReader};
use crate::transfer::progress::{format_bytes, TransferTimer};
use crate::transfer::transport::{EncryptedTransport, Sent};
use crate::utils::errors::{Result, SnapError};
use chrono::{NaiveDate, Utc};
use dedup::Resolution;
use report::{ArchiveAction, ArchiveOutcome, RunReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{info, info_span, warn, Instrument};

/// How a directory archive travels from producer to remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    /// Fingerprint first, upload only when no identical archive exists.
    /// Changed archives are produced twice.
    #[default]
    Probe,
    /// Produce once, upload to a staging object while fingerprinting, then
    /// keep or replace it with a hardlink.
    SinglePass,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Probe => f.write_str("probe"),
            PipelineMode::SinglePass => f.write_str("single-pass"),
        }
    }
}

impl FromStr for PipelineMode {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "probe" => Ok(PipelineMode::Probe),
            "single-pass" => Ok(PipelineMode::SinglePass),
            other => Err(SnapError::Config(format!(
                "unknown pipeline mode '{other}' (expected probe or single-pass)"
            ))),
        }
    }
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub date: NaiveDate,
    /// Backup root on the remote side
    pub root: String,
    pub mode: PipelineMode,
    pub producer: ProducerOptions,
}

impl RunOptions {
    pub fn from_config(config: &Config, date: NaiveDate) -> Self {
        Self {
            date,
            root: config.remote.root.clone(),
            mode: config.pipeline.mode,
            producer: ProducerOptions {
                pipe_capacity: config.pipeline.pipe_capacity,
                idle_io_priority: config.pipeline.idle_io_priority,
            },
        }
    }
}

/// Main run executor
pub struct RunExecutor<'a> {
    gateway: &'a dyn RemoteGateway,
    cipher: &'a dyn Cipher,
    options: RunOptions,
}

/// Fingerprint and size of one produced stream.
struct Produced {
    fingerprint: Fingerprint,
    bytes: u64,
}

impl<'a> RunExecutor<'a> {
    pub fn new(gateway: &'a dyn RemoteGateway, cipher: &'a dyn Cipher, options: RunOptions) -> Self {
        Self {
            gateway,
            cipher,
            options,
        }
    }

    pub fn layout(&self) -> RunLayout {
        RunLayout::new(self.options.root.clone(), self.options.date)
    }

    /// Execute a run over `archives`, in order.
    ///
    /// The first failure aborts the run; the destination slot is then left
    /// partially populated and the next run's rotation recovers from it.
    pub async fn execute(&self, archives: &[Archive]) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("run", id = %run_id, date = %self.options.date);
        self.execute_inner(run_id, archives).instrument(span).await
    }

    async fn execute_inner(&self, run_id: String, archives: &[Archive]) -> Result<RunReport> {
        let timer = TransferTimer::start();
        let started_at = Utc::now();
        let layout = self.layout();

        preflight(archives)?;

        info!(
            "Starting run: {} archives to {} ({}, mode {})",
            archives.len(),
            layout.destination(),
            self.gateway.describe(),
            self.options.mode
        );
        self.sample_quota("before run").await;

        let rotation = rotation::prepare_destination(self.gateway, &layout).await?;
        info!("Destination {} ready ({:?})", layout.destination(), rotation);

        let mut outcomes = Vec::with_capacity(archives.len());
        for archive in archives {
            outcomes.push(self.process_archive(&layout, archive).await?);
        }
        self.sample_quota("after uploads").await;

        let removed_slots = rotation::retain_only_destination(self.gateway, &layout).await?;
        self.sample_quota("after cleanup").await;

        let report = RunReport {
            run_id,
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            date: layout.date(),
            destination: layout.destination(),
            started_at,
            rotation,
            archives: outcomes,
            removed_slots,
            duration_secs: timer.elapsed().as_secs(),
        };

        info!("Run completed: {}", report.summary());
        Ok(report)
    }

    /// Produce, fingerprint, dedup and store one archive.
    pub async fn process_archive(&self, layout: &RunLayout, archive: &Archive) -> Result<ArchiveOutcome> {
        let file_name = archive.file_name();
        // Command output is not guaranteed to repeat, so it is never produced twice.
        let mode = if archive.is_reproducible() {
            self.options.mode
        } else {
            PipelineMode::SinglePass
        };
        info!("Archiving {} from {}", file_name, archive.describe_source());

        match mode {
            PipelineMode::Probe => self.probe(layout, archive, &file_name).await,
            PipelineMode::SinglePass => self.single_pass(layout, archive, &file_name).await,
        }
    }

    async fn probe(&self, layout: &RunLayout, archive: &Archive, file_name: &str) -> Result<ArchiveOutcome> {
        let probed = self.fingerprint_only(archive).await?;

        let resolution =
            dedup::resolve(self.gateway, layout.root(), file_name, &probed.fingerprint).await?;
        if let Resolution::Linked { slot } = resolution {
            self.link(layout, &slot, file_name, &probed.fingerprint).await?;
            return Ok(ArchiveOutcome {
                file_name: file_name.to_string(),
                fingerprint: probed.fingerprint,
                action: ArchiveAction::Linked { from: slot },
                bytes: probed.bytes,
            });
        }

        let destination = layout.destination_object(&encrypted_name(file_name));
        let (uploaded, sent) = self.upload(archive, &destination).await?;
        if uploaded.fingerprint != probed.fingerprint {
            warn!(
                "{} changed between fingerprinting and upload; recording the uploaded content",
                file_name
            );
        }

        self.gateway
            .touch(&layout.destination_object(&sidecar_name(file_name, &uploaded.fingerprint)))
            .await?;

        Ok(ArchiveOutcome {
            file_name: file_name.to_string(),
            fingerprint: uploaded.fingerprint,
            action: ArchiveAction::Uploaded {
                encrypted_bytes: sent.uploaded,
            },
            bytes: uploaded.bytes,
        })
    }

    async fn single_pass(&self, layout: &RunLayout, archive: &Archive, file_name: &str) -> Result<ArchiveOutcome> {
        let destination = layout.destination_object(&encrypted_name(file_name));
        let staging = format!("{destination}{STAGING_SUFFIX}");
        let (produced, sent) = self.upload(archive, &staging).await?;

        let resolution =
            dedup::resolve(self.gateway, layout.root(), file_name, &produced.fingerprint).await?;
        let action = match resolution {
            Resolution::Linked { slot } => {
                self.gateway.remove_all(&staging).await?;
                self.link(layout, &slot, file_name, &produced.fingerprint).await?;
                ArchiveAction::Linked { from: slot }
            }
            Resolution::NotFound => {
                self.gateway.rename(&staging, &destination).await?;
                self.gateway
                    .touch(&layout.destination_object(&sidecar_name(file_name, &produced.fingerprint)))
                    .await?;
                ArchiveAction::Uploaded {
                    encrypted_bytes: sent.uploaded,
                }
            }
        };

        Ok(ArchiveOutcome {
            file_name: file_name.to_string(),
            fingerprint: produced.fingerprint,
            action,
            bytes: produced.bytes,
        })
    }

    /// Hardlink `<slot>/<file>.gpg` into the destination and mark it with a
    /// fresh sidecar.
    async fn link(&self, layout: &RunLayout, slot: &str, file_name: &str, fingerprint: &Fingerprint) -> Result<()> {
        let encrypted = encrypted_name(file_name);
        let source = layout.slot_object(slot, &encrypted);
        let target = layout.destination_object(&encrypted);

        info!("{} unchanged, linking from {}", file_name, slot);
        self.gateway.hard_link(&source, &target).await?;
        self.gateway
            .touch(&layout.destination_object(&sidecar_name(file_name, fingerprint)))
            .await
    }

    /// Produce `archive` into a discard sink, returning its fingerprint.
    async fn fingerprint_only(&self, archive: &Archive) -> Result<Produced> {
        let (reader, completion) = produce(archive, &self.options.producer)?.into_parts();
        let hashed = fingerprint_stream(reader).await;
        // A producer failure explains a broken stream better than the read error.
        completion.wait().await?;
        let (fingerprint, bytes) = hashed?;

        info!("Fingerprinted {} ({})", archive.file_name(), format_bytes(bytes));
        Ok(Produced { fingerprint, bytes })
    }

    /// Produce `archive` and stream it encrypted to `destination`,
    /// fingerprinting on the way.
    async fn upload(&self, archive: &Archive, destination: &str) -> Result<(Produced, Sent)> {
        let timer = TransferTimer::start();
        let transport = EncryptedTransport::new(
            self.gateway,
            self.cipher,
            self.options.producer.pipe_capacity,
        );

        let (reader, completion) = produce(archive, &self.options.producer)?.into_parts();
        let mut tee = FingerprintReader::new(reader);
        let sent = transport.send(&mut tee, destination).await;
        // Dropping the reader unblocks a producer stuck on a full pipe.
        let (fingerprint, bytes) = tee.finish();
        let produced = completion.wait().await;

        let sent = sent?;
        produced?;

        info!(
            "Uploaded {} to {}: {}",
            archive.file_name(),
            destination,
            timer.summary(sent.uploaded)
        );
        Ok((Produced { fingerprint, bytes }, sent))
    }

    async fn sample_quota(&self, checkpoint: &str) {
        match self.gateway.quota().await {
            Ok(usage) => info!("Quota {}: {}", checkpoint, usage.trim()),
            Err(e) => warn!("Quota check {} failed: {}", checkpoint, e),
        }
    }
}

/// Checks that need no remote access: something to do, unique file names,
/// and every directory source present.
pub fn preflight(archives: &[Archive]) -> Result<()> {
    if archives.is_empty() {
        return Err(SnapError::Precondition("no archives configured".into()));
    }

    let mut seen = BTreeSet::new();
    for archive in archives {
        let file_name = archive.file_name();
        if !seen.insert(file_name.clone()) {
            return Err(SnapError::Precondition(format!(
                "archive file name {file_name} is used more than once"
            )));
        }
        if let ArchiveSource::Directory(path) = &archive.source {
            if !path.exists() {
                return Err(SnapError::Precondition(format!(
                    "source {} for {} does not exist",
                    path.display(),
                    file_name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryGateway, RecordingCipher};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn options(mode: PipelineMode) -> RunOptions {
        RunOptions {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            root: "backups".to_string(),
            mode,
            producer: ProducerOptions {
                pipe_capacity: 4096,
                idle_io_priority: false,
            },
        }
    }

    fn source(dir: &Path, name: &str, content: &[u8]) -> std::io::Result<Archive> {
        let path = dir.join(name);
        fs::create_dir_all(&path)?;
        fs::write(path.join("data.bin"), content)?;
        Ok(Archive::directory(name, path))
    }

    #[test]
    fn test_pipeline_mode_parsing() -> Result<()> {
        assert_eq!("probe".parse::<PipelineMode>()?, PipelineMode::Probe);
        assert_eq!("single-pass".parse::<PipelineMode>()?, PipelineMode::SinglePass);
        assert!("fast".parse::<PipelineMode>().is_err());
        assert_eq!(PipelineMode::SinglePass.to_string(), "single-pass");
        Ok(())
    }

    #[test]
    fn test_preflight() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let photos = source(temp_dir.path(), "photos", b"x")?;

        assert!(matches!(preflight(&[]), Err(SnapError::Precondition(_))));
        assert!(preflight(std::slice::from_ref(&photos)).is_ok());
        assert!(matches!(
            preflight(&[photos.clone(), photos.clone()]),
            Err(SnapError::Precondition(_))
        ));
        assert!(matches!(
            preflight(&[Archive::directory("gone", temp_dir.path().join("gone"))]),
            Err(SnapError::Precondition(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_preflight_failure_touches_nothing() {
        let gateway = MemoryGateway::new();
        let cipher = RecordingCipher::new();
        let executor = RunExecutor::new(&gateway, &cipher, options(PipelineMode::Probe));

        let missing = Archive::directory("gone", "/nonexistent/snapslot/gone");
        assert!(executor.execute(&[missing]).await.is_err());
        assert!(gateway.paths().is_empty());
    }

    #[tokio::test]
    async fn test_probe_uploads_then_links() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = source(temp_dir.path(), "photos", b"holiday")?;
        let gateway = MemoryGateway::new();
        let cipher = RecordingCipher::new();
        let executor = RunExecutor::new(&gateway, &cipher, options(PipelineMode::Probe));
        let layout = executor.layout();
        gateway.insert_dir("backups/2024-03-01");

        let first = executor.process_archive(&layout, &archive).await?;
        assert!(matches!(first.action, ArchiveAction::Uploaded { .. }));
        assert!(gateway.exists(&format!(
            "backups/2024-03-01/photos.tar.{}",
            first.fingerprint
        )));

        gateway.rename("backups/2024-03-01", "backups/2024-02-29").await?;
        gateway.insert_dir("backups/2024-03-01");

        let second = executor.process_archive(&layout, &archive).await?;
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(
            second.action,
            ArchiveAction::Linked {
                from: "2024-02-29".to_string()
            }
        );
        assert_eq!(cipher.encrypt_count(), 1);
        assert!(gateway.same_file(
            "backups/2024-02-29/photos.tar.gpg",
            "backups/2024-03-01/photos.tar.gpg"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_single_pass_links_and_removes_staging() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = source(temp_dir.path(), "photos", b"holiday")?;
        let gateway = MemoryGateway::new();
        let cipher = RecordingCipher::new();
        let executor = RunExecutor::new(&gateway, &cipher, options(PipelineMode::SinglePass));
        let layout = executor.layout();
        gateway.insert_dir("backups/2024-03-01");

        let first = executor.process_archive(&layout, &archive).await?;
        assert!(matches!(first.action, ArchiveAction::Uploaded { .. }));
        assert!(gateway.exists("backups/2024-03-01/photos.tar.gpg"));
        assert!(!gateway.exists("backups/2024-03-01/photos.tar.gpg.partial"));

        gateway.rename("backups/2024-03-01", "backups/2024-02-29").await?;
        gateway.insert_dir("backups/2024-03-01");

        let second = executor.process_archive(&layout, &archive).await?;
        assert!(matches!(second.action, ArchiveAction::Linked { .. }));
        assert_eq!(
            gateway.children("backups/2024-03-01"),
            vec![
                format!("photos.tar.{}", second.fingerprint),
                "photos.tar.gpg".to_string()
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_writes_no_sidecar() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let archive = source(temp_dir.path(), "photos", &vec![3u8; 100_000])?;
        let gateway = MemoryGateway::new();
        gateway.insert_dir("backups/2024-03-01");
        gateway.fail_writes_named("photos.tar.gpg");
        let cipher = RecordingCipher::new();
        let executor = RunExecutor::new(&gateway, &cipher, options(PipelineMode::Probe));

        let result = executor.process_archive(&executor.layout(), &archive).await;
        assert!(matches!(result, Err(SnapError::Remote { .. })));
        assert_eq!(gateway.children("backups/2024-03-01"), vec!["photos.tar.gpg"]);
        Ok(())
    }
}
