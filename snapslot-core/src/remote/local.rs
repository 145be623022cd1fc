//! Gateway onto a locally mounted directory (NAS share, USB disk).
//!
//! Remote paths are resolved below a base directory and may not escape it.

use super::{remote_path_components, DownloadSink, RemoteGateway, UploadStream};
use crate::layout::remote_join;
use crate::transfer::progress::format_bytes;
use crate::utils::errors::{Result, SnapError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use walkdir::WalkDir;

pub struct LocalGateway {
    base: PathBuf,
}

impl LocalGateway {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.base.clone();
        for component in remote_path_components(path)? {
            resolved.push(component);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl RemoteGateway for LocalGateway {
    async fn find(&self, root: &str, name: &str) -> Result<Vec<String>> {
        debug!(root, name, "local find");
        let start = self.resolve(root)?;
        let root = root.to_string();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut matches = Vec::new();
            for entry in WalkDir::new(&start).min_depth(1).sort_by_file_name() {
                let entry = entry.map_err(std::io::Error::from)?;
                if entry.file_name().to_string_lossy() != name.as_str() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&start).unwrap_or(entry.path());
                let joined = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .fold(root.clone(), |acc, part| remote_join(&acc, &part));
                matches.push(joined);
            }
            matches.sort();
            Ok(matches)
        })
        .await?
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(self.resolve(dir)?).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn make_dir_all(&self, dir: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(dir)?).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let target = self.resolve(to)?;
        if tokio::fs::symlink_metadata(&target).await.is_ok() {
            return Err(SnapError::Remote {
                command: format!("mv {from} {to}"),
                status: 1,
                stderr: format!("{to} already exists"),
            });
        }
        tokio::fs::rename(self.resolve(from)?, target).await?;
        Ok(())
    }

    async fn remove_all(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&target).await?,
            Ok(_) => tokio::fs::remove_file(&target).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn hard_link(&self, target: &str, link: &str) -> Result<()> {
        tokio::fs::hard_link(self.resolve(target)?, self.resolve(link)?).await?;
        Ok(())
    }

    async fn touch(&self, path: &str) -> Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(path)?)
            .await?;
        let file = file.into_std().await;
        tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now())).await??;
        Ok(())
    }

    async fn write_stream(&self, path: &str, mut data: UploadStream) -> Result<u64> {
        let mut file = tokio::fs::File::create(self.resolve(path)?).await?;
        let written = tokio::io::copy(&mut data, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn read_stream(&self, path: &str, mut sink: DownloadSink) -> Result<u64> {
        let mut file = tokio::fs::File::open(self.resolve(path)?).await?;
        let copied = tokio::io::copy(&mut file, &mut sink).await?;
        sink.shutdown().await?;
        Ok(copied)
    }

    async fn quota(&self) -> Result<String> {
        let base = self.base.clone();
        let (files, bytes) = tokio::task::spawn_blocking(move || disk_usage(&base)).await??;
        Ok(format!(
            "{} used by {} files in {}",
            format_bytes(bytes),
            files,
            self.base.display()
        ))
    }

    fn describe(&self) -> String {
        format!("local:{}", self.base.display())
    }
}

/// Bytes used below `base`, counting hardlinked files once.
fn disk_usage(base: &Path) -> std::io::Result<(u64, u64)> {
    let mut seen = HashSet::new();
    let mut files = 0;
    let mut bytes = 0;

    for entry in WalkDir::new(base) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        if is_first_link(&mut seen, &metadata) {
            files += 1;
            bytes += metadata.len();
        }
    }

    Ok((files, bytes))
}

#[cfg(unix)]
fn is_first_link(seen: &mut HashSet<(u64, u64)>, metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    seen.insert((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn is_first_link(_seen: &mut HashSet<(u64, u64)>, _metadata: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn write(gateway: &LocalGateway, path: &str, data: &'static [u8]) -> Result<u64> {
        gateway.write_stream(path, Box::new(data)).await
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let gateway = LocalGateway::new(temp_dir.path());

        gateway.make_dir_all("backups/2024-03-01").await?;
        assert_eq!(write(&gateway, "backups/2024-03-01/a.tar.gpg", b"cipher").await?, 6);

        let (writer, mut reader) = tokio::io::duplex(64);
        let drain = tokio::spawn(async move {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.map(|_| out)
        });
        let copied = gateway
            .read_stream("backups/2024-03-01/a.tar.gpg", Box::new(writer))
            .await?;
        assert_eq!(copied, 6);
        assert_eq!(drain.await??, b"cipher");
        Ok(())
    }

    #[tokio::test]
    async fn test_find_across_slots() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let gateway = LocalGateway::new(temp_dir.path());

        for slot in ["2024-03-02", "2024-03-01.bak"] {
            gateway.make_dir_all(&format!("backups/{slot}")).await?;
            gateway.touch(&format!("backups/{slot}/a.tar.abc")).await?;
        }
        gateway.touch("backups/2024-03-02/b.tar.abc").await?;

        let found = gateway.find("backups", "a.tar.abc").await?;
        assert_eq!(
            found,
            vec!["backups/2024-03-01.bak/a.tar.abc", "backups/2024-03-02/a.tar.abc"]
        );
        assert!(gateway.find("backups", "c.tar.abc").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_refuses_existing_target() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let gateway = LocalGateway::new(temp_dir.path());
        gateway.make_dir_all("backups/a").await?;
        gateway.make_dir_all("backups/b").await?;

        assert!(matches!(
            gateway.rename("backups/a", "backups/b").await,
            Err(SnapError::Remote { .. })
        ));

        gateway.rename("backups/a", "backups/c").await?;
        assert_eq!(gateway.list("backups").await?, vec!["b", "c"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_all_missing_is_ok() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let gateway = LocalGateway::new(temp_dir.path());
        gateway.remove_all("backups/nothing-here").await?;

        gateway.make_dir_all("backups/x/y").await?;
        gateway.touch("backups/x/y/z").await?;
        gateway.remove_all("backups/x").await?;
        assert!(gateway.list("backups").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_hard_link_shares_content_and_quota_counts_once() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let gateway = LocalGateway::new(temp_dir.path());
        gateway.make_dir_all("backups/d1").await?;
        gateway.make_dir_all("backups/d2").await?;
        write(&gateway, "backups/d1/a.tar.gpg", b"0123456789").await?;
        gateway.hard_link("backups/d1/a.tar.gpg", "backups/d2/a.tar.gpg").await?;

        let linked = std::fs::read(temp_dir.path().join("backups/d2/a.tar.gpg"))?;
        assert_eq!(linked, b"0123456789");

        let quota = gateway.quota().await?;
        assert!(quota.starts_with("10.00 B used by 1 files"), "{quota}");
        Ok(())
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_base() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = LocalGateway::new(temp_dir.path());
        assert!(gateway.make_dir_all("../outside").await.is_err());
        assert!(gateway.touch("/etc/snapslot").await.is_err());
    }
}
