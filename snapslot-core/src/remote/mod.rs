//! Remote command gateway.
//!
//! The remote store has no filesystem API: every operation is one command
//! round trip with no session state beyond the files themselves. Paths are
//! `/`-separated and relative to the remote login directory (or the base
//! directory of a [`LocalGateway`]).

pub mod local;
pub mod ssh;

pub use local::LocalGateway;
pub use ssh::SshGateway;

use crate::config::{RemoteConfig, RemoteKind};
use crate::utils::errors::{Result, SnapError};
use async_trait::async_trait;
use ssh::SshOptions;
use tokio::io::{AsyncRead, AsyncWrite};

/// Owned byte source handed to a gateway for upload.
pub type UploadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Owned byte sink a gateway downloads into.
pub type DownloadSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Fixed vocabulary of remote operations.
///
/// Every method is an independent round trip; a non-zero remote exit status
/// is returned as [`crate::SnapError::Remote`] and is never retried.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Paths of every entry named exactly `name` anywhere below `root`.
    async fn find(&self, root: &str, name: &str) -> Result<Vec<String>>;

    /// Entry names directly inside `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// `mkdir -p`
    async fn make_dir_all(&self, dir: &str) -> Result<()>;

    /// `mv from to`; `to` must not exist.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// `rm -rf`; a missing path is not an error.
    async fn remove_all(&self, path: &str) -> Result<()>;

    /// Create `link` as a hardlink to the existing file `target`.
    async fn hard_link(&self, target: &str, link: &str) -> Result<()>;

    /// Create an empty file (or update an existing one's mtime).
    async fn touch(&self, path: &str) -> Result<()>;

    /// Create `path` and fill it with everything `data` yields.
    /// Returns the number of bytes written.
    async fn write_stream(&self, path: &str, data: UploadStream) -> Result<u64>;

    /// Stream the content of `path` into `sink`.
    async fn read_stream(&self, path: &str, sink: DownloadSink) -> Result<u64>;

    /// Free-form usage report, for logging only.
    async fn quota(&self) -> Result<String>;

    /// Short description for log messages.
    fn describe(&self) -> String;
}

/// Open the gateway described by `config`.
pub async fn connect(config: &RemoteConfig) -> Result<Box<dyn RemoteGateway>> {
    match config.kind {
        RemoteKind::Ssh => {
            let user = match &config.user {
                Some(user) => user.clone(),
                None => current_user()?,
            };
            let gateway = SshGateway::connect(SshOptions {
                host: config.host.clone(),
                port: config.port,
                user,
                identity_file: config.identity_file.clone(),
                known_hosts: config.known_hosts.clone(),
                strict_host_key_checking: config.strict_host_key_checking,
            })
            .await?;
            Ok(Box::new(gateway))
        }
        RemoteKind::Local => {
            let base = config
                .path
                .clone()
                .ok_or_else(|| SnapError::Config("remote.path is required for kind = \"local\"".into()))?;
            if !base.is_dir() {
                return Err(SnapError::Precondition(format!(
                    "local remote {} is not a directory",
                    base.display()
                )));
            }
            Ok(Box::new(LocalGateway::new(base)))
        }
    }
}

fn current_user() -> Result<String> {
    let uid = nix::unistd::Uid::current();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(SnapError::Config(format!(
            "no user name for uid {uid}; set remote.user"
        ))),
        Err(e) => Err(SnapError::Config(format!("cannot look up uid {uid}: {e}"))),
    }
}

/// Split a relative remote path into its components.
///
/// Absolute paths and `..` are rejected so a path can never leave the
/// remote login (or base) directory.
pub fn remote_path_components(path: &str) -> Result<Vec<&str>> {
    if path.starts_with('/') {
        return Err(SnapError::Config(format!("remote path {path} must be relative")));
    }
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if parts.iter().any(|p| *p == "..") {
        return Err(SnapError::Config(format!("remote path {path} may not contain ..")));
    }
    Ok(parts)
}

/// Quote a word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Escape `find -name` glob metacharacters so the pattern matches literally.
pub fn escape_glob(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("backups/2024-03-01"), "'backups/2024-03-01'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_remote_path_components() {
        assert_eq!(
            remote_path_components("backups//2024-03-01/./a").unwrap(),
            vec!["backups", "2024-03-01", "a"]
        );
        assert!(remote_path_components("/backups").is_err());
        assert!(remote_path_components("backups/../etc").is_err());
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("photos.tar.ab12"), "photos.tar.ab12");
        assert_eq!(escape_glob("a*b?[c]"), r"a\*b\?\[c\]");
    }
}
