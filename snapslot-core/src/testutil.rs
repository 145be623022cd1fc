//! In-memory remote store for tests.

use crate::crypto::{Cipher, CipherOutput, PlainInput};
use crate::remote::{remote_path_components, DownloadSink, RemoteGateway, UploadStream};
use crate::utils::errors::{Result, SnapError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    /// Hardlinks share the same allocation.
    File(Arc<Vec<u8>>),
}

/// Remote gateway over an in-memory tree with POSIX-like semantics:
/// parents must exist, `mv` refuses an existing target, hardlinks share
/// content. Every mutating operation is recorded in order.
#[derive(Default)]
pub struct MemoryGateway {
    nodes: Mutex<BTreeMap<String, Node>>,
    operations: Mutex<Vec<String>>,
    writes: AtomicUsize,
    fail_writes_named: Mutex<Option<String>>,
}

fn normalize(path: &str) -> Result<String> {
    Ok(remote_path_components(path)?.join("/"))
}

fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn is_below(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

fn failure(command: String, stderr: impl Into<String>) -> SnapError {
    SnapError::Remote {
        command,
        status: 1,
        stderr: stderr.into(),
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Node>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, operation: String) {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(operation);
    }

    /// Mutating operations performed so far, e.g. `mv backups/d backups/d.bak`.
    pub fn operations(&self) -> Vec<String> {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of `write_stream` calls, successful or not.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every later `write_stream` to a path ending in `name` fail after
    /// consuming its input.
    pub fn fail_writes_named(&self, name: &str) {
        *self
            .fail_writes_named
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(name.to_string());
    }

    pub fn clear_write_failures(&self) {
        *self
            .fail_writes_named
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Create a file (and its parents) directly, bypassing the operation log.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let mut nodes = self.nodes();
        let mut prefix = String::new();
        let parts: Vec<&str> = path.split('/').collect();
        for part in &parts[..parts.len() - 1] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            nodes.entry(prefix.clone()).or_insert(Node::Dir);
        }
        nodes.insert(path.to_string(), Node::File(Arc::new(data.to_vec())));
    }

    /// Create a directory (and its parents) directly.
    pub fn insert_dir(&self, path: &str) {
        let mut nodes = self.nodes();
        let mut prefix = String::new();
        for part in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            nodes.entry(prefix.clone()).or_insert(Node::Dir);
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes().contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes().get(path), Some(Node::Dir))
    }

    /// Content of the file at `path`.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes().get(path) {
            Some(Node::File(data)) => Some(data.as_ref().clone()),
            _ => None,
        }
    }

    /// Whether both paths are links to the same file.
    pub fn same_file(&self, a: &str, b: &str) -> bool {
        let nodes = self.nodes();
        match (nodes.get(a), nodes.get(b)) {
            (Some(Node::File(x)), Some(Node::File(y))) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Every path in the store, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.nodes().keys().cloned().collect()
    }

    /// Entry names directly below `dir`, without error handling.
    pub fn children(&self, dir: &str) -> Vec<String> {
        self.nodes()
            .keys()
            .filter(|path| parent(path) == Some(dir))
            .map(|path| path[dir.len() + 1..].to_string())
            .collect()
    }

    fn require_parent(nodes: &BTreeMap<String, Node>, path: &str, command: &str) -> Result<()> {
        match parent(path) {
            None => Ok(()),
            Some(dir) => match nodes.get(dir) {
                Some(Node::Dir) => Ok(()),
                _ => Err(failure(command.to_string(), format!("{dir}: No such directory"))),
            },
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn find(&self, root: &str, name: &str) -> Result<Vec<String>> {
        let root = normalize(root)?;
        let nodes = self.nodes();
        if !matches!(nodes.get(&root), Some(Node::Dir)) {
            return Err(failure(
                format!("find {root} -name {name}"),
                format!("{root}: No such file or directory"),
            ));
        }
        Ok(nodes
            .keys()
            .filter(|path| is_below(path, &root))
            .filter(|path| path.rsplit('/').next() == Some(name))
            .cloned()
            .collect())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = normalize(dir)?;
        if !self.is_dir(&dir) {
            return Err(failure(
                format!("ls -1 {dir}"),
                format!("{dir}: No such file or directory"),
            ));
        }
        Ok(self.children(&dir))
    }

    async fn make_dir_all(&self, dir: &str) -> Result<()> {
        let dir = normalize(dir)?;
        let command = format!("mkdir -p {dir}");
        {
            let nodes = self.nodes();
            let mut prefix = String::new();
            for part in dir.split('/') {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                if let Some(Node::File(_)) = nodes.get(&prefix) {
                    return Err(failure(command, format!("{prefix}: Not a directory")));
                }
            }
        }
        self.insert_dir(&dir);
        self.record(command);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (normalize(from)?, normalize(to)?);
        let command = format!("mv {from} {to}");
        {
            let mut nodes = self.nodes();
            if !nodes.contains_key(&from) {
                return Err(failure(command, format!("{from}: No such file or directory")));
            }
            if nodes.contains_key(&to) {
                return Err(failure(command, format!("{to}: already exists")));
            }
            Self::require_parent(&nodes, &to, &command)?;

            let moved: Vec<String> = nodes
                .keys()
                .filter(|path| **path == from || is_below(path, &from))
                .cloned()
                .collect();
            for path in moved {
                if let Some(node) = nodes.remove(&path) {
                    let renamed = format!("{}{}", to, &path[from.len()..]);
                    nodes.insert(renamed, node);
                }
            }
        }
        self.record(command);
        Ok(())
    }

    async fn remove_all(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        self.nodes()
            .retain(|key, _| *key != path && !is_below(key, &path));
        self.record(format!("rm -rf {path}"));
        Ok(())
    }

    async fn hard_link(&self, target: &str, link: &str) -> Result<()> {
        let (target, link) = (normalize(target)?, normalize(link)?);
        let command = format!("ln {target} {link}");
        {
            let mut nodes = self.nodes();
            let data = match nodes.get(&target) {
                Some(Node::File(data)) => Arc::clone(data),
                _ => return Err(failure(command, format!("{target}: No such file"))),
            };
            if nodes.contains_key(&link) {
                return Err(failure(command, format!("{link}: File exists")));
            }
            Self::require_parent(&nodes, &link, &command)?;
            nodes.insert(link, Node::File(data));
        }
        self.record(command);
        Ok(())
    }

    async fn touch(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let command = format!("touch {path}");
        {
            let mut nodes = self.nodes();
            Self::require_parent(&nodes, &path, &command)?;
            nodes
                .entry(path)
                .or_insert_with(|| Node::File(Arc::new(Vec::new())));
        }
        self.record(command);
        Ok(())
    }

    async fn write_stream(&self, path: &str, mut data: UploadStream) -> Result<u64> {
        let path = normalize(path)?;
        let command = format!("dd of={path}");
        self.writes.fetch_add(1, Ordering::SeqCst);
        Self::require_parent(&self.nodes(), &path, &command)?;

        let mut content = Vec::new();
        data.read_to_end(&mut content).await?;

        let fail = self
            .fail_writes_named
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(name) = fail {
            if path.ends_with(&name) {
                // A broken transfer leaves a truncated object behind.
                content.truncate(content.len() / 2);
                self.nodes().insert(path, Node::File(Arc::new(content)));
                return Err(failure(command, "Disk quota exceeded"));
            }
        }

        let written = content.len() as u64;
        self.nodes().insert(path, Node::File(Arc::new(content)));
        self.record(command);
        Ok(written)
    }

    async fn read_stream(&self, path: &str, mut sink: DownloadSink) -> Result<u64> {
        let path = normalize(path)?;
        let content = match self.nodes().get(&path) {
            Some(Node::File(data)) => Arc::clone(data),
            _ => {
                return Err(failure(
                    format!("dd if={path}"),
                    format!("{path}: No such file"),
                ))
            }
        };
        sink.write_all(&content).await?;
        sink.shutdown().await?;
        Ok(content.len() as u64)
    }

    async fn quota(&self) -> Result<String> {
        let nodes = self.nodes();
        let mut seen = HashSet::new();
        let mut bytes = 0;
        for node in nodes.values() {
            if let Node::File(data) = node {
                if seen.insert(Arc::as_ptr(data)) {
                    bytes += data.len();
                }
            }
        }
        Ok(format!("{} bytes in {} files", bytes, seen.len()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Identity cipher that keeps a copy of every plaintext it encrypts.
#[derive(Default)]
pub struct RecordingCipher {
    plaintexts: Mutex<Vec<Vec<u8>>>,
}

impl RecordingCipher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `encrypt` calls so far.
    pub fn encrypt_count(&self) -> usize {
        self.plaintexts().len()
    }

    /// Every plaintext passed to `encrypt`, in call order.
    pub fn plaintexts(&self) -> Vec<Vec<u8>> {
        self.plaintexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Cipher for RecordingCipher {
    async fn encrypt(&self, input: PlainInput<'_>, output: CipherOutput<'_>) -> Result<u64> {
        let mut plaintext = Vec::new();
        input.read_to_end(&mut plaintext).await?;
        output.write_all(&plaintext).await?;
        output.shutdown().await?;

        let written = plaintext.len() as u64;
        self.plaintexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(plaintext);
        Ok(written)
    }

    async fn decrypt(&self, input: PlainInput<'_>, output: CipherOutput<'_>) -> Result<u64> {
        let written = tokio::io::copy(input, output).await?;
        output.shutdown().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rename_moves_subtree() -> Result<()> {
        let gateway = MemoryGateway::new();
        gateway.insert_file("backups/d/a.tar.gpg", b"x");

        gateway.rename("backups/d", "backups/d.bak").await?;
        assert_eq!(
            gateway.paths(),
            vec!["backups", "backups/d.bak", "backups/d.bak/a.tar.gpg"]
        );
        assert!(gateway.rename("backups/d", "backups/e").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_hard_link_shares_content() -> Result<()> {
        let gateway = MemoryGateway::new();
        gateway.insert_file("backups/d1/a.tar.gpg", b"cipher");
        gateway.insert_dir("backups/d2");

        gateway
            .hard_link("backups/d1/a.tar.gpg", "backups/d2/a.tar.gpg")
            .await?;
        assert!(gateway.same_file("backups/d1/a.tar.gpg", "backups/d2/a.tar.gpg"));
        assert_eq!(gateway.quota().await?, "6 bytes in 1 files");
        Ok(())
    }

    #[tokio::test]
    async fn test_find_and_list() -> Result<()> {
        let gateway = MemoryGateway::new();
        gateway.insert_file("backups/d2/a.tar.fp", b"");
        gateway.insert_file("backups/d1.bak/a.tar.fp", b"");
        gateway.insert_file("backups/d1.bak/b.tar.fp", b"");

        assert_eq!(
            gateway.find("backups", "a.tar.fp").await?,
            vec!["backups/d1.bak/a.tar.fp", "backups/d2/a.tar.fp"]
        );
        assert_eq!(gateway.list("backups").await?, vec!["d1.bak", "d2"]);
        assert!(gateway.find("missing", "a.tar.fp").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_need_parent() {
        let gateway = MemoryGateway::new();
        assert!(gateway.touch("backups/d/x").await.is_err());
        assert!(gateway
            .write_stream("backups/d/x", Box::new(&b"data"[..]))
            .await
            .is_err());
        assert_eq!(gateway.write_count(), 1);
    }
}
