//! Symmetric stream encryption.
//!
//! The passphrase comes from a local-only file read once per run and kept in
//! zeroizing memory. [`GpgCipher`] hands it to gpg as the first line of
//! standard input, followed by the data, so neither the secret nor any
//! plaintext ever touches disk or a command line.

use crate::utils::errors::{Result, SnapError};
use async_trait::async_trait;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

/// Secret read from the passphrase file. Never printed.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    /// Read the first line of `path`.
    ///
    /// The file must exist, be a regular file and hold a non-empty first line.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            SnapError::Precondition(format!("passphrase file {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(SnapError::Precondition(format!(
                "passphrase file {} is not a regular file",
                path.display()
            )));
        }

        let mut content = Zeroizing::new(String::new());
        std::fs::File::open(path)?.read_to_string(&mut content)?;

        let line = content.lines().next().unwrap_or_default();
        if line.is_empty() {
            return Err(SnapError::Precondition(format!(
                "passphrase file {} is empty",
                path.display()
            )));
        }

        Ok(Self(Zeroizing::new(line.to_string())))
    }

    pub fn from_string(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Byte source handed to a cipher.
pub type PlainInput<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Byte sink a cipher writes into.
pub type CipherOutput<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Streaming symmetric cipher. Implementations must not compress.
#[async_trait]
pub trait Cipher: Send + Sync {
    /// Encrypt everything `input` yields into `output`, then shut `output`
    /// down. Returns the number of bytes written.
    async fn encrypt(&self, input: PlainInput<'_>, output: CipherOutput<'_>) -> Result<u64>;

    /// Inverse of [`Cipher::encrypt`].
    async fn decrypt(&self, input: PlainInput<'_>, output: CipherOutput<'_>) -> Result<u64>;
}

/// OpenPGP symmetric encryption through the `gpg` binary.
pub struct GpgCipher {
    program: String,
    passphrase: Passphrase,
    homedir: Option<PathBuf>,
}

const GPG_COMMON_ARGS: &[&str] = &[
    "--batch",
    "--quiet",
    "--yes",
    "--no-tty",
    "--pinentry-mode",
    "loopback",
    "--passphrase-fd",
    "0",
];

const GPG_ENCRYPT_ARGS: &[&str] = &[
    "--symmetric",
    "--cipher-algo",
    "AES256",
    "--compress-algo",
    "none",
    "--output",
    "-",
];

const GPG_DECRYPT_ARGS: &[&str] = &["--decrypt", "--output", "-"];

impl GpgCipher {
    pub fn new(program: impl Into<String>, passphrase: Passphrase) -> Self {
        Self {
            program: program.into(),
            passphrase,
            homedir: None,
        }
    }

    /// Use a dedicated gpg home instead of `~/.gnupg`.
    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    fn args(&self, mode: &[&str]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(home) = &self.homedir {
            args.push("--homedir".to_string());
            args.push(home.display().to_string());
        }
        args.extend(GPG_COMMON_ARGS.iter().map(|a| a.to_string()));
        args.extend(mode.iter().map(|a| a.to_string()));
        args
    }

    async fn run(&self, mode: &[&str], input: PlainInput<'_>, output: CipherOutput<'_>) -> Result<u64> {
        let args = self.args(mode);
        debug!("Running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SnapError::Cipher(format!("failed to start {}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SnapError::Cipher("gpg stdin not captured".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SnapError::Cipher("gpg stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SnapError::Cipher("gpg stderr not captured".into()))?;

        let secret = self.passphrase.expose();
        let feed = async move {
            stdin.write_all(secret.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            tokio::io::copy(input, &mut stdin).await?;
            stdin.shutdown().await
        };
        let drain = async move {
            let written = tokio::io::copy(&mut stdout, output).await?;
            output.shutdown().await?;
            Ok::<u64, std::io::Error>(written)
        };
        let diagnostics = async {
            let mut text = String::new();
            stderr.read_to_string(&mut text).await.map(|_| text)
        };

        let (fed, drained, diagnostics) = tokio::join!(feed, drain, diagnostics);
        let status = child.wait().await?;

        if !status.success() {
            return Err(SnapError::Cipher(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                diagnostics.unwrap_or_default().trim()
            )));
        }
        fed?;
        Ok(drained?)
    }
}

#[async_trait]
impl Cipher for GpgCipher {
    async fn encrypt(&self, input: PlainInput<'_>, output: CipherOutput<'_>) -> Result<u64> {
        self.run(GPG_ENCRYPT_ARGS, input, output).await
    }

    async fn decrypt(&self, input: PlainInput<'_>, output: CipherOutput<'_>) -> Result<u64> {
        self.run(GPG_DECRYPT_ARGS, input, output).await
    }
}
