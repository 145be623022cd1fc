//! Configuration management for snapslot.
//!
//! Loads configuration from a TOML file with `SNAPSLOT__SECTION__KEY`
//! environment variable overrides.

use crate::archive::Archive;
use crate::executor::PipelineMode;
use crate::fs::walker::top_level_dirs;
use crate::utils::errors::{Result, SnapError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SNAPSLOT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    Ssh,
    /// A mounted directory (NAS share, USB disk).
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub kind: RemoteKind,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Login name (default: current user)
    #[serde(default)]
    pub user: Option<String>,

    /// Private key; ssh-agent is used when unset
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Default: ~/.ssh/known_hosts
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub strict_host_key_checking: bool,

    /// Base directory for the local kind
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Backup root, relative to the remote login directory
    #[serde(default = "default_root")]
    pub root: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Local file holding the symmetric passphrase
    #[serde(default)]
    pub passphrase_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Every top-level directory below this root becomes one archive
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Top-level names skipped by the walk
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Top-level names the walk must find (checked when non-empty)
    #[serde(default)]
    pub expected: Vec<String>,

    #[serde(default)]
    pub directories: Vec<DirectorySource>,

    #[serde(default)]
    pub commands: Vec<CommandSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySource {
    /// Archive name (default: basename of `path`)
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
}

/// Archive built from a command's standard output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSource {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: PipelineMode,

    /// Capacity of each in-memory pipe between stages (default: 1MB)
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Run archive producers in the idle I/O class
    #[serde(default = "default_true")]
    pub idle_io_priority: bool,

    #[serde(default = "default_cipher_program")]
    pub cipher_program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

fn default_root() -> String {
    "backups".to_string()
}

fn default_pipe_capacity() -> usize {
    1024 * 1024 // 1MB
}

fn default_cipher_program() -> String {
    "gpg".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::default(),
            host: String::new(),
            port: default_port(),
            user: None,
            identity_file: None,
            known_hosts: None,
            strict_host_key_checking: true,
            path: None,
            root: default_root(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            pipe_capacity: default_pipe_capacity(),
            idle_io_priority: true,
            cipher_program: default_cipher_program(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    /// such as `SNAPSLOT__REMOTE__HOST`.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SnapError::Config(format!(
                "config file {} not found",
                path.display()
            )));
        }

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SnapError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SnapError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        match self.remote.kind {
            RemoteKind::Ssh if self.remote.host.is_empty() => {
                return Err(SnapError::Config("remote.host is required for ssh".into()));
            }
            RemoteKind::Local if self.remote.path.is_none() => {
                return Err(SnapError::Config("remote.path is required for local".into()));
            }
            _ => {}
        }

        if self.remote.root.is_empty() || self.remote.root.starts_with('/') {
            return Err(SnapError::Config(
                "remote.root must be a non-empty relative path".into(),
            ));
        }

        if self.pipeline.pipe_capacity == 0 {
            return Err(SnapError::Config("pipeline.pipe_capacity must be > 0".into()));
        }

        Ok(())
    }

    /// Passphrase file, required before anything is encrypted.
    pub fn passphrase_file(&self) -> Result<&Path> {
        self.secrets
            .passphrase_file
            .as_deref()
            .ok_or_else(|| SnapError::Precondition("secrets.passphrase_file is not set".into()))
    }

    /// Ordered archive list for a run: walked top-level directories, then
    /// explicit directories, then commands.
    ///
    /// Fails with a precondition error when the walked set disagrees with
    /// `sources.expected`, a configured path is missing, or two archives
    /// would share a file name.
    pub fn archives(&self) -> Result<Vec<Archive>> {
        let mut archives = Vec::new();

        if let Some(root) = &self.sources.root {
            if !root.is_dir() {
                return Err(SnapError::Precondition(format!(
                    "source root {} is not a directory",
                    root.display()
                )));
            }

            let found = top_level_dirs(root)?;
            self.check_expected(&found)?;

            for name in found {
                if self.sources.exclude.contains(&name) {
                    continue;
                }
                archives.push(Archive::directory(name.clone(), root.join(&name)));
            }
        }

        for dir in &self.sources.directories {
            if !dir.path.exists() {
                return Err(SnapError::Precondition(format!(
                    "source {} does not exist",
                    dir.path.display()
                )));
            }
            let name = match &dir.name {
                Some(name) => name.clone(),
                None => dir
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        SnapError::Config(format!(
                            "cannot derive an archive name from {}",
                            dir.path.display()
                        ))
                    })?,
            };
            archives.push(Archive::directory(name, dir.path.clone()));
        }

        for cmd in &self.sources.commands {
            archives.push(Archive::command(
                cmd.name.clone(),
                cmd.program.clone(),
                cmd.args.clone(),
            ));
        }

        let mut seen = BTreeSet::new();
        for archive in &archives {
            if !seen.insert(archive.file_name()) {
                return Err(SnapError::Precondition(format!(
                    "archive file name {} is configured more than once",
                    archive.file_name()
                )));
            }
        }

        Ok(archives)
    }

    fn check_expected(&self, found: &[String]) -> Result<()> {
        if self.sources.expected.is_empty() {
            return Ok(());
        }

        let found: BTreeSet<&str> = found.iter().map(String::as_str).collect();
        let expected: BTreeSet<&str> = self.sources.expected.iter().map(String::as_str).collect();
        let excluded: BTreeSet<&str> = self.sources.exclude.iter().map(String::as_str).collect();

        let missing: Vec<&str> = expected.difference(&found).copied().collect();
        let unexpected: Vec<&str> = found
            .iter()
            .filter(|name| !expected.contains(*name) && !excluded.contains(*name))
            .copied()
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            return Ok(());
        }

        Err(SnapError::Precondition(format!(
            "source directories do not match the expected set (missing: [{}], unexpected: [{}])",
            missing.join(", "),
            unexpected.join(", ")
        )))
    }
}
