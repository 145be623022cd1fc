//! Archive producers.
//!
//! An [`Archive`] is one logical backup unit. [`produce`] turns it into a
//! byte stream readable through a bounded in-memory pipe; nothing is written
//! to local disk. The producer's own success is reported separately through
//! [`Completion`], which must be awaited before the stream's fingerprint is
//! trusted.

pub mod tar_stream;

use crate::fs::ioprio;
use crate::utils::errors::{Result, SnapError};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};

/// Extension of tar archives.
pub const TAR_EXTENSION: &str = "tar";

/// Extension of command-output archives.
pub const TEXT_EXTENSION: &str = "txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    /// A local tree, encoded as tar.
    Directory(PathBuf),
    /// Standard output of a command, taken verbatim.
    Command { program: String, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub name: String,
    pub source: ArchiveSource,
}

impl Archive {
    pub fn directory(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: ArchiveSource::Directory(path.into()),
        }
    }

    pub fn command(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            source: ArchiveSource::Command {
                program: program.into(),
                args,
            },
        }
    }

    /// `photos.tar`, or `listing.txt` for command archives.
    pub fn file_name(&self) -> String {
        match self.source {
            ArchiveSource::Directory(_) => format!("{}.{}", self.name, TAR_EXTENSION),
            ArchiveSource::Command { .. } => format!("{}.{}", self.name, TEXT_EXTENSION),
        }
    }

    /// Whether producing the archive twice yields the same bytes for an
    /// unchanged source. Command output carries no such guarantee.
    pub fn is_reproducible(&self) -> bool {
        matches!(self.source, ArchiveSource::Directory(_))
    }

    /// Human-readable source for log messages.
    pub fn describe_source(&self) -> String {
        match &self.source {
            ArchiveSource::Directory(path) => path.display().to_string(),
            ArchiveSource::Command { program, args } => {
                std::iter::once(program.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Capacity of the pipe between producer and consumer
    pub pipe_capacity: usize,
    /// Run the producer in the idle I/O class
    pub idle_io_priority: bool,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            pipe_capacity: 1024 * 1024,
            idle_io_priority: true,
        }
    }
}

/// Byte stream of one archive plus the producer's outcome.
pub struct ArchiveStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    completion: Completion,
}

impl ArchiveStream {
    pub fn into_parts(self) -> (Box<dyn AsyncRead + Send + Unpin>, Completion) {
        (self.reader, self.completion)
    }
}

/// Outcome of a running producer.
pub enum Completion {
    Thread(oneshot::Receiver<Result<()>>),
    Task(JoinHandle<Result<()>>),
}

impl Completion {
    /// Wait for the producer to finish.
    ///
    /// Call only after the stream was read to EOF or dropped; a producer
    /// blocked on a full pipe never completes otherwise.
    pub async fn wait(self) -> Result<()> {
        match self {
            Completion::Thread(rx) => rx.await.map_err(|_| {
                SnapError::Traversal {
                    path: PathBuf::new(),
                    source: std::io::Error::other("archive producer exited without a result"),
                }
            })?,
            Completion::Task(handle) => handle.await?,
        }
    }
}

/// Start producing `archive`. Must be called from within a tokio runtime.
pub fn produce(archive: &Archive, options: &ProducerOptions) -> Result<ArchiveStream> {
    match &archive.source {
        ArchiveSource::Directory(path) => produce_tar(path.clone(), options),
        ArchiveSource::Command { program, args } => produce_command(program, args, options),
    }
}

fn produce_tar(path: PathBuf, options: &ProducerOptions) -> Result<ArchiveStream> {
    let (writer, reader) = tokio::io::duplex(options.pipe_capacity);
    // Bridges capture the runtime handle here, before leaving the runtime.
    let bridge = SyncIoBridge::new(writer);
    let idle = options.idle_io_priority;
    let (tx, rx) = oneshot::channel();

    // A dedicated thread, so the idle I/O class never leaks into pooled workers.
    std::thread::Builder::new()
        .name("snapslot-tar".to_string())
        .spawn(move || {
            ioprio::apply_idle_priority(idle);
            debug!("Archiving {}", path.display());
            let _ = tx.send(write_to_pipe(&path, bridge));
        })?;

    Ok(ArchiveStream {
        reader: Box::new(reader),
        completion: Completion::Thread(rx),
    })
}

fn write_to_pipe(path: &Path, bridge: SyncIoBridge<DuplexStream>) -> Result<()> {
    let out = tar_stream::write_tar(path, BufWriter::new(bridge))?;
    let mut bridge = out.into_inner().map_err(|e| SnapError::Traversal {
        path: path.to_path_buf(),
        source: e.into_error(),
    })?;
    bridge.shutdown()?;
    Ok(())
}

fn produce_command(program: &str, args: &[String], options: &ProducerOptions) -> Result<ArchiveStream> {
    let spawned = if options.idle_io_priority {
        let (ionice, wrapped) = ioprio::idle_command_line(program, args);
        match spawn_piped(&ionice, &wrapped) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("{} not available, running {} at normal I/O priority", ionice, program);
                spawn_piped(program, args)
            }
            spawned => spawned,
        }
    } else {
        spawn_piped(program, args)
    };
    let mut child =
        spawned.map_err(|e| SnapError::SourceCommand(format!("failed to start {program}: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SnapError::SourceCommand(format!("{program}: stdout not captured")))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| SnapError::SourceCommand(format!("{program}: stderr not captured")))?;

    let program = program.to_string();
    let handle = tokio::spawn(async move {
        let mut errors = String::new();
        stderr.read_to_string(&mut errors).await?;
        let status = child.wait().await?;
        if !status.success() {
            return Err(SnapError::SourceCommand(format!(
                "{} exited with {}: {}",
                program,
                status,
                errors.trim()
            )));
        }
        Ok::<(), SnapError>(())
    });

    Ok(ArchiveStream {
        reader: Box::new(stdout),
        completion: Completion::Task(handle),
    })
}

fn spawn_piped(program: &str, args: &[String]) -> io::Result<Child> {
    tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}
