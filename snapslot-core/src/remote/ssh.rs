//! Gateway over an SSH exec channel.
//!
//! One authenticated session is opened per run; every remote operation is a
//! fresh exec channel running a single command, which is all a restricted
//! backup shell offers. ssh2 is blocking, so each round trip runs on the
//! blocking pool.

use super::{escape_glob, shell_quote, DownloadSink, RemoteGateway, UploadStream};
use crate::utils::errors::{Result, SnapError};
use async_trait::async_trait;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info};

/// Block size for `dd` transfers.
const DD_BLOCK_SIZE: usize = 64 * 1024;

/// Wait between reads of an exec channel with no data ready.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Connection parameters for [`SshGateway`].
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key; ssh-agent is used when absent.
    pub identity_file: Option<PathBuf>,
    /// OpenSSH known_hosts file used to verify the server key.
    pub known_hosts: Option<PathBuf>,
    pub strict_host_key_checking: bool,
}

pub struct SshGateway {
    session: Arc<Session>,
    label: String,
}

impl SshGateway {
    /// Connect, verify the host key and authenticate.
    pub async fn connect(options: SshOptions) -> Result<Self> {
        let label = format!("{}@{}:{}", options.user, options.host, options.port);
        let session = tokio::task::spawn_blocking(move || open_session(&options)).await??;
        info!("Connected to {}", label);

        Ok(Self {
            session: Arc::new(session),
            label,
        })
    }

    async fn run(&self, command: String) -> Result<String> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || exec(&session, &command)).await?
    }
}

fn open_session(options: &SshOptions) -> Result<Session> {
    let tcp = TcpStream::connect((options.host.as_str(), options.port))?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;

    verify_host_key(&session, options)?;

    match &options.identity_file {
        Some(key) => session.userauth_pubkey_file(&options.user, None, key, None)?,
        None => session.userauth_agent(&options.user)?,
    }

    if !session.authenticated() {
        return Err(SnapError::Precondition(format!(
            "SSH authentication failed for {}@{}",
            options.user, options.host
        )));
    }

    Ok(session)
}

fn verify_host_key(session: &Session, options: &SshOptions) -> Result<()> {
    if !options.strict_host_key_checking {
        return Ok(());
    }

    let known_hosts_path = options
        .known_hosts
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".ssh/known_hosts")))
        .ok_or_else(|| SnapError::Precondition("no known_hosts file available".into()))?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| SnapError::Precondition("server sent no host key".into()))?;

    let mut known_hosts = session.known_hosts()?;
    known_hosts.read_file(&known_hosts_path, KnownHostFileKind::OpenSSH)?;

    match known_hosts.check_port(&options.host, options.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(SnapError::Precondition(format!(
            "host key for {} not found in {}",
            options.host,
            known_hosts_path.display()
        ))),
        CheckResult::Mismatch => Err(SnapError::Precondition(format!(
            "host key for {} does not match {}",
            options.host,
            known_hosts_path.display()
        ))),
        CheckResult::Failure => Err(SnapError::Precondition(format!(
            "could not check host key for {}",
            options.host
        ))),
    }
}

/// Run one command, returning stdout or a [`SnapError::Remote`] on non-zero exit.
fn exec(session: &Session, command: &str) -> Result<String> {
    debug!(command, "remote exec");
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    // stdout and stderr share the channel window, so they are read together.
    // The session carries one channel at a time, so its mode can be switched.
    session.set_blocking(false);
    let drained = drain_streams(channel.stream(0), channel.stderr(), || channel.eof());
    session.set_blocking(true);
    let (stdout, stderr) = drained?;
    channel.wait_close()?;

    check_status(command, channel.exit_status()?, &String::from_utf8_lossy(&stderr))?;
    let stdout = String::from_utf8(stdout)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(stdout)
}

/// Read two non-blocking streams until both are exhausted and `eof` holds.
fn drain_streams<O: Read, E: Read>(
    mut stdout: O,
    mut stderr: E,
    eof: impl Fn() -> bool,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = vec![0u8; DD_BLOCK_SIZE];

    loop {
        let read_out = read_available(&mut stdout, &mut buf, &mut out)?;
        let read_err = read_available(&mut stderr, &mut buf, &mut err)?;
        if read_out || read_err {
            continue;
        }
        if eof() {
            return Ok((out, err));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Append whatever `stream` has ready; false when nothing was read.
fn read_available(stream: &mut impl Read, buf: &mut [u8], into: &mut Vec<u8>) -> io::Result<bool> {
    match stream.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            into.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

fn check_status(command: &str, status: i32, stderr: &str) -> Result<()> {
    if status != 0 {
        return Err(SnapError::Remote {
            command: command.to_string(),
            status,
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(())
}

fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl RemoteGateway for SshGateway {
    async fn find(&self, root: &str, name: &str) -> Result<Vec<String>> {
        let command = format!(
            "find {} -name {}",
            shell_quote(root),
            shell_quote(&escape_glob(name))
        );
        let mut paths = non_empty_lines(&self.run(command).await?);
        paths.sort();
        Ok(paths)
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let output = self.run(format!("ls -1 {}", shell_quote(dir))).await?;
        let mut names = non_empty_lines(&output);
        names.sort();
        Ok(names)
    }

    async fn make_dir_all(&self, dir: &str) -> Result<()> {
        self.run(format!("mkdir -p {}", shell_quote(dir))).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.run(format!("mv {} {}", shell_quote(from), shell_quote(to)))
            .await?;
        Ok(())
    }

    async fn remove_all(&self, path: &str) -> Result<()> {
        self.run(format!("rm -rf {}", shell_quote(path))).await?;
        Ok(())
    }

    async fn hard_link(&self, target: &str, link: &str) -> Result<()> {
        self.run(format!("ln {} {}", shell_quote(target), shell_quote(link)))
            .await?;
        Ok(())
    }

    async fn touch(&self, path: &str) -> Result<()> {
        self.run(format!("touch {}", shell_quote(path))).await?;
        Ok(())
    }

    async fn write_stream(&self, path: &str, data: UploadStream) -> Result<u64> {
        let command = format!("dd of={} bs={}", shell_quote(path), DD_BLOCK_SIZE);
        let session = Arc::clone(&self.session);
        // Must be created on the runtime; used from the blocking pool.
        let mut reader = SyncIoBridge::new(data);

        tokio::task::spawn_blocking(move || -> Result<u64> {
            debug!(command = %command, "remote exec (upload)");
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;

            let written = std::io::copy(&mut reader, &mut channel)?;
            channel.flush()?;
            channel.send_eof()?;

            let mut ignored = Vec::new();
            channel.read_to_end(&mut ignored)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;
            channel.wait_close()?;

            check_status(&command, channel.exit_status()?, &stderr)?;
            Ok(written)
        })
        .await?
    }

    async fn read_stream(&self, path: &str, sink: DownloadSink) -> Result<u64> {
        let command = format!("dd if={} bs={}", shell_quote(path), DD_BLOCK_SIZE);
        let session = Arc::clone(&self.session);
        let mut writer = SyncIoBridge::new(sink);

        tokio::task::spawn_blocking(move || -> Result<u64> {
            debug!(command = %command, "remote exec (download)");
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;

            let copied = std::io::copy(&mut channel, &mut writer)?;
            writer.flush()?;
            writer.shutdown()?;

            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;
            channel.wait_close()?;

            check_status(&command, channel.exit_status()?, &stderr)?;
            Ok(copied)
        })
        .await?
    }

    async fn quota(&self) -> Result<String> {
        self.run("quota".to_string()).await
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
