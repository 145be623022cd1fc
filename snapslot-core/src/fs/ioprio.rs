//! Best-effort idle I/O scheduling for archive producers.
//!
//! Backups should yield to interactive disk use. The idle class is set with
//! util-linux `ionice`: command producers run under it, and the tar producer
//! thread asks it to reclassify its own thread id.

use std::io;
#[cfg(target_os = "linux")]
use std::process::Stdio;

pub const IONICE: &str = "ionice";

/// `ionice` invocation running `program args` in the idle class. `-t` keeps
/// the program running when the class cannot be set.
pub fn idle_command_line(program: &str, args: &[String]) -> (String, Vec<String>) {
    let mut wrapped = vec!["-c3".to_string(), "-t".to_string(), program.to_string()];
    wrapped.extend(args.iter().cloned());
    (IONICE.to_string(), wrapped)
}

/// Move the calling thread to the idle I/O class.
#[cfg(target_os = "linux")]
pub fn set_current_thread_idle() -> io::Result<()> {
    let tid = current_thread_id()?;
    let status = std::process::Command::new(IONICE)
        .args(["-c3", "-p", &tid])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !status.success() {
        return Err(io::Error::other(format!("{IONICE} -p {tid} exited with {status}")));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_idle() -> io::Result<()> {
    Ok(())
}

/// Kernel id of the calling thread; `/proc/thread-self` links to
/// `<pid>/task/<tid>`.
#[cfg(target_os = "linux")]
fn current_thread_id() -> io::Result<String> {
    let link = std::fs::read_link("/proc/thread-self")?;
    link.file_name()
        .and_then(|name| name.to_str())
        .filter(|tid| tid.parse::<u32>().is_ok())
        .map(str::to_string)
        .ok_or_else(|| io::Error::other(format!("unexpected thread link {}", link.display())))
}

/// Apply idle priority to the calling thread if requested, logging instead of
/// failing.
pub fn apply_idle_priority(enabled: bool) {
    if !enabled {
        return;
    }
    if let Err(e) = set_current_thread_idle() {
        tracing::warn!("Could not switch to idle I/O priority: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_command_line() {
        let (program, args) = idle_command_line("find", &["/srv/videos/tmp".to_string()]);
        assert_eq!(program, "ionice");
        assert_eq!(args, vec!["-c3", "-t", "find", "/srv/videos/tmp"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_thread_id_is_per_thread() -> io::Result<()> {
        let main_tid = current_thread_id()?;
        let worker_tid = std::thread::spawn(current_thread_id)
            .join()
            .map_err(|_| io::Error::other("thread panicked"))??;

        assert!(worker_tid.parse::<u32>().is_ok());
        assert_ne!(main_tid, worker_tid);
        Ok(())
    }
}
