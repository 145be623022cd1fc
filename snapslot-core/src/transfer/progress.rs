//! Human-readable sizes and rates for run messages.

use std::time::{Duration, Instant};

/// Timing of a single stream transfer.
#[derive(Debug, Clone)]
pub struct TransferTimer {
    start_time: Instant,
}

impl TransferTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// One-line summary such as `12.00 MB in 3s (4.00 MB/s)`.
    pub fn summary(&self, bytes: u64) -> String {
        summarize(bytes, self.elapsed())
    }
}

/// Format a transfer of `bytes` that took `elapsed`.
pub fn summarize(bytes: u64, elapsed: Duration) -> String {
    format!(
        "{} in {} ({})",
        format_bytes(bytes),
        format_duration(elapsed.as_secs()),
        format_speed(average_speed(bytes, elapsed))
    )
}

/// Average speed in bytes per second; 0 for sub-millisecond transfers.
pub fn average_speed(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.001 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }

    #[test]
    fn test_summarize() {
        let text = summarize(4 * 1024 * 1024, Duration::from_secs(2));
        assert_eq!(text, "4.00 MB in 2s (2.00 MB/s)");
    }

    #[test]
    fn test_average_speed_instant_transfer() {
        assert_eq!(average_speed(1000, Duration::ZERO), 0);
    }
}
