//! Progress tracking utility
//!
//! Logs throughput for long byte-copying operations (downloads, installs)
//! every time a configurable megabyte boundary is crossed.

use std::time::Instant;

use super::bytes_to_mb;
use crate::{log_debug, log_info};

/// Progress tracker with speed calculation
pub struct ProgressTracker {
    /// Operation name for logging (e.g., "Download", "Install")
    operation_name: String,
    /// Module name for logging
    module_name: String,
    /// Total bytes expected (0 if unknown)
    total_bytes: u64,
    processed_bytes: u64,
    start_time: Instant,
    last_log_time: Instant,
    last_log_bytes: u64,
    log_interval_bytes: u64,
}

/// Final summary data
#[derive(Debug, Clone, Copy)]
pub struct ProgressSummary {
    pub total_bytes: u64,
    pub elapsed_secs: f64,
    pub avg_speed_mbps: f64,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `operation` - Name of the operation (e.g., "Download")
    /// * `module` - Module name for logging
    /// * `total_bytes` - Total bytes to process (0 if unknown)
    /// * `log_interval_mb` - Interval in MB between progress logs
    pub fn new(operation: &str, module: &str, total_bytes: u64, log_interval_mb: u64) -> Self {
        let now = Instant::now();
        Self {
            operation_name: operation.to_string(),
            module_name: module.to_string(),
            total_bytes,
            processed_bytes: 0,
            start_time: now,
            last_log_time: now,
            last_log_bytes: 0,
            log_interval_bytes: log_interval_mb * 1024 * 1024,
        }
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes
    }

    /// Record `bytes_added` and log when an interval boundary is crossed.
    ///
    /// Returns true if a progress line was logged.
    pub fn update(&mut self, bytes_added: u64) -> bool {
        self.processed_bytes += bytes_added;

        if self.log_interval_bytes == 0 {
            return false;
        }

        let current_interval = self.processed_bytes / self.log_interval_bytes;
        let last_interval = self.last_log_bytes / self.log_interval_bytes;
        if current_interval <= last_interval {
            return false;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_log_time).as_secs_f64();
        let speed_mbps = if elapsed > 0.0 {
            bytes_to_mb(self.processed_bytes - self.last_log_bytes) / elapsed
        } else {
            0.0
        };
        self.last_log_time = now;
        self.last_log_bytes = self.processed_bytes;

        if self.total_bytes > 0 {
            let percent = (self.processed_bytes as f64 / self.total_bytes as f64) * 100.0;
            log_debug!(
                &self.module_name,
                "{} progress: {:.1} MB / {:.1} MB ({:.1}%) @ {:.1} MB/s",
                self.operation_name,
                bytes_to_mb(self.processed_bytes),
                bytes_to_mb(self.total_bytes),
                percent,
                speed_mbps
            );
        } else {
            log_debug!(
                &self.module_name,
                "{} progress: {:.1} MB @ {:.1} MB/s",
                self.operation_name,
                bytes_to_mb(self.processed_bytes),
                speed_mbps
            );
        }

        true
    }

    /// Log completion and return the summary
    pub fn finish(&self) -> ProgressSummary {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        let avg_speed_mbps = if elapsed_secs > 0.0 {
            bytes_to_mb(self.processed_bytes) / elapsed_secs
        } else {
            0.0
        };

        log_info!(
            &self.module_name,
            "{} complete: {} bytes in {:.2}s (avg {:.1} MB/s)",
            self.operation_name,
            self.processed_bytes,
            elapsed_secs,
            avg_speed_mbps
        );

        ProgressSummary {
            total_bytes: self.processed_bytes,
            elapsed_secs,
            avg_speed_mbps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_logs_on_interval_boundary() {
        let mut tracker = ProgressTracker::new("Download", "test", 4 * 1024 * 1024, 1);
        assert!(!tracker.update(512 * 1024));
        assert!(tracker.update(512 * 1024));
        assert!(!tracker.update(10));
        assert_eq!(tracker.processed_bytes(), 1024 * 1024 + 10);
    }

    #[test]
    fn test_zero_interval_never_logs() {
        let mut tracker = ProgressTracker::new("Install", "test", 0, 0);
        assert!(!tracker.update(10 * 1024 * 1024));
        assert_eq!(tracker.finish().total_bytes, 10 * 1024 * 1024);
    }
}
