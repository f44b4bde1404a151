//! Throughput and FIFO statistics.

use std::fmt;
use std::time::Duration;

/// Point-in-time statistics of an output, see [`crate::AsiOutput::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputStats {
    /// Bytes queued in the hardware FIFO, sampled when the snapshot was taken.
    pub fifo_queued_bytes: usize,
    /// Bytes accepted since the current prefill cycle was armed.
    pub total_bytes_written: u64,
    /// Bytes accepted since the previous snapshot.
    pub bytes_since_last_call: u64,
}

/// Statistics of one port over one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub port: i32,
    pub stats: OutputStats,
    /// Time covered by `stats.bytes_since_last_call`.
    pub interval: Duration,
}

impl StatsReport {
    /// Input rate over the interval in bits per second.
    pub fn throughput_bps(&self) -> f64 {
        let seconds = self.interval.as_secs_f64();
        if seconds > 0.0 {
            self.stats.bytes_since_last_call as f64 * 8.0 / seconds
        } else {
            0.0
        }
    }

    /// FIFO backlog expressed as playout time at `bitrate_bps`.
    pub fn fifo_duration(&self, bitrate_bps: u32) -> Duration {
        if bitrate_bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.stats.fifo_queued_bytes as f64 * 8.0 / f64::from(bitrate_bps))
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ASI port {}: fifo {} bytes, written {} bytes total, {} bytes in {:.1}s ({:.0} bps)",
            self.port,
            self.stats.fifo_queued_bytes,
            self.stats.total_bytes_written,
            self.stats.bytes_since_last_call,
            self.interval.as_secs_f64(),
            self.throughput_bps()
        )
    }
}
