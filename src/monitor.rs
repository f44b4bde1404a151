//! Periodic statistics reporting on a background thread.
//!
//! The output itself owns no threads. Hosts that want regular reports
//! (throughput, FIFO level) start a [`StatsMonitor`] next to the writer.

use crate::driver::AsiOutput;
use crate::stats::StatsReport;
use log::{debug, warn};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default reporting interval.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

type ReportFn = dyn Fn(StatsReport) + Send + 'static;

/// Polls [`AsiOutput::stats`] at a fixed interval and hands each report to a
/// callback. Stops on [`stop`](StatsMonitor::stop) or when dropped.
pub struct StatsMonitor {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatsMonitor {
    /// Starts polling `output` every `interval`.
    pub fn start<F>(output: Arc<AsiOutput>, interval: Duration, on_report: F) -> Self
    where
        F: Fn(StatsReport) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let on_report: Box<ReportFn> = Box::new(on_report);
        let handle = thread::spawn(move || {
            debug!("Stats monitor started for port {}", output.port());
            let mut last = Instant::now();
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Explicit stop or the monitor was dropped.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let now = Instant::now();
                match output.stats() {
                    Ok(stats) => on_report(StatsReport {
                        port: output.port(),
                        stats,
                        interval: now.duration_since(last),
                    }),
                    Err(e) => warn!("Stats poll on port {} failed: {}", output.port(), e),
                }
                last = now;
            }
            debug!("Stats monitor stopped for port {}", output.port());
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Starts a monitor with [`DEFAULT_STATS_INTERVAL`] that logs each report
    /// through the `log` facade.
    pub fn start_logging(output: Arc<AsiOutput>) -> Self {
        Self::start(output, DEFAULT_STATS_INTERVAL, |report| {
            log::info!("{}", report)
        })
    }

    /// Stops the monitor and waits for the polling thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Stats monitor thread panicked");
            }
        }
    }
}

impl Drop for StatsMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
