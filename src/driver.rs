//! The buffered output driver: staging, prefill state machine and FIFO
//! underrun recovery.

use crate::buffer::StagingBuffer;
use crate::config::{BufferSizing, OutputConfig};
use crate::consts::msg;
use crate::device::{attach_output_port, AttachedPort};
use crate::error::{configure_failed, Error, Result};
use crate::logging::{report_error, report_info, LogCallback};
use crate::sdk::{HardwareSdk, TxControl};
use crate::stats::OutputStats;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;

/// Lifecycle state of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Output held while the FIFO is filled up to the prefill target.
    Prefill,
    /// Transmitting.
    Running,
    /// Not attached to hardware. Terminal.
    Failed,
}

/// Mutable state, guarded by the output's lock.
struct Inner {
    link: Option<AttachedPort>,
    state: State,
    staging: StagingBuffer,
    bytes_remaining_prefill: i64,
    total_bytes_written: u64,
    bytes_since_stats: u64,
}

impl Inner {
    fn new(block_size: usize) -> Self {
        Self {
            link: None,
            state: State::Failed,
            staging: StagingBuffer::new(block_size),
            bytes_remaining_prefill: 0,
            total_bytes_written: 0,
            bytes_since_stats: 0,
        }
    }

    fn link_mut(&mut self) -> Result<&mut AttachedPort> {
        self.link
            .as_mut()
            .ok_or(Error::NotOperational { state: self.state })
    }

    /// (Re-)enters prefill: drops whatever the FIFO holds, holds transmission
    /// and restarts the cushion from an empty staging block.
    fn setup_preroll(&mut self, sizing: &BufferSizing) -> Result<()> {
        let link = self.link_mut()?;
        link.channel.clear_queue()?;
        link.channel.set_transmit_control(TxControl::Hold)?;
        self.staging.reset();
        self.bytes_remaining_prefill = sizing.prefill_target as i64;
        self.total_bytes_written = 0;
        self.state = State::Prefill;
        debug!(
            "Prefill armed: holding output until {} bytes are queued",
            sizing.prefill_target
        );
        Ok(())
    }

    /// Hands the full staging block to the sink and empties it.
    fn flush(&mut self) -> Result<()> {
        debug_assert!(self.staging.is_full());
        let link = self
            .link
            .as_mut()
            .ok_or(Error::NotOperational { state: self.state })?;
        link.channel.write(self.staging.block())?;
        trace!("Flushed {} byte block", self.staging.block_size());
        self.staging.reset();
        Ok(())
    }

    fn account_prefill(&mut self, staged: usize, log: &LogCallback) {
        if self.state != State::Prefill {
            return;
        }
        self.bytes_remaining_prefill -= staged as i64;
        if self.bytes_remaining_prefill > 0 {
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };
        // A failed release leaves the output in prefill with the cushion met,
        // so the next write retries it.
        match link.channel.set_transmit_control(TxControl::Send) {
            Ok(()) => {
                self.state = State::Running;
                report_info(log, msg::PREFILL_DONE);
                info!("Prefill complete, output running");
            }
            Err(e) => warn!("Could not release transmission, retrying on next write: {}", e),
        }
    }

    fn write(&mut self, data: &[u8], sizing: &BufferSizing, log: &LogCallback) -> Result<usize> {
        self.link_mut()?;
        let max = self.staging.max_write_len();
        if data.len() > max {
            return Err(Error::WriteTooLarge {
                max,
                actual: data.len(),
            });
        }
        if self.state == State::Running {
            let queued = self.link_mut()?.channel.queued_byte_count()?;
            if queued < sizing.low_watermark {
                warn!(
                    "FIFO at {} bytes, below low watermark of {} bytes",
                    queued, sizing.low_watermark
                );
                report_error(log, msg::UNDER_LOWMARK);
                self.setup_preroll(sizing)?;
            }
        }

        let first = self.staging.fill(data);
        if self.staging.is_full() {
            if let Err(e) = self.flush() {
                self.staging.unfill(first);
                return Err(e);
            }
        }
        self.account_prefill(first, log);

        let rest = &data[first..];
        if !rest.is_empty() {
            let second = self.staging.fill(rest);
            debug_assert_eq!(second, rest.len());
            // The first segment already reached the hardware, so the call is
            // accepted either way. A block that fails here stays staged and
            // goes out first on the next write.
            if self.staging.is_full() {
                if let Err(e) = self.flush() {
                    warn!("Block flush failed, keeping it staged for the next write: {}", e);
                }
            }
        }

        self.total_bytes_written += data.len() as u64;
        self.bytes_since_stats += data.len() as u64;
        Ok(data.len())
    }

    fn stats(&mut self) -> Result<OutputStats> {
        let fifo_queued_bytes = self.link_mut()?.channel.queued_byte_count()?;
        let stats = OutputStats {
            fifo_queued_bytes,
            total_bytes_written: self.total_bytes_written,
            bytes_since_last_call: self.bytes_since_stats,
        };
        self.bytes_since_stats = 0;
        Ok(stats)
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Detaching output channel and device");
            link.detach();
        }
        self.state = State::Failed;
    }
}

/// A buffered ASI output attached to one hardware port.
///
/// Callers [`write`](AsiOutput::write) transport stream data in arbitrary
/// chunks; the output stages it into fixed-size blocks for the hardware,
/// holds transmission until the prefill cushion is queued, and re-arms the
/// prefill when the hardware FIFO drains below the low watermark.
///
/// All operations take one internal lock for their whole duration, so a
/// writer thread and a statistics thread can share the output through an
/// `Arc`. There are no internal threads: underrun recovery happens inline on
/// the next write.
pub struct AsiOutput {
    config: OutputConfig,
    bidirectional: bool,
    log: LogCallback,
    inner: Mutex<Inner>,
}

impl AsiOutput {
    /// Attaches to the port in `config` and arms the prefill cycle.
    ///
    /// Fails with [`Error::MissingLogCallback`] without touching the SDK when
    /// `log` is `None`. Setup failures are reported through `log` and
    /// returned; hardware attached before the failing step is released again,
    /// so no half-initialised output ever reaches the caller.
    pub fn create(
        sdk: &dyn HardwareSdk,
        config: OutputConfig,
        log: Option<LogCallback>,
    ) -> Result<Self> {
        let log = log.ok_or(Error::MissingLogCallback)?;
        if let Err(e) = config.sizing.validate() {
            report_error(&log, &e.to_string());
            return Err(e);
        }
        debug!(
            "Creating ASI output on port {} at {} bps ({:?})",
            config.port, config.bitrate_bps, config.sizing
        );

        let link = attach_output_port(sdk, &config, &log)?;
        let bidirectional = link.is_bidirectional();
        let mut inner = Inner::new(config.sizing.block_size);
        inner.link = Some(link);

        let output = Self {
            config,
            bidirectional,
            log,
            inner: Mutex::new(inner),
        };
        // Leaves `Failed` only once the prefill is armed. On error `output`
        // is dropped, which detaches the hardware.
        let armed = output.inner.lock().setup_preroll(&output.config.sizing);
        if let Err(e) = armed {
            report_error(&output.log, msg::START_PREROLL);
            return Err(match e {
                Error::Sdk(source) => configure_failed(msg::START_PREROLL, source),
                other => other,
            });
        }
        Ok(output)
    }

    /// Stages `data` for output and returns the number of bytes accepted,
    /// which is always `data.len()` on success.
    ///
    /// A single call may cross at most one block boundary: `data` must not be
    /// longer than [`max_write_len`](AsiOutput::max_write_len), otherwise
    /// [`Error::WriteTooLarge`] is returned and nothing changes. A failed
    /// flush of the current block is returned as [`Error::Sdk`] with none of
    /// `data` accepted. Once that block is out the call always succeeds; a
    /// second block that fails to flush stays staged for the next write.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.inner.lock().write(data, &self.config.sizing, &self.log)
    }

    /// Returns the current statistics and resets the per-call byte counter.
    pub fn stats(&self) -> Result<OutputStats> {
        self.inner.lock().stats()
    }

    /// Detaches the output channel, then the device.
    ///
    /// Callers must stop all producers first. Dropping the output has the
    /// same effect.
    pub fn destroy(self) {
        self.inner.lock().teardown();
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub fn port(&self) -> i32 {
        self.config.port
    }

    pub fn bitrate_bps(&self) -> u32 {
        self.config.bitrate_bps
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Whether the port can also receive (and was forced to output).
    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }

    /// Bytes staged but not yet handed to the hardware.
    pub fn buffered_bytes(&self) -> usize {
        self.inner.lock().staging.offset()
    }

    /// Largest write the next call will accept.
    pub fn max_write_len(&self) -> usize {
        self.inner.lock().staging.max_write_len()
    }

    /// Bytes still needed before a prefill releases transmission.
    /// Zero or negative once the cushion is met.
    pub fn bytes_remaining_prefill(&self) -> i64 {
        self.inner.lock().bytes_remaining_prefill
    }
}

impl Drop for AsiOutput {
    fn drop(&mut self) {
        self.inner.get_mut().teardown();
    }
}

impl std::fmt::Debug for AsiOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsiOutput")
            .field("config", &self.config)
            .field("bidirectional", &self.bidirectional)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailPoint, MockCall, MockHandle, MockSdk};
    use std::sync::Arc;

    const BLOCK: usize = 1024;

    fn sizing() -> BufferSizing {
        BufferSizing {
            block_size: BLOCK,
            prefill_target: 4 * BLOCK,
            low_watermark: BLOCK / 2,
        }
    }

    fn quiet_log() -> LogCallback {
        Arc::new(|_: bool, _: &str| {})
    }

    fn open() -> (AsiOutput, MockHandle) {
        let sdk = MockSdk::with_output_ports(1, &[1]);
        let handle = sdk.handle();
        let config = OutputConfig::new(1, 10_000_000).with_sizing(sizing());
        let output = AsiOutput::create(&sdk, config, Some(quiet_log())).unwrap();
        (output, handle)
    }

    #[test]
    fn test_create_arms_prefill() {
        let (output, handle) = open();
        assert_eq!(output.state(), State::Prefill);
        assert_eq!(output.bytes_remaining_prefill(), 4 * BLOCK as i64);
        assert_eq!(output.buffered_bytes(), 0);
        assert_eq!(output.max_write_len(), 2 * BLOCK);
        assert_eq!(handle.tx_control(), Some(TxControl::Hold));
        let calls = handle.calls();
        let n = calls.len();
        assert_eq!(
            &calls[n - 2..],
            &[MockCall::ClearQueue, MockCall::SetTxControl(TxControl::Hold)]
        );
    }

    #[test]
    fn test_write_spanning_boundary() {
        let (output, handle) = open();
        let data: Vec<u8> = (0..BLOCK + 100).map(|i| i as u8).collect();
        assert_eq!(output.write(&data[..100]).unwrap(), 100);
        // Fills the rest of the first block, flushes, stages the remainder.
        assert_eq!(output.write(&data[100..]).unwrap(), BLOCK);
        assert_eq!(handle.block_writes(), 1);
        assert_eq!(output.buffered_bytes(), 100);
        assert_eq!(handle.written_blocks()[0], &data[..BLOCK]);
    }

    #[test]
    fn test_oversized_write_rejected_without_mutation() {
        let (output, handle) = open();
        output.write(&[0u8; 10]).unwrap();
        handle.clear_calls();

        let before = output.max_write_len();
        let err = output.write(&vec![0u8; before + 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::WriteTooLarge { max, actual } if max == before && actual == before + 1
        ));
        assert_eq!(output.buffered_bytes(), 10);
        assert_eq!(output.bytes_remaining_prefill(), 4 * BLOCK as i64);
        assert_eq!(handle.block_writes(), 0);
        assert_eq!(output.stats().unwrap().total_bytes_written, 10);
    }

    #[test]
    fn test_prefill_releases_on_fourth_flush() {
        let (output, handle) = open();
        for i in 1..=3 {
            output.write(&vec![0u8; BLOCK]).unwrap();
            assert_eq!(handle.block_writes(), i);
            assert_eq!(output.state(), State::Prefill);
            assert_eq!(handle.tx_control(), Some(TxControl::Hold));
        }
        output.write(&vec![0u8; BLOCK]).unwrap();
        assert_eq!(output.state(), State::Running);
        assert_eq!(handle.tx_control(), Some(TxControl::Send));
        assert_eq!(handle.count_calls(|c| *c == MockCall::SetTxControl(TxControl::Send)), 1);

        // Further writes do not repeat the release.
        output.write(&vec![0u8; BLOCK]).unwrap();
        assert_eq!(handle.count_calls(|c| *c == MockCall::SetTxControl(TxControl::Send)), 1);
    }

    #[test]
    fn test_underrun_rearms_prefill() {
        let (output, handle) = open();
        for _ in 0..4 {
            output.write(&vec![0u8; BLOCK]).unwrap();
        }
        output.write(&[0u8; 10]).unwrap();
        assert_eq!(output.state(), State::Running);

        handle.set_queued_bytes(BLOCK / 2 - 1);
        handle.clear_calls();
        output.write(&[0u8; 20]).unwrap();

        assert_eq!(output.state(), State::Prefill);
        // Staging was reset before this write was staged.
        assert_eq!(output.buffered_bytes(), 20);
        assert_eq!(output.bytes_remaining_prefill(), 4 * BLOCK as i64 - 20);
        assert_eq!(output.stats().unwrap().total_bytes_written, 20);
        assert_eq!(
            &handle.calls()[..3],
            &[
                MockCall::QueuedByteCount,
                MockCall::ClearQueue,
                MockCall::SetTxControl(TxControl::Hold)
            ]
        );
    }

    #[test]
    fn test_low_fifo_ignored_during_prefill() {
        let (output, handle) = open();
        handle.set_queued_bytes(0);
        output.write(&[0u8; 10]).unwrap();
        output.write(&[0u8; 10]).unwrap();
        assert_eq!(handle.count_calls(|c| *c == MockCall::ClearQueue), 1);
    }

    #[test]
    fn test_failed_flush_accepts_nothing() {
        let (output, handle) = open();
        output.write(&[1u8; 1000]).unwrap();
        handle.fail_at(FailPoint::Write);

        let err = output.write(&[2u8; 100]).unwrap_err();
        assert!(matches!(err, Error::Sdk(_)));
        assert!(!err.is_fatal());
        assert_eq!(output.buffered_bytes(), 1000);
        assert_eq!(output.bytes_remaining_prefill(), 4 * BLOCK as i64 - 1000);
        assert_eq!(output.stats().unwrap().total_bytes_written, 1000);

        handle.clear_failures();
        assert_eq!(output.write(&[2u8; 100]).unwrap(), 100);
        assert_eq!(handle.written_blocks().len(), 1);
        assert_eq!(output.buffered_bytes(), 76);
    }

    #[test]
    fn test_two_block_write_flushes_both() {
        let (output, handle) = open();
        let data: Vec<u8> = (0..2 * BLOCK).map(|i| (i / 7) as u8).collect();
        assert_eq!(output.write(&data).unwrap(), 2 * BLOCK);
        assert_eq!(handle.block_writes(), 2);
        assert_eq!(output.buffered_bytes(), 0);
        assert_eq!(handle.written_blocks().concat(), data);
        // Only the first segment counts towards the cushion.
        assert_eq!(output.bytes_remaining_prefill(), 3 * BLOCK as i64);
    }

    #[test]
    fn test_failed_second_flush_keeps_block_staged() {
        let (output, handle) = open();
        handle.fail_after(FailPoint::Write, 1);

        assert_eq!(output.write(&vec![3u8; 2 * BLOCK]).unwrap(), 2 * BLOCK);
        assert_eq!(handle.written_blocks().len(), 1);
        assert_eq!(output.buffered_bytes(), BLOCK);
        assert_eq!(output.stats().unwrap().total_bytes_written, 2 * BLOCK as u64);

        // The staged block goes out ahead of the next write.
        handle.clear_failures();
        assert_eq!(output.write(&[4u8; 10]).unwrap(), 10);
        assert_eq!(handle.written_blocks().len(), 2);
        assert_eq!(handle.written_blocks()[1], vec![3u8; BLOCK]);
        assert_eq!(output.buffered_bytes(), 10);
    }

    #[test]
    fn test_queue_not_sampled_during_prefill() {
        let (output, handle) = open();
        handle.fail_at(FailPoint::QueuedByteCount);
        handle.clear_calls();

        assert_eq!(output.write(&[0u8; 100]).unwrap(), 100);
        assert_eq!(output.state(), State::Prefill);
        assert_eq!(handle.count_calls(|c| *c == MockCall::QueuedByteCount), 0);
    }

    #[test]
    fn test_queue_failure_while_running_rejects_write() {
        let (output, handle) = open();
        for _ in 0..4 {
            output.write(&vec![0u8; BLOCK]).unwrap();
        }
        assert_eq!(output.state(), State::Running);
        handle.fail_at(FailPoint::QueuedByteCount);

        let err = output.write(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, Error::Sdk(_)));
        assert_eq!(output.state(), State::Running);
        assert_eq!(output.buffered_bytes(), 0);
    }

    #[test]
    fn test_failed_release_retried_on_next_write() {
        let (output, handle) = open();
        // Hold was already issued by `create`.
        handle.fail_at(FailPoint::TxControl);
        for _ in 0..4 {
            output.write(&vec![0u8; BLOCK]).unwrap();
        }
        assert_eq!(output.state(), State::Prefill);
        assert!(output.bytes_remaining_prefill() <= 0);
        assert_eq!(handle.tx_control(), Some(TxControl::Hold));

        handle.clear_failures();
        output.write(&[0u8; 188]).unwrap();
        assert_eq!(output.state(), State::Running);
        assert_eq!(handle.tx_control(), Some(TxControl::Send));
        assert_eq!(
            handle.count_calls(|c| *c == MockCall::SetTxControl(TxControl::Send)),
            2
        );
    }

    #[test]
    fn test_failed_prefill_arm_fails_create() {
        for point in [FailPoint::ClearQueue, FailPoint::TxControl] {
            let sdk = MockSdk::with_output_ports(1, &[1]);
            let handle = sdk.handle();
            handle.fail_at(point);
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let log: LogCallback = Arc::new(move |is_error: bool, msg: &str| {
                sink.lock().push((is_error, msg.to_string()));
            });

            let err = AsiOutput::create(&sdk, OutputConfig::new(1, 1_000_000), Some(log))
                .unwrap_err();
            assert!(matches!(err, Error::ConfigureFailed { .. }), "{:?}", point);
            assert!(err.is_fatal());
            let errors: Vec<String> = seen
                .lock()
                .iter()
                .filter(|(is_error, _)| *is_error)
                .map(|(_, m)| m.clone())
                .collect();
            assert_eq!(errors, vec![msg::START_PREROLL.to_string()]);
            let calls = handle.calls();
            assert_eq!(
                &calls[calls.len() - 2..],
                &[MockCall::DetachChannel, MockCall::DetachDevice]
            );
        }
    }

    #[test]
    fn test_stats_delta_resets() {
        let (output, handle) = open();
        output.write(&[0u8; 300]).unwrap();
        output.write(&[0u8; 200]).unwrap();

        let first = output.stats().unwrap();
        assert_eq!(first.total_bytes_written, 500);
        assert_eq!(first.bytes_since_last_call, 500);
        assert_eq!(first.fifo_queued_bytes, 0);

        handle.set_queued_bytes(4096);
        let second = output.stats().unwrap();
        assert_eq!(second.total_bytes_written, 500);
        assert_eq!(second.bytes_since_last_call, 0);
        assert_eq!(second.fifo_queued_bytes, 4096);
    }

    #[test]
    fn test_missing_log_callback_touches_nothing() {
        let sdk = MockSdk::with_output_ports(1, &[1]);
        let err = AsiOutput::create(&sdk, OutputConfig::new(1, 1_000_000), None).unwrap_err();
        assert!(matches!(err, Error::MissingLogCallback));
        assert!(sdk.handle().calls().is_empty());
    }

    #[test]
    fn test_invalid_sizing_rejected_before_attach() {
        let sdk = MockSdk::with_output_ports(1, &[1]);
        let config = OutputConfig::new(1, 1_000_000).with_sizing(BufferSizing {
            block_size: 0,
            ..sizing()
        });
        let err = AsiOutput::create(&sdk, config, Some(quiet_log())).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(sdk.handle().calls().is_empty());
    }

    #[test]
    fn test_destroy_detaches_channel_then_device() {
        let (output, handle) = open();
        handle.clear_calls();
        output.destroy();
        assert_eq!(
            handle.calls(),
            vec![MockCall::DetachChannel, MockCall::DetachDevice]
        );
    }

    #[test]
    fn test_drop_detaches_once() {
        let (output, handle) = open();
        handle.clear_calls();
        drop(output);
        assert_eq!(handle.count_calls(|c| *c == MockCall::DetachChannel), 1);
        assert_eq!(handle.count_calls(|c| *c == MockCall::DetachDevice), 1);
    }

    #[test]
    fn test_output_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AsiOutput>();
    }
}
