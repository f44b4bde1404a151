//! In-memory implementation of the SDK traits.
//!
//! Records every call so tests can assert on the exact sequence the driver
//! issues, models the FIFO as a byte counter, and can be told to fail any
//! individual step. Also usable by hosts as a dry-run output.

use crate::consts;
use crate::sdk::{
    Capabilities, FramingMode, HardwareSdk, HwFunctionDesc, IoDirection, IoStandard,
    OutputChannel, OutputDevice, SdkError, SdkResult, TxControl,
};
use log::trace;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One recorded SDK call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Enumerate,
    AttachBySerial(u64),
    ConfigureIoStandard(i32, IoStandard),
    ConfigureIoDirection(i32, IoDirection),
    AttachPort(i32),
    DetachDevice,
    /// A block write, with its length.
    Write(usize),
    QueuedByteCount,
    SetRate(u32),
    SetTxControl(TxControl),
    ClearQueue,
    SetFraming(FramingMode),
    DetachChannel,
}

/// SDK steps that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Enumerate,
    AttachBySerial,
    IoStandard,
    IoDirection,
    AttachPort,
    SetRate,
    SetFraming,
    Write,
    QueuedByteCount,
    TxControl,
    ClearQueue,
}

#[derive(Debug, Default)]
struct MockState {
    functions: Vec<HwFunctionDesc>,
    calls: Vec<MockCall>,
    failures: HashSet<FailPoint>,
    pending_failures: HashMap<FailPoint, usize>,
    queued_bytes: usize,
    tx_control: Option<TxControl>,
    blocks: Vec<Vec<u8>>,
}

impl MockState {
    fn check(&mut self, point: FailPoint) -> SdkResult<()> {
        if let Some(skip) = self.pending_failures.get_mut(&point) {
            if *skip == 0 {
                self.pending_failures.remove(&point);
                self.failures.insert(point);
            } else {
                *skip -= 1;
            }
        }
        if self.failures.contains(&point) {
            Err(SdkError::new(-1, format!("injected failure at {:?}", point)))
        } else {
            Ok(())
        }
    }
}

/// Test-side view of a mock SDK, shared with every device and channel it hands out.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of recorded calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Number of block writes issued.
    pub fn block_writes(&self) -> usize {
        self.count_calls(|c| matches!(c, MockCall::Write(_)))
    }

    /// Contents of every block written, in order.
    pub fn written_blocks(&self) -> Vec<Vec<u8>> {
        self.state.lock().blocks.clone()
    }

    /// Overrides the FIFO occupancy, e.g. to simulate the hardware draining it.
    pub fn set_queued_bytes(&self, bytes: usize) {
        self.state.lock().queued_bytes = bytes;
    }

    pub fn queued_bytes(&self) -> usize {
        self.state.lock().queued_bytes
    }

    /// Last transmit control set on the channel.
    pub fn tx_control(&self) -> Option<TxControl> {
        self.state.lock().tx_control
    }

    /// Makes every subsequent call at `point` fail.
    pub fn fail_at(&self, point: FailPoint) {
        self.state.lock().failures.insert(point);
    }

    /// Lets the next `skip` calls at `point` succeed, then fails every later one.
    pub fn fail_after(&self, point: FailPoint, skip: usize) {
        self.state.lock().pending_failures.insert(point, skip);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.pending_failures.clear();
    }

    fn record(&self, call: MockCall) -> parking_lot::MutexGuard<'_, MockState> {
        trace!("mock sdk call: {:?}", call);
        let mut state = self.state.lock();
        state.calls.push(call);
        state
    }
}

/// Mock [`HardwareSdk`] exposing a configurable list of hardware functions.
#[derive(Debug, Clone, Default)]
pub struct MockSdk {
    handle: MockHandle,
}

impl MockSdk {
    /// Creates an SDK with no hardware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an SDK with one ASI output port per entry in `ports`,
    /// all on a device with serial `serial`.
    pub fn with_output_ports(serial: u64, ports: &[i32]) -> Self {
        let sdk = Self::new();
        for &port in ports {
            sdk.add_function(HwFunctionDesc {
                port,
                serial,
                type_and_location: format!("DTA-2145 (bus 1, slot {})", port),
                capabilities: Capabilities(consts::caps::ASI | consts::caps::OUTPUT),
            });
        }
        sdk
    }

    /// Adds a hardware function to the enumeration result.
    pub fn add_function(&self, function: HwFunctionDesc) {
        self.handle.state.lock().functions.push(function);
    }

    /// Shared handle for inspecting calls and injecting failures.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl HardwareSdk for MockSdk {
    fn enumerate(&self, max: usize) -> SdkResult<Vec<HwFunctionDesc>> {
        let mut state = self.handle.record(MockCall::Enumerate);
        state.check(FailPoint::Enumerate)?;
        Ok(state.functions.iter().take(max).cloned().collect())
    }

    fn attach_by_serial(&self, serial: u64) -> SdkResult<Box<dyn OutputDevice>> {
        let mut state = self.handle.record(MockCall::AttachBySerial(serial));
        state.check(FailPoint::AttachBySerial)?;
        if !state.functions.iter().any(|f| f.serial == serial) {
            return Err(SdkError::new(-2, format!("no device with serial {}", serial)));
        }
        Ok(Box::new(MockDevice {
            handle: self.handle.clone(),
        }))
    }
}

/// Mock [`OutputDevice`].
#[derive(Debug)]
pub struct MockDevice {
    handle: MockHandle,
}

impl OutputDevice for MockDevice {
    fn configure_io_standard(&mut self, port: i32, standard: IoStandard) -> SdkResult<()> {
        self.handle
            .record(MockCall::ConfigureIoStandard(port, standard))
            .check(FailPoint::IoStandard)
    }

    fn configure_io_direction(&mut self, port: i32, direction: IoDirection) -> SdkResult<()> {
        self.handle
            .record(MockCall::ConfigureIoDirection(port, direction))
            .check(FailPoint::IoDirection)
    }

    fn attach_port(&mut self, port: i32) -> SdkResult<Box<dyn OutputChannel>> {
        self.handle
            .record(MockCall::AttachPort(port))
            .check(FailPoint::AttachPort)?;
        Ok(Box::new(MockChannel {
            handle: self.handle.clone(),
        }))
    }

    fn detach(&mut self) {
        drop(self.handle.record(MockCall::DetachDevice));
    }
}

/// Mock [`OutputChannel`]. Writes add to the modelled FIFO occupancy.
#[derive(Debug)]
pub struct MockChannel {
    handle: MockHandle,
}

impl OutputChannel for MockChannel {
    fn write(&mut self, data: &[u8]) -> SdkResult<()> {
        let mut state = self.handle.record(MockCall::Write(data.len()));
        state.check(FailPoint::Write)?;
        state.queued_bytes += data.len();
        state.blocks.push(data.to_vec());
        Ok(())
    }

    fn queued_byte_count(&mut self) -> SdkResult<usize> {
        let mut state = self.handle.record(MockCall::QueuedByteCount);
        state.check(FailPoint::QueuedByteCount)?;
        Ok(state.queued_bytes)
    }

    fn set_rate_bps(&mut self, rate: u32) -> SdkResult<()> {
        self.handle
            .record(MockCall::SetRate(rate))
            .check(FailPoint::SetRate)
    }

    fn set_transmit_control(&mut self, control: TxControl) -> SdkResult<()> {
        let mut state = self.handle.record(MockCall::SetTxControl(control));
        state.check(FailPoint::TxControl)?;
        state.tx_control = Some(control);
        Ok(())
    }

    fn clear_queue(&mut self) -> SdkResult<()> {
        let mut state = self.handle.record(MockCall::ClearQueue);
        state.check(FailPoint::ClearQueue)?;
        state.queued_bytes = 0;
        Ok(())
    }

    fn set_framing_mode(&mut self, mode: FramingMode) -> SdkResult<()> {
        self.handle
            .record(MockCall::SetFraming(mode))
            .check(FailPoint::SetFraming)
    }

    fn detach(&mut self) {
        let mut state = self.handle.record(MockCall::DetachChannel);
        state.queued_bytes = 0;
    }
}
