//! Boundary to the vendor hardware SDK.
//!
//! The driver never talks to hardware directly. A host provides an
//! implementation of [`HardwareSdk`] (typically a thin wrapper around the
//! vendor library); tests and dry runs use [`crate::mock`].

use crate::consts;
use std::fmt;
use thiserror::Error;

/// Failure reported by an SDK call: the vendor status code and a description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SDK status {code}: {message}")]
pub struct SdkError {
    /// Raw status code returned by the vendor library.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl SdkError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result type for SDK calls.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Capability bits of a hardware function (see [`consts::caps`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(pub u32);

impl Capabilities {
    #[inline]
    pub fn supports_asi(&self) -> bool {
        self.0 & consts::caps::ASI != 0
    }

    #[inline]
    pub fn supports_output(&self) -> bool {
        self.0 & consts::caps::OUTPUT != 0
    }

    #[inline]
    pub fn supports_input(&self) -> bool {
        self.0 & consts::caps::INPUT != 0
    }

    /// A port that can both transmit and receive must be forced into output
    /// direction before the channel is attached.
    #[inline]
    pub fn is_bidirectional(&self) -> bool {
        self.supports_input()
    }
}

/// Description of one discovered hardware function (one port of a card).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwFunctionDesc {
    /// Port number as used by the host configuration.
    pub port: i32,
    /// Serial number of the physical device the port belongs to.
    pub serial: u64,
    /// Card type and bus location, for log messages.
    pub type_and_location: String,
    /// Capability bits.
    pub capabilities: Capabilities,
}

/// Transmit control of an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxControl {
    /// Accept data into the FIFO but emit nothing.
    Hold,
    /// Transmit queued data.
    Send,
}

/// Electrical I/O standard of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStandard {
    Asi,
}

/// Direction of a bidirectional port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Input,
    Output,
}

/// Packet framing and null-packet stuffing of the outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingMode {
    /// Transport stream packet size in bytes.
    pub packet_size: u16,
    /// Insert null packets when the FIFO cannot sustain the configured rate.
    pub stuffing: bool,
}

impl FramingMode {
    /// 188-byte packets with stuffing enabled.
    pub const TS_188_STUFFED: FramingMode = FramingMode {
        packet_size: consts::TS_PACKET_SIZE,
        stuffing: true,
    };
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-byte packets, stuffing {}",
            self.packet_size,
            if self.stuffing { "on" } else { "off" }
        )
    }
}

/// Entry point of the vendor SDK: discovery and device attach.
pub trait HardwareSdk: Send {
    /// Scans for hardware functions, returning at most `max` of them.
    fn enumerate(&self, max: usize) -> SdkResult<Vec<HwFunctionDesc>>;

    /// Attaches to the physical device with the given serial number.
    fn attach_by_serial(&self, serial: u64) -> SdkResult<Box<dyn OutputDevice>>;
}

/// An attached physical device.
pub trait OutputDevice: Send {
    /// Selects the electrical I/O standard of a port.
    fn configure_io_standard(&mut self, port: i32, standard: IoStandard) -> SdkResult<()>;

    /// Selects the direction of a bidirectional port.
    fn configure_io_direction(&mut self, port: i32, direction: IoDirection) -> SdkResult<()>;

    /// Attaches the logical output channel of a port.
    fn attach_port(&mut self, port: i32) -> SdkResult<Box<dyn OutputChannel>>;

    /// Releases the device.
    fn detach(&mut self);
}

/// Raw output channel draining a hardware FIFO at a fixed rate.
pub trait OutputChannel: Send {
    /// Queues `data` into the FIFO. Called with exactly one block at a time.
    fn write(&mut self, data: &[u8]) -> SdkResult<()>;

    /// Current FIFO occupancy in bytes.
    fn queued_byte_count(&mut self) -> SdkResult<usize>;

    /// Sets the transport stream rate in bits per second.
    fn set_rate_bps(&mut self, rate: u32) -> SdkResult<()>;

    /// Holds or releases transmission of the queued data.
    fn set_transmit_control(&mut self, control: TxControl) -> SdkResult<()>;

    /// Discards everything queued in the FIFO.
    fn clear_queue(&mut self) -> SdkResult<()>;

    /// Sets the packet size and stuffing mode of the output.
    fn set_framing_mode(&mut self, mode: FramingMode) -> SdkResult<()>;

    /// Detaches the channel immediately, dropping queued data.
    fn detach(&mut self);
}
