//! Internal constants: reference buffer sizing and hardware capability bits.

// --- Reference Sizing ---
/// Size of one hardware transfer block. The sink only accepts whole blocks.
pub const BLOCK_SIZE: usize = 1024 * 1024;
/// Bytes queued into the sink before transmission is released.
pub const PREFILL_TARGET: usize = 4 * 1024 * 1024;
/// FIFO occupancy below which a running output is considered starving.
/// Should never be reached in practice; usually means the source was lost.
pub const LOW_WATERMARK: usize = 128 * 1024;

// --- Discovery ---
/// Maximum number of hardware functions requested from a single scan.
pub const MAX_HW_FUNCTIONS: usize = 10;

// --- Transport Stream Framing ---
/// Transport stream packet size pushed into the channel's framing mode.
pub const TS_PACKET_SIZE: u16 = 188;

// --- Capability Flags (HwFunctionDesc::capabilities) ---
pub mod caps {
    /// Port can carry the ASI I/O standard.
    pub const ASI: u32 = 1 << 0;
    /// Port can transmit.
    pub const OUTPUT: u32 = 1 << 1;
    /// Port can receive. Combined with `OUTPUT` the port is bidirectional.
    pub const INPUT: u32 = 1 << 2;
}

// --- Log Messages ---
// Emitted through the caller's log callback.
pub(crate) mod msg {
    pub const NO_DEVICE: &str = "No DekTec device found, aborting";
    pub const NO_ASI: &str = "Port does not support ASI";
    pub const NO_OUTPUT: &str = "Port is not capable of output";
    pub const ATTACH_DEVICE: &str = "Could not attach to DekTec device, aborting";
    pub const SET_ASI: &str = "Could not set to ASI mode";
    pub const SET_OUTPUT: &str = "Could not set to output mode";
    pub const ATTACH_CHANNEL: &str = "Can't attach output channel";
    pub const SET_RATE: &str = "Could not set output bitrate";
    pub const SET_FRAMING: &str = "Could not set transmit mode";
    pub const START_PREROLL: &str = "Could not hold output for prefill";
    pub const PREFILL_DONE: &str = "Done filling FIFO, starting output";
    pub const UNDER_LOWMARK: &str = "Fifo bytes under lowmark, restarting preroll";
}
