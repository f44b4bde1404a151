//! # asi-output
//!
//! A buffered output driver that feeds a continuous MPEG transport stream into
//! a broadcast ASI (Asynchronous Serial Interface) hardware output port.
//!
//! The hardware drains its FIFO at a fixed bitrate and must neither starve nor
//! overflow, while the producer (typically a stream relay) delivers data in
//! bursts of arbitrary size. The driver bridges the two:
//!
//! *   Caller writes are staged into fixed-size hardware transfer blocks
//!     (1 MiB by default); a block is handed to the hardware the moment it
//!     fills.
//! *   Transmission is held until a prefill cushion (4 MiB by default) has been
//!     queued, then released once.
//! *   While running, each write samples the FIFO occupancy. Below the low
//!     watermark (128 KiB by default) the FIFO is cleared and the prefill is
//!     re-armed, trading a short output gap for a clean restart.
//! *   Statistics report bytes written and the live FIFO level.
//!
//! ## Hardware SDK
//!
//! The vendor SDK is reached through the narrow traits in [`sdk`]
//! ([`HardwareSdk`], [`OutputDevice`], [`OutputChannel`]). Hosts wrap their
//! vendor library in these traits; [`mock::MockSdk`] is an in-memory
//! implementation for tests and dry runs.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use asi_output::{log_forwarder, mock::MockSdk, AsiOutput, OutputConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let sdk = MockSdk::with_output_ports(2145_0001, &[1]);
//!     let config = OutputConfig::from_url("dektecasi://localhost:1?bitrate=38000000")?;
//!     let output = AsiOutput::create(&sdk, config, Some(log_forwarder("asi-output")))?;
//!
//!     // Writes of any size up to `max_write_len()` are accepted.
//!     let packet = [0x47u8; 188];
//!     for _ in 0..1000 {
//!         output.write(&packet)?;
//!     }
//!     println!("{:?}", output.stats()?);
//!
//!     output.destroy();
//!     Ok(())
//! }
//! ```
//!
//! ## Threading
//!
//! [`AsiOutput`] is `Send + Sync`. One writer thread and one statistics reader
//! (see [`StatsMonitor`]) may share it through an `Arc`; every operation holds
//! the output's lock for its full duration. Stop all producers before
//! destroying an output.
//!
//! ## License
//!
//! This project is licensed under the WTFPL - see the [LICENSE](LICENSE) file for details.

mod buffer;
mod consts;
mod error;

pub mod config;
pub mod device;
pub mod driver;
pub mod logging;
pub mod mock;
pub mod monitor;
pub mod sdk;
pub mod stats;

pub use config::{BufferSizing, OutputConfig};
pub use driver::{AsiOutput, State};
pub use error::{Error, Result};
pub use logging::{log_forwarder, LogCallback};
pub use monitor::StatsMonitor;
pub use sdk::{
    Capabilities, FramingMode, HardwareSdk, HwFunctionDesc, IoDirection, IoStandard,
    OutputChannel, OutputDevice, SdkError, SdkResult, TxControl,
};
pub use stats::{OutputStats, StatsReport};
// Re-export only the public constants
pub use consts::{caps, BLOCK_SIZE, LOW_WATERMARK, MAX_HW_FUNCTIONS, PREFILL_TARGET, TS_PACKET_SIZE};
