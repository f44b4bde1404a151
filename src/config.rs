//! Output configuration: port, bitrate and buffer sizing.

use crate::consts;
use crate::error::{Error, Result};
use log::debug;
use url::Url;

/// URL scheme accepted by [`OutputConfig::from_url`].
pub const URL_SCHEME: &str = "dektecasi";

/// Buffer sizing of the driver.
///
/// The defaults are the reference sizing (1 MiB blocks, 4 MiB prefill,
/// 128 KiB low watermark). A smaller prefill shortens the output gap after an
/// underrun at the cost of a thinner cushion; tune it to the tolerance of the
/// target hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    /// Size of one hardware transfer block in bytes.
    pub block_size: usize,
    /// Bytes staged before transmission is released.
    pub prefill_target: usize,
    /// FIFO occupancy below which a running output re-arms prefill.
    pub low_watermark: usize,
}

impl Default for BufferSizing {
    fn default() -> Self {
        Self {
            block_size: consts::BLOCK_SIZE,
            prefill_target: consts::PREFILL_TARGET,
            low_watermark: consts::LOW_WATERMARK,
        }
    }
}

impl BufferSizing {
    /// Checks that the sizing can drive the state machine.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block size must not be zero".into()));
        }
        if self.prefill_target == 0 {
            return Err(Error::InvalidConfig(
                "prefill target must not be zero".into(),
            ));
        }
        if self.low_watermark >= self.prefill_target {
            return Err(Error::InvalidConfig(format!(
                "low watermark ({}) must be below the prefill target ({})",
                self.low_watermark, self.prefill_target
            )));
        }
        Ok(())
    }
}

/// Configuration of one ASI output. Immutable once the output is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Hardware port to transmit on.
    pub port: i32,
    /// Transport stream rate in bits per second.
    pub bitrate_bps: u32,
    pub sizing: BufferSizing,
}

impl OutputConfig {
    /// Creates a configuration with the reference buffer sizing.
    pub fn new(port: i32, bitrate_bps: u32) -> Self {
        Self {
            port,
            bitrate_bps,
            sizing: BufferSizing::default(),
        }
    }

    /// Replaces the buffer sizing (builder pattern).
    pub fn with_sizing(mut self, sizing: BufferSizing) -> Self {
        self.sizing = sizing;
        self
    }

    /// Parses an output URL of the form
    /// `dektecasi://<host>:<port>?bitrate=<bps>[&prefill=<bytes>][&lowmark=<bytes>][&block=<bytes>]`.
    ///
    /// The host part is ignored; the port selects the hardware port.
    pub fn from_url(input: &str) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|e| Error::InvalidConfig(format!("invalid output URL '{}': {}", input, e)))?;
        if url.scheme() != URL_SCHEME {
            return Err(Error::InvalidConfig(format!(
                "unsupported scheme '{}', expected '{}'",
                url.scheme(),
                URL_SCHEME
            )));
        }
        let port = url
            .port()
            .ok_or_else(|| Error::InvalidConfig("port must not be empty".into()))?;

        let mut bitrate = None;
        let mut sizing = BufferSizing::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "bitrate" => bitrate = Some(parse_number::<u32>("bitrate", &value)?),
                "prefill" => sizing.prefill_target = parse_number("prefill", &value)?,
                "lowmark" => sizing.low_watermark = parse_number("lowmark", &value)?,
                "block" => sizing.block_size = parse_number("block", &value)?,
                other => debug!("Ignoring unknown output URL parameter '{}'", other),
            }
        }
        let bitrate_bps =
            bitrate.ok_or_else(|| Error::InvalidConfig("bitrate must be set".into()))?;
        if bitrate_bps == 0 {
            return Err(Error::InvalidConfig("bitrate must be positive".into()));
        }
        sizing.validate()?;

        Ok(Self {
            port: i32::from(port),
            bitrate_bps,
            sizing,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} '{}' is not a valid number", key, value)))
}
