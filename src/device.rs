//! Hardware discovery and port attach for ASI outputs.

use crate::config::OutputConfig;
use crate::consts::{self, msg};
use crate::error::{attach_failed, configure_failed, Error, Result};
use crate::logging::{report_error, report_info, LogCallback};
use crate::sdk::{
    FramingMode, HardwareSdk, HwFunctionDesc, IoDirection, IoStandard, OutputChannel,
    OutputDevice,
};
use log::{debug, trace, warn};

/// Finds all hardware functions the SDK reports, up to [`consts::MAX_HW_FUNCTIONS`].
pub fn find_all_functions(sdk: &dyn HardwareSdk) -> Result<Vec<HwFunctionDesc>> {
    let functions = sdk
        .enumerate(consts::MAX_HW_FUNCTIONS)
        .map_err(|e| attach_failed("Hardware scan failed", e))?;
    for f in &functions {
        debug!(
            "Found hardware function: port={}, serial={}, caps=0x{:08X}, {}",
            f.port, f.serial, f.capabilities.0, f.type_and_location
        );
    }
    Ok(functions)
}

/// Returns the first function serving `port`.
pub fn find_port_function(functions: &[HwFunctionDesc], port: i32) -> Option<&HwFunctionDesc> {
    functions.iter().find(|f| f.port == port)
}

/// A port attached and configured for ASI output, not yet transmitting.
pub struct AttachedPort {
    pub(crate) device: Box<dyn OutputDevice>,
    pub(crate) channel: Box<dyn OutputChannel>,
    pub(crate) bidirectional: bool,
    pub(crate) function: HwFunctionDesc,
}

impl AttachedPort {
    /// The hardware function the port was attached through.
    pub fn function(&self) -> &HwFunctionDesc {
        &self.function
    }

    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }

    /// Detaches the channel, then the device.
    pub(crate) fn detach(mut self) {
        self.channel.detach();
        self.device.detach();
    }
}

impl std::fmt::Debug for AttachedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedPort")
            .field("function", &self.function)
            .field("bidirectional", &self.bidirectional)
            .finish_non_exhaustive()
    }
}

/// Locates the hardware function for `config.port`, attaches to its device and
/// output channel, and programs the I/O standard, direction, rate and framing.
///
/// Every failure is reported once through `log` as an error. Anything attached
/// before the failing step is detached again before returning.
pub fn attach_output_port(
    sdk: &dyn HardwareSdk,
    config: &OutputConfig,
    log: &LogCallback,
) -> Result<AttachedPort> {
    let functions = find_all_functions(sdk).inspect_err(|_| report_error(log, msg::NO_DEVICE))?;

    let function = match find_port_function(&functions, config.port) {
        Some(f) => f.clone(),
        None => {
            report_error(log, msg::NO_DEVICE);
            return Err(Error::PortNotFound { port: config.port });
        }
    };
    report_info(
        log,
        &format!(
            "Found DekTec {} {}",
            function.type_and_location, function.serial
        ),
    );

    if !function.capabilities.supports_asi() {
        return Err(unsupported(log, config.port, msg::NO_ASI));
    }
    if !function.capabilities.supports_output() {
        return Err(unsupported(log, config.port, msg::NO_OUTPUT));
    }
    let bidirectional = function.capabilities.is_bidirectional();

    let mut device = sdk.attach_by_serial(function.serial).map_err(|e| {
        report_error(log, msg::ATTACH_DEVICE);
        attach_failed(msg::ATTACH_DEVICE, e)
    })?;
    debug!("Attached to device serial={}", function.serial);

    let channel = match configure_and_attach(&mut *device, config, bidirectional, log) {
        Ok(channel) => channel,
        Err(e) => {
            warn!("Port {} setup failed, detaching device: {}", config.port, e);
            device.detach();
            return Err(e);
        }
    };

    Ok(AttachedPort {
        device,
        channel,
        bidirectional,
        function,
    })
}

fn unsupported(log: &LogCallback, port: i32, message: &str) -> Error {
    report_error(log, message);
    Error::UnsupportedCapability {
        port,
        message: message.to_string(),
    }
}

// Device-level configuration, channel attach and channel configuration.
// On error the channel (if attached) is already detached; the device is not.
fn configure_and_attach(
    device: &mut dyn OutputDevice,
    config: &OutputConfig,
    bidirectional: bool,
    log: &LogCallback,
) -> Result<Box<dyn OutputChannel>> {
    let port = config.port;
    device
        .configure_io_standard(port, IoStandard::Asi)
        .map_err(|e| {
            report_error(log, msg::SET_ASI);
            configure_failed(msg::SET_ASI, e)
        })?;

    if bidirectional {
        trace!("Port {} is bidirectional, forcing output direction", port);
        device
            .configure_io_direction(port, IoDirection::Output)
            .map_err(|e| {
                report_error(log, msg::SET_OUTPUT);
                configure_failed(msg::SET_OUTPUT, e)
            })?;
    }

    let mut channel = device.attach_port(port).map_err(|e| {
        report_error(log, msg::ATTACH_CHANNEL);
        attach_failed(msg::ATTACH_CHANNEL, e)
    })?;

    if let Err(e) = configure_channel(&mut *channel, config, log) {
        channel.detach();
        return Err(e);
    }
    Ok(channel)
}

fn configure_channel(
    channel: &mut dyn OutputChannel,
    config: &OutputConfig,
    log: &LogCallback,
) -> Result<()> {
    channel.set_rate_bps(config.bitrate_bps).map_err(|e| {
        report_error(log, msg::SET_RATE);
        configure_failed(msg::SET_RATE, e)
    })?;
    let framing = FramingMode::TS_188_STUFFED;
    channel.set_framing_mode(framing).map_err(|e| {
        report_error(log, msg::SET_FRAMING);
        configure_failed(msg::SET_FRAMING, e)
    })?;
    debug!(
        "Port {} configured: {} bps, {}",
        config.port, config.bitrate_bps, framing
    );
    Ok(())
}
