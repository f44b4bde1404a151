use crate::driver::State;
use crate::sdk::SdkError;
use thiserror::Error;

/// Errors that can occur when setting up or driving an ASI output.
///
/// Setup errors (`PortNotFound`, `UnsupportedCapability`, `AttachFailed`,
/// `ConfigureFailed`, `MissingLogCallback`) are fatal to the instance being
/// created. `WriteTooLarge` and `NotOperational` are caller contract
/// violations and leave the driver untouched.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reported by the underlying hardware SDK.
    #[error("SDK error: {0}")]
    Sdk(#[from] SdkError),
    /// No log callback was supplied, so no other error could be reported.
    #[error("A log callback is required to create an ASI output")]
    MissingLogCallback,
    /// No hardware function was found for the requested port.
    #[error("No hardware function found for port {port}")]
    PortNotFound {
        /// The port number that was searched for.
        port: i32,
    },
    /// The port exists but lacks a capability needed for ASI output.
    #[error("Port {port} is not usable: {message}")]
    UnsupportedCapability {
        /// The port that was rejected.
        port: i32,
        /// Which capability is missing.
        message: String,
    },
    /// Attaching to the device or to the output channel failed.
    #[error("Attach failed: {message}")]
    AttachFailed {
        /// What was being attached.
        message: String,
        /// The SDK failure behind it.
        #[source]
        source: SdkError,
    },
    /// Configuring the I/O standard, direction, rate or framing failed.
    #[error("Configuration failed: {message}")]
    ConfigureFailed {
        /// Which setting was rejected.
        message: String,
        /// The SDK failure behind it.
        #[source]
        source: SdkError,
    },
    /// The write would need more than one block flush in a single call.
    #[error("Write of {actual} bytes exceeds the {max} bytes accepted by a single call")]
    WriteTooLarge {
        /// Largest write currently accepted.
        max: usize,
        /// Size of the rejected write.
        actual: usize,
    },
    /// The instance is failed or already torn down.
    #[error("ASI output is not operational (state: {state:?})")]
    NotOperational {
        /// State of the instance when the call was made.
        state: State,
    },
    /// Invalid output configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true for errors that make the instance unusable.
    ///
    /// Everything else can be recovered from by the caller, e.g. by
    /// re-chunking a write or re-driving data after a sink error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingLogCallback
                | Error::PortNotFound { .. }
                | Error::UnsupportedCapability { .. }
                | Error::AttachFailed { .. }
                | Error::ConfigureFailed { .. }
                | Error::InvalidConfig(_)
        )
    }
}

/// Result type alias for ASI output operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn attach_failed(message: &str, source: SdkError) -> Error {
    Error::AttachFailed {
        message: message.to_string(),
        source,
    }
}

pub(crate) fn configure_failed(message: &str, source: SdkError) -> Error {
    Error::ConfigureFailed {
        message: message.to_string(),
        source,
    }
}
