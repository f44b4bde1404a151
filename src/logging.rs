//! Caller-supplied log callback.
//!
//! User-facing messages (device found, setup failures, prefill transitions,
//! underruns) are delivered through a callback rather than a global logger,
//! so a host can tag them with its own context. The callback is invoked
//! synchronously, possibly from inside [`crate::AsiOutput::create`].

use log::{error, info, trace};
use std::sync::Arc;

/// Log callback: `(is_error, message)`.
///
/// Whatever the closure captures plays the role of the opaque cookie.
pub type LogCallback = Arc<dyn Fn(bool, &str) + Send + Sync>;

/// Builds a callback that forwards driver messages to the `log` facade.
///
/// Errors go to `error!`, everything else to `info!`, both tagged with
/// `module` as the log target.
pub fn log_forwarder(module: &'static str) -> LogCallback {
    Arc::new(move |is_error: bool, message: &str| {
        if is_error {
            error!(target: module, "{}", message);
        } else {
            info!(target: module, "{}", message);
        }
    })
}

pub(crate) fn report_error(log: &LogCallback, message: &str) {
    trace!("log callback (error): {}", message);
    log(true, message);
}

pub(crate) fn report_info(log: &LogCallback, message: &str) {
    trace!("log callback (info): {}", message);
    log(false, message);
}
