//! [`CommandChannel`] – request/response path to the privileged SMU driver.
//!
//! The channel accepts a command name, an ordered list of 64-bit inputs and
//! the number of outputs the caller expects.  It returns either the outputs
//! or an [`ExecutionFailure`]; there are no partial results.  Arity and
//! meaning are validated by the caller, not the channel.
//!
//! How the driver module is located and loaded is hidden behind
//! [`ChannelLoader`].

use smubus_types::ExecutionFailure;

/// A single long-lived connection to the driver module.
///
/// Implementations must not retry internally.  Concurrent use is expected to
/// be serialised by the caller's bus lock; the `Sync` bound only allows the
/// handle to be shared across the threads taking turns on that lock.
pub trait CommandChannel: Send + Sync {
    /// Execute `name` with `inputs`, expecting `expected_outputs` values back.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionFailure`] when the command is unknown or unsupported
    /// by this processor family, the driver is unavailable, the hardware
    /// rejected the request, or the transport failed.
    fn execute(
        &self,
        name: &str,
        inputs: &[i64],
        expected_outputs: usize,
    ) -> Result<Vec<i64>, ExecutionFailure>;

    /// Release the driver handle.  Called exactly once at teardown.
    fn close(&mut self);
}

/// Resolves a named driver module and opens a [`CommandChannel`] to it.
///
/// This is a one-time setup step; the module's identity is configuration.
pub trait ChannelLoader {
    /// Open a channel to `module`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionFailure::DriverUnavailable`] when the module cannot
    /// be found or loaded.
    fn open(&self, module: &str) -> Result<Box<dyn CommandChannel>, ExecutionFailure>;
}
