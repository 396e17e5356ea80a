use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a command's failure is surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Read-type commands: any failure is returned as an error.
    Propagate,
    /// Setter-type commands: an execution failure becomes `false`.
    ReportAsBoolean,
}

/// Number of numeric values a command consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count")]
pub enum Arity {
    Fixed(usize),
    /// The count is chosen by the caller at call time (PM-table reads).
    CallerSupplied,
}

/// Immutable descriptor of a single driver command.
///
/// The `name` is the wire contract with the driver module and must match the
/// driver's export exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Command {
    pub name: &'static str,
    pub input_arity: Arity,
    pub output_arity: Arity,
    pub policy: FailurePolicy,
}

impl Command {
    /// Resolve the output count the driver must return for this invocation.
    ///
    /// `requested` is only consulted for [`Arity::CallerSupplied`] commands.
    pub fn expected_outputs(&self, requested: usize) -> usize {
        match self.output_arity {
            Arity::Fixed(n) => n,
            Arity::CallerSupplied => requested,
        }
    }

    /// Whether `inputs` has the length this command declares.
    pub fn accepts_inputs(&self, inputs: &[i64]) -> bool {
        match self.input_arity {
            Arity::Fixed(n) => inputs.len() == n,
            Arity::CallerSupplied => true,
        }
    }
}

/// Location of the PM table as reported by the SMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmTableLocation {
    pub version: u32,
    pub base_address: u32,
}

/// SMU firmware version as carried in the lower 32 bits of the driver output.
///
/// Displays as `major.minor.patch` taken from bytes 2, 1 and 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SmuVersion(pub u32);

impl SmuVersion {
    pub fn major(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn minor(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn patch(self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for SmuVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// The bus lock could not be acquired within the configured bound.
///
/// Always fatal, including for setter operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("timed out after {}ms waiting for the SMU bus lock", .timeout.as_millis())]
pub struct LockTimeout {
    pub timeout: Duration,
}

/// The command channel rejected or could not complete a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    #[error("command '{command}' is not supported by this processor family")]
    Unsupported { command: String },

    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("driver rejected '{command}' with status {status:#x}")]
    Rejected { command: String, status: u32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("command channel is closed")]
    Closed,
}

/// Errors surfaced by read-type SMU operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmuError {
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("SMU command '{command}' failed: {source}")]
    Execution {
        command: &'static str,
        #[source]
        source: ExecutionFailure,
    },

    /// The driver module could not be opened.
    #[error("failed to open SMU driver module '{module}': {source}")]
    DriverLoad {
        module: String,
        #[source]
        source: ExecutionFailure,
    },

    /// The driver returned a different number of outputs than the catalog
    /// declares. Indicates a catalog or driver defect.
    #[error("SMU command '{command}' returned {actual} values, expected {expected}")]
    ArityMismatch {
        command: &'static str,
        expected: usize,
        actual: usize,
    },
}
