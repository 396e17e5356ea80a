//! [`SmuDispatcher`] – the single gateway to the SMU command channel.
//!
//! Every bus-sensitive operation follows the same template:
//!
//! 1. Take the [`BusLock`] within [`DispatcherConfig::lock_timeout`]
//!    (5000 ms by default).  On timeout the operation fails with
//!    [`LockTimeout`]; this is never downgraded, not even for setters.
//! 2. Execute exactly one catalog command on the [`CommandChannel`].
//! 3. Map the result according to the command's failure policy.
//! 4. Release the lock, on every path.
//!
//! Read-type operations return `Result<_, SmuError>`.  Setter operations
//! return `Result<bool, LockTimeout>`: an unsupported or rejected setting is
//! an expected outcome and comes back as `Ok(false)`.
//!
//! The dispatcher never retries and imposes no ordering between operations.
//! A caller chaining `refresh_pm_table`, `resolve_pm_table` and
//! `read_pm_table` is responsible for issuing them in that order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use smubus_hal::{ProcessBusLock, SimChannel};
//! use smubus_kernel::SmuDispatcher;
//!
//! let smu = SmuDispatcher::new(
//!     Box::new(SimChannel::ryzen_preset()),
//!     Arc::new(ProcessBusLock::new()),
//! );
//!
//! assert!(smu.firmware_version().is_ok());
//! assert_eq!(smu.set_stapm_limit(15_000), Ok(true));
//! // The preset family has no direct GFX clock override.
//! assert_eq!(smu.set_gfx_clock(1800), Ok(false));
//! smu.close();
//! ```

use std::sync::Arc;
use std::time::Duration;

use smubus_hal::{BusGuard, BusLock, ChannelLoader, CommandChannel};
use smubus_types::{Command, LockTimeout, PmTableLocation, SmuError};
use tracing::{debug, debug_span, error, info, warn};

use crate::catalog;

/// Default bound on waiting for the bus lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Whether [`SmuDispatcher::code_name`] takes the bus lock.
///
/// The code name is the one read the known driver integration issues without
/// the lock.  Whether it actually touches the bus is unconfirmed on real
/// hardware, so the choice is left to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeNameLocking {
    #[default]
    Unlocked,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub lock_timeout: Duration,
    pub code_name_locking: CodeNameLocking,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            code_name_locking: CodeNameLocking::default(),
        }
    }
}

/// Power-limit categories accepted by [`SmuDispatcher::set_power_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerLimit {
    /// Sustained (STAPM) limit.
    Stapm,
    /// Short-term package power tracking limit.
    PptFast,
    /// Long-term package power tracking limit.
    PptSlow,
}

impl PowerLimit {
    pub fn command(self) -> &'static Command {
        match self {
            PowerLimit::Stapm => &catalog::SET_STAPM_LIMIT,
            PowerLimit::PptFast => &catalog::SET_PPT_FAST_LIMIT,
            PowerLimit::PptSlow => &catalog::SET_PPT_SLOW_LIMIT,
        }
    }
}

/// GFX clock controls accepted by [`SmuDispatcher::set_gfx_clock_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxClockTarget {
    Direct,
    Min,
    Max,
}

impl GfxClockTarget {
    pub fn command(self) -> &'static Command {
        match self {
            GfxClockTarget::Direct => &catalog::SET_GFX_CLK,
            GfxClockTarget::Min => &catalog::SET_MIN_GFXCLK,
            GfxClockTarget::Max => &catalog::SET_MAX_GFXCLK,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

/// Serialises SMU commands onto the shared management bus.
///
/// The dispatcher exclusively owns its channel handle.  The lock is shared:
/// give every dispatcher that talks to the same physical bus the same lock.
/// All methods take `&self`, so an `Arc<SmuDispatcher>` can be used from many
/// threads; the bus lock serialises them.
pub struct SmuDispatcher {
    channel: Box<dyn CommandChannel>,
    lock: Arc<dyn BusLock>,
    config: DispatcherConfig,
}

impl SmuDispatcher {
    /// Create a dispatcher with the default configuration.
    pub fn new(channel: Box<dyn CommandChannel>, lock: Arc<dyn BusLock>) -> Self {
        Self::with_config(channel, lock, DispatcherConfig::default())
    }

    pub fn with_config(
        channel: Box<dyn CommandChannel>,
        lock: Arc<dyn BusLock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            channel,
            lock,
            config,
        }
    }

    /// Open the driver `module` through `loader` and wrap the resulting
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns [`SmuError::DriverLoad`] when the loader cannot open `module`.
    pub fn open(
        loader: &dyn ChannelLoader,
        module: &str,
        lock: Arc<dyn BusLock>,
        config: DispatcherConfig,
    ) -> Result<Self, SmuError> {
        let channel = loader.open(module).map_err(|source| SmuError::DriverLoad {
            module: module.to_string(),
            source,
        })?;
        info!(module, "SMU driver module opened");
        Ok(Self::with_config(channel, lock, config))
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // ── Read-type operations ───────────────────────────────────────────────

    /// SMU firmware version: the lower 32 bits of the driver's output.
    pub fn firmware_version(&self) -> Result<u32, SmuError> {
        let out = self.run_locked(&catalog::GET_SMU_VERSION, &[], 0)?;
        Ok(out[0] as u32)
    }

    /// Processor family / code-name identifier.
    ///
    /// Takes the bus lock only under [`CodeNameLocking::Locked`].
    pub fn code_name(&self) -> Result<i64, SmuError> {
        let out = match self.config.code_name_locking {
            CodeNameLocking::Locked => self.run_locked(&catalog::GET_CODE_NAME, &[], 0)?,
            CodeNameLocking::Unlocked => self.execute(&catalog::GET_CODE_NAME, &[], 0)?,
        };
        Ok(out[0])
    }

    /// Read `size` raw 64-bit words of the PM table, in driver order.
    pub fn read_pm_table(&self, size: usize) -> Result<Vec<i64>, SmuError> {
        self.run_locked(&catalog::READ_PM_TABLE, &[], size)
    }

    /// Ask the SMU to refresh the PM table contents.
    pub fn refresh_pm_table(&self) -> Result<(), SmuError> {
        self.run_locked(&catalog::UPDATE_PM_TABLE, &[], 0)?;
        Ok(())
    }

    /// Resolve the PM table's version and base address.
    pub fn resolve_pm_table(&self) -> Result<PmTableLocation, SmuError> {
        let out = self.run_locked(&catalog::RESOLVE_PM_TABLE, &[], 0)?;
        Ok(PmTableLocation {
            version: out[0] as u32,
            base_address: out[1] as u32,
        })
    }

    // ── Setter operations ──────────────────────────────────────────────────

    /// Apply a power limit in milliwatts.  `Ok(false)` means not applied.
    ///
    /// # Errors
    ///
    /// Only [`LockTimeout`]; channel failures are reported as `Ok(false)`.
    pub fn set_power_limit(&self, limit: PowerLimit, milliwatts: u32) -> Result<bool, LockTimeout> {
        self.apply_setting(limit.command(), milliwatts)
    }

    /// Apply a GFX clock setting in MHz.  `Ok(false)` means not applied.
    ///
    /// # Errors
    ///
    /// Only [`LockTimeout`]; channel failures are reported as `Ok(false)`.
    pub fn set_gfx_clock_limit(&self, target: GfxClockTarget, mhz: u32) -> Result<bool, LockTimeout> {
        self.apply_setting(target.command(), mhz)
    }

    pub fn set_stapm_limit(&self, milliwatts: u32) -> Result<bool, LockTimeout> {
        self.set_power_limit(PowerLimit::Stapm, milliwatts)
    }

    pub fn set_ppt_fast_limit(&self, milliwatts: u32) -> Result<bool, LockTimeout> {
        self.set_power_limit(PowerLimit::PptFast, milliwatts)
    }

    pub fn set_ppt_slow_limit(&self, milliwatts: u32) -> Result<bool, LockTimeout> {
        self.set_power_limit(PowerLimit::PptSlow, milliwatts)
    }

    /// Set the GFX clock directly, where the family supports it.
    pub fn set_gfx_clock(&self, mhz: u32) -> Result<bool, LockTimeout> {
        self.set_gfx_clock_limit(GfxClockTarget::Direct, mhz)
    }

    pub fn set_min_gfx_clock(&self, mhz: u32) -> Result<bool, LockTimeout> {
        self.set_gfx_clock_limit(GfxClockTarget::Min, mhz)
    }

    pub fn set_max_gfx_clock(&self, mhz: u32) -> Result<bool, LockTimeout> {
        self.set_gfx_clock_limit(GfxClockTarget::Max, mhz)
    }

    // ── Teardown ───────────────────────────────────────────────────────────

    /// Close the driver channel.  Consumes the dispatcher, so no operation
    /// can run after, or concurrently with, the close.
    pub fn close(mut self) {
        self.channel.close();
        debug!("SMU command channel closed");
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn lock_bus(&self, cmd: &Command) -> Result<BusGuard<'_>, LockTimeout> {
        let timeout = self.config.lock_timeout;
        BusGuard::acquire(self.lock.as_ref(), timeout).ok_or_else(|| {
            warn!(command = cmd.name, timeout_ms = timeout.as_millis() as u64, "timed out waiting for SMU bus lock");
            LockTimeout { timeout }
        })
    }

    fn run_locked(&self, cmd: &'static Command, inputs: &[i64], requested: usize) -> Result<Vec<i64>, SmuError> {
        let guard = self.lock_bus(cmd)?;
        let result = self.execute(cmd, inputs, requested);
        drop(guard);
        result
    }

    fn apply_setting(&self, cmd: &'static Command, value: u32) -> Result<bool, LockTimeout> {
        let _guard = self.lock_bus(cmd)?;
        match self.execute(cmd, &[i64::from(value)], 0) {
            Ok(_) => {
                debug!(command = cmd.name, value, "SMU setting applied");
                Ok(true)
            }
            Err(e) => {
                debug!(command = cmd.name, value, error = %e, "SMU setting not applied");
                Ok(false)
            }
        }
    }

    /// Execute one command and enforce its declared output arity.
    fn execute(&self, cmd: &'static Command, inputs: &[i64], requested: usize) -> Result<Vec<i64>, SmuError> {
        debug_assert!(cmd.accepts_inputs(inputs), "input arity violated for {}", cmd.name);
        let expected = cmd.expected_outputs(requested);
        let _span = debug_span!("smu_command", command = cmd.name, expected).entered();

        let outputs = self
            .channel
            .execute(cmd.name, inputs, expected)
            .map_err(|source| SmuError::Execution {
                command: cmd.name,
                source,
            })?;

        if outputs.len() != expected {
            error!(command = cmd.name, expected, actual = outputs.len(), "SMU driver returned wrong number of values");
            return Err(SmuError::ArityMismatch {
                command: cmd.name,
                expected,
                actual: outputs.len(),
            });
        }
        Ok(outputs)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
