//! In-process simulated SMU driver for CI/CD testing without hardware.
//!
//! [`SimChannel`] implements [`CommandChannel`] with scripted responses and
//! records every call it receives.  Clones share the same state, so a test
//! can hand one clone to a dispatcher and keep another to inspect the calls.
//!
//! # Example
//!
//! ```rust
//! use smubus_hal::channel::CommandChannel;
//! use smubus_hal::sim::SimChannel;
//!
//! let sim = SimChannel::new().with_response("ioctl_get_smu_version", vec![0x0001_0203]);
//! let probe = sim.clone();
//!
//! assert_eq!(sim.execute("ioctl_get_smu_version", &[], 1).unwrap(), vec![66051]);
//! assert!(sim.execute("ioctl_set_gfx_clk", &[1800], 0).is_err());
//! assert_eq!(probe.calls().len(), 2);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use smubus_types::ExecutionFailure;
use tracing::debug;

use crate::channel::{ChannelLoader, CommandChannel};

/// Firmware version reported by [`SimChannel::ryzen_preset`] (46.65.0).
pub const SIM_SMU_VERSION: i64 = 0x002E_4100;
/// Code name reported by [`SimChannel::ryzen_preset`].
pub const SIM_CODE_NAME: i64 = 17;
/// PM-table version reported by [`SimChannel::ryzen_preset`].
pub const SIM_PM_TABLE_VERSION: i64 = 0x0040_0005;
/// PM-table base address reported by [`SimChannel::ryzen_preset`].
pub const SIM_PM_TABLE_BASE: i64 = 0xDC36_0000;
/// Number of words in the PM table of [`SimChannel::ryzen_preset`].
pub const SIM_PM_TABLE_WORDS: usize = 256;

type Handler = Arc<dyn Fn(&[i64], usize) -> Result<Vec<i64>, ExecutionFailure> + Send + Sync>;

/// One call received by a [`SimChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub name: String,
    pub inputs: Vec<i64>,
    pub expected_outputs: usize,
}

#[derive(Default)]
struct SimState {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<SimCall>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    closes: AtomicUsize,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// SimChannel
// ────────────────────────────────────────────────────────────────────────────

/// Scriptable simulated driver channel.
///
/// Commands without a scripted response fail with
/// [`ExecutionFailure::Unsupported`], mirroring a driver that does not export
/// them for the current processor family.
#[derive(Clone, Default)]
pub struct SimChannel {
    state: Arc<SimState>,
}

impl SimChannel {
    /// Create a channel that supports no commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// A plausible APU profile: version, code name and PM-table commands
    /// succeed, the power-limit and min/max GFX clock setters are accepted,
    /// and the direct GFX clock override is unsupported.
    pub fn ryzen_preset() -> Self {
        let table: Vec<i64> = (0..SIM_PM_TABLE_WORDS as i64).collect();
        let mut sim = Self::new()
            .with_response("ioctl_get_smu_version", vec![SIM_SMU_VERSION])
            .with_response("ioctl_get_code_name", vec![SIM_CODE_NAME])
            .with_response("ioctl_update_pm_table", vec![])
            .with_response(
                "ioctl_resolve_pm_table",
                vec![SIM_PM_TABLE_VERSION, SIM_PM_TABLE_BASE],
            )
            .with_handler("ioctl_read_pm_table", move |_, expected| {
                let mut words = table.clone();
                words.resize(expected, 0);
                Ok(words)
            });
        for setter in [
            "ioctl_set_stapm_limit",
            "ioctl_set_ppt_fast_limit",
            "ioctl_set_ppt_slow_limit",
            "ioctl_set_min_gfxclk",
            "ioctl_set_max_gfxclk",
        ] {
            sim = sim.with_response(setter, vec![]);
        }
        sim
    }

    /// Answer `name` with a fixed output list.
    pub fn with_response(self, name: impl Into<String>, outputs: Vec<i64>) -> Self {
        self.with_handler(name, move |_, _| Ok(outputs.clone()))
    }

    /// Answer `name` by calling `handler` with the inputs and the expected
    /// output count.
    pub fn with_handler<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[i64], usize) -> Result<Vec<i64>, ExecutionFailure> + Send + Sync + 'static,
    {
        locked(&self.state.handlers).insert(name.into(), Arc::new(handler));
        self
    }

    /// Make `name` fail with `failure` on every call.
    pub fn with_failure(self, name: impl Into<String>, failure: ExecutionFailure) -> Self {
        self.with_handler(name, move |_, _| Err(failure.clone()))
    }

    /// Remove any scripted response so `name` reports as unsupported.
    pub fn with_unsupported(self, name: &str) -> Self {
        locked(&self.state.handlers).remove(name);
        self
    }

    /// Sleep for `latency` inside every execution.
    pub fn with_latency(self, latency: Duration) -> Self {
        *locked(&self.state.latency) = latency;
        self
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<SimCall> {
        locked(&self.state.calls).clone()
    }

    /// Calls received for `name`, in arrival order.
    pub fn calls_to(&self, name: &str) -> Vec<SimCall> {
        locked(&self.state.calls)
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    /// Highest number of executions observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    /// How many times [`CommandChannel::close`] has been called.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

impl CommandChannel for SimChannel {
    fn execute(
        &self,
        name: &str,
        inputs: &[i64],
        expected_outputs: usize,
    ) -> Result<Vec<i64>, ExecutionFailure> {
        if self.close_count() > 0 {
            return Err(ExecutionFailure::Closed);
        }

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        locked(&self.state.calls).push(SimCall {
            name: name.to_string(),
            inputs: inputs.to_vec(),
            expected_outputs,
        });
        debug!(command = name, ?inputs, expected_outputs, "sim channel execute");

        let latency = *locked(&self.state.latency);
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let handler = locked(&self.state.handlers).get(name).cloned();
        let result = match handler {
            Some(h) => h(inputs, expected_outputs),
            None => Err(ExecutionFailure::Unsupported {
                command: name.to_string(),
            }),
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimLoader
// ────────────────────────────────────────────────────────────────────────────

/// [`ChannelLoader`] that hands out clones of a prepared [`SimChannel`] for
/// any non-empty module name.
#[derive(Clone, Default)]
pub struct SimLoader {
    channel: SimChannel,
}

impl SimLoader {
    pub fn new(channel: SimChannel) -> Self {
        Self { channel }
    }
}

impl ChannelLoader for SimLoader {
    fn open(&self, module: &str) -> Result<Box<dyn CommandChannel>, ExecutionFailure> {
        if module.trim().is_empty() {
            return Err(ExecutionFailure::DriverUnavailable(
                "no driver module configured".to_string(),
            ));
        }
        debug!(module, "opening simulated driver module");
        Ok(Box::new(self.channel.clone()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscripted_command_is_unsupported() {
        let sim = SimChannel::new();
        let err = sim.execute("ioctl_set_gfx_clk", &[1800], 0).unwrap_err();
        assert_eq!(
            err,
            ExecutionFailure::Unsupported {
                command: "ioctl_set_gfx_clk".into()
            }
        );
    }

    #[test]
    fn records_calls_in_order() {
        let sim = SimChannel::new()
            .with_response("a", vec![1])
            .with_response("b", vec![]);
        sim.execute("a", &[], 1).unwrap();
        sim.execute("b", &[7], 0).unwrap();

        let calls = sim.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].inputs, vec![7]);
        assert_eq!(sim.calls_to("b").len(), 1);
    }

    #[test]
    fn handler_sees_inputs_and_expected_count() {
        let sim = SimChannel::new().with_handler("echo", |inputs, expected| {
            Ok(vec![inputs[0]; expected])
        });
        assert_eq!(sim.execute("echo", &[9], 3).unwrap(), vec![9, 9, 9]);
    }

    #[test]
    fn scripted_failure_is_returned() {
        let sim = SimChannel::new().with_failure(
            "ioctl_set_stapm_limit",
            ExecutionFailure::Rejected {
                command: "ioctl_set_stapm_limit".into(),
                status: 0xFE,
            },
        );
        assert!(matches!(
            sim.execute("ioctl_set_stapm_limit", &[15_000], 0),
            Err(ExecutionFailure::Rejected { status: 0xFE, .. })
        ));
    }

    #[test]
    fn clones_share_state() {
        let sim = SimChannel::ryzen_preset();
        let probe = sim.clone();
        sim.execute("ioctl_get_code_name", &[], 1).unwrap();
        assert_eq!(probe.calls().len(), 1);
    }

    #[test]
    fn preset_pm_table_honours_requested_size() {
        let sim = SimChannel::ryzen_preset();
        let words = sim.execute("ioctl_read_pm_table", &[], 64).unwrap();
        assert_eq!(words.len(), 64);
        assert_eq!(words[0], 0);
        assert_eq!(words[63], 63);

        let padded = sim
            .execute("ioctl_read_pm_table", &[], SIM_PM_TABLE_WORDS + 4)
            .unwrap();
        assert_eq!(padded[SIM_PM_TABLE_WORDS], 0);
    }

    #[test]
    fn preset_rejects_direct_gfx_clock() {
        let sim = SimChannel::ryzen_preset();
        assert!(sim.execute("ioctl_set_gfx_clk", &[1800], 0).is_err());
        assert!(sim.execute("ioctl_set_max_gfxclk", &[1800], 0).is_ok());
    }

    #[test]
    fn with_unsupported_removes_response() {
        let sim = SimChannel::ryzen_preset().with_unsupported("ioctl_set_stapm_limit");
        assert!(sim.execute("ioctl_set_stapm_limit", &[1], 0).is_err());
    }

    #[test]
    fn peak_concurrency_tracks_overlap() {
        let sim = SimChannel::new()
            .with_response("slow", vec![])
            .with_latency(Duration::from_millis(200));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let sim = sim.clone();
                thread::spawn(move || sim.execute("slow", &[], 0))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(sim.peak_concurrency(), 2);
    }

    #[test]
    fn closed_channel_fails_every_call() {
        let mut sim = SimChannel::ryzen_preset();
        sim.close();
        assert_eq!(sim.close_count(), 1);
        assert_eq!(
            sim.execute("ioctl_get_code_name", &[], 1),
            Err(ExecutionFailure::Closed)
        );
    }

    #[test]
    fn loader_requires_module_name() {
        let loader = SimLoader::new(SimChannel::ryzen_preset());
        assert!(matches!(
            loader.open(""),
            Err(ExecutionFailure::DriverUnavailable(_))
        ));
        let channel = loader.open("RyzenSMU.bin").expect("sim module opens");
        assert_eq!(
            channel.execute("ioctl_get_smu_version", &[], 1).unwrap(),
            vec![SIM_SMU_VERSION]
        );
    }
}
