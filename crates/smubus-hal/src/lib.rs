//! `smubus-hal` – the hardware boundary of smubus.
//!
//! Everything that touches a physical resource sits behind a trait here so
//! that the dispatcher in `smubus-kernel` can be exercised without hardware.
//!
//! # Modules
//!
//! - [`bus_lock`] – [`BusLock`][bus_lock::BusLock]: bounded-wait mutual
//!   exclusion over the shared management bus, with an in-process
//!   ([`ProcessBusLock`][bus_lock::ProcessBusLock]) and a system-wide
//!   ([`FileBusLock`][bus_lock::FileBusLock]) implementation, plus the RAII
//!   [`BusGuard`][bus_lock::BusGuard] that pairs every acquire with one release.
//! - [`channel`] – [`CommandChannel`][channel::CommandChannel]: the narrow
//!   request/response path to the privileged driver module, and the
//!   [`ChannelLoader`][channel::ChannelLoader] seam that opens it.
//! - [`sim`] – [`SimChannel`][sim::SimChannel]: a scriptable in-process driver
//!   for CI and the CLI's `sim` backend.

pub mod bus_lock;
pub mod channel;
pub mod sim;

pub use bus_lock::{BusGuard, BusLock, FileBusLock, ProcessBusLock};
pub use channel::{ChannelLoader, CommandChannel};
pub use sim::{SimCall, SimChannel, SimLoader};
