//! `smubus-kernel` – SMU command execution and bus discipline
//!
//! Serialises every caller onto the single management bus and speaks the
//! driver's fixed command vocabulary.
//!
//! # Modules
//!
//! - [`catalog`] – the static table of driver commands: wire name, input and
//!   output arity, and whether failure propagates or is reported as `false`.
//! - [`dispatcher`] – [`SmuDispatcher`][dispatcher::SmuDispatcher]: one method
//!   per SMU action.  Each takes the bus lock with a bounded wait, executes
//!   exactly one command on the channel, maps the result per the command's
//!   failure policy and releases the lock on every path.

pub mod catalog;
pub mod dispatcher;

pub use dispatcher::{CodeNameLocking, DispatcherConfig, GfxClockTarget, PowerLimit, SmuDispatcher};
