//! Static catalog of the SMU driver's commands.
//!
//! Names, input counts and output counts are the wire contract with the
//! driver module.  A mismatch here is a configuration defect, never a
//! runtime-recoverable condition.

use smubus_types::{Arity, Command, FailurePolicy};

const fn read(name: &'static str, outputs: Arity) -> Command {
    Command {
        name,
        input_arity: Arity::Fixed(0),
        output_arity: outputs,
        policy: FailurePolicy::Propagate,
    }
}

const fn setter(name: &'static str) -> Command {
    Command {
        name,
        input_arity: Arity::Fixed(1),
        output_arity: Arity::Fixed(0),
        policy: FailurePolicy::ReportAsBoolean,
    }
}

pub const GET_SMU_VERSION: Command = read("ioctl_get_smu_version", Arity::Fixed(1));
pub const GET_CODE_NAME: Command = read("ioctl_get_code_name", Arity::Fixed(1));
/// The table size travels as the expected output count; no inputs are sent.
pub const READ_PM_TABLE: Command = read("ioctl_read_pm_table", Arity::CallerSupplied);
pub const UPDATE_PM_TABLE: Command = read("ioctl_update_pm_table", Arity::Fixed(0));
pub const RESOLVE_PM_TABLE: Command = read("ioctl_resolve_pm_table", Arity::Fixed(2));

/// STAPM limit, milliwatts.
pub const SET_STAPM_LIMIT: Command = setter("ioctl_set_stapm_limit");
/// PPT fast (short) limit, milliwatts.
pub const SET_PPT_FAST_LIMIT: Command = setter("ioctl_set_ppt_fast_limit");
/// PPT slow (sustained) limit, milliwatts.
pub const SET_PPT_SLOW_LIMIT: Command = setter("ioctl_set_ppt_slow_limit");
/// Direct GFX clock override, MHz.  Not every family supports it.
pub const SET_GFX_CLK: Command = setter("ioctl_set_gfx_clk");
pub const SET_MIN_GFXCLK: Command = setter("ioctl_set_min_gfxclk");
pub const SET_MAX_GFXCLK: Command = setter("ioctl_set_max_gfxclk");

static ALL: [Command; 11] = [
    GET_SMU_VERSION,
    GET_CODE_NAME,
    READ_PM_TABLE,
    UPDATE_PM_TABLE,
    RESOLVE_PM_TABLE,
    SET_STAPM_LIMIT,
    SET_PPT_FAST_LIMIT,
    SET_PPT_SLOW_LIMIT,
    SET_GFX_CLK,
    SET_MIN_GFXCLK,
    SET_MAX_GFXCLK,
];

/// Every command the driver module is expected to export.
pub fn all() -> &'static [Command] {
    &ALL
}

/// Look up a command by its wire name.
pub fn lookup(name: &str) -> Option<&'static Command> {
    ALL.iter().find(|c| c.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = all().iter().map(|c| c.name).collect();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn lookup_finds_every_entry() {
        for cmd in all() {
            assert_eq!(lookup(cmd.name), Some(cmd));
        }
        assert!(lookup("ioctl_does_not_exist").is_none());
    }

    #[test]
    fn setters_take_one_input_and_report_as_boolean() {
        let setters: Vec<_> = all()
            .iter()
            .filter(|c| c.policy == FailurePolicy::ReportAsBoolean)
            .collect();
        assert_eq!(setters.len(), 6);
        for cmd in setters {
            assert_eq!(cmd.input_arity, Arity::Fixed(1), "{}", cmd.name);
            assert_eq!(cmd.output_arity, Arity::Fixed(0), "{}", cmd.name);
        }
    }

    #[test]
    fn reads_send_no_inputs_and_propagate() {
        for cmd in all().iter().filter(|c| c.policy == FailurePolicy::Propagate) {
            assert_eq!(cmd.input_arity, Arity::Fixed(0), "{}", cmd.name);
        }
        assert_eq!(GET_SMU_VERSION.expected_outputs(0), 1);
        assert_eq!(RESOLVE_PM_TABLE.expected_outputs(0), 2);
        assert_eq!(UPDATE_PM_TABLE.expected_outputs(0), 0);
        assert_eq!(READ_PM_TABLE.expected_outputs(64), 64);
    }

    #[test]
    fn catalog_serializes_to_json() {
        let json = serde_json::to_string(all()).unwrap();
        assert!(json.contains("ioctl_set_max_gfxclk"));
        assert!(json.contains("ReportAsBoolean"));
    }
}
