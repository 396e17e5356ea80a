//! SMU actions shared by the one-shot command line and the REPL.
//!
//! Words are parsed into a [`SmuCommand`], executed against a
//! [`SmuDispatcher`] and turned into a [`Report`] for display.

use colored::Colorize;

use smubus_kernel::{GfxClockTarget, PowerLimit, SmuDispatcher, catalog};
use smubus_types::{PmTableLocation, SmuError, SmuVersion};

/// A single user-requested SMU action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmuCommand {
    Version,
    CodeName,
    PmRefresh,
    PmResolve,
    PmRead(usize),
    /// Refresh, resolve and read in one go.  `None` uses the configured size.
    PmDump(Option<usize>),
    PowerLimit(PowerLimit, u32),
    GfxClock(GfxClockTarget, u32),
    Catalog,
}

/// Parse `words` (e.g. `["stapm", "25000"]` or `["/pm", "read", "64"]`).
///
/// A leading `/` on the verb is accepted so REPL input and argv share one
/// grammar.
pub fn parse(words: &[&str]) -> Result<SmuCommand, String> {
    let Some((verb, args)) = words.split_first() else {
        return Err("no command given".to_string());
    };
    let verb = verb.strip_prefix('/').unwrap_or(*verb);

    match (verb, args) {
        ("version", []) => Ok(SmuCommand::Version),
        ("codename", []) => Ok(SmuCommand::CodeName),
        ("catalog", []) => Ok(SmuCommand::Catalog),
        ("pm", ["refresh"]) => Ok(SmuCommand::PmRefresh),
        ("pm", ["resolve"]) => Ok(SmuCommand::PmResolve),
        ("pm", ["read", n]) => parse_count(n).map(SmuCommand::PmRead),
        ("pm", ["dump"]) => Ok(SmuCommand::PmDump(None)),
        ("pm", ["dump", n]) => parse_count(n).map(|n| SmuCommand::PmDump(Some(n))),
        ("pm", _) => Err("usage: pm refresh | resolve | read <words> | dump [words]".to_string()),
        ("stapm", [v]) => parse_value(v).map(|v| SmuCommand::PowerLimit(PowerLimit::Stapm, v)),
        ("ppt-fast", [v]) => {
            parse_value(v).map(|v| SmuCommand::PowerLimit(PowerLimit::PptFast, v))
        }
        ("ppt-slow", [v]) => {
            parse_value(v).map(|v| SmuCommand::PowerLimit(PowerLimit::PptSlow, v))
        }
        ("gfx", [v]) => parse_value(v).map(|v| SmuCommand::GfxClock(GfxClockTarget::Direct, v)),
        ("gfx-min", [v]) => parse_value(v).map(|v| SmuCommand::GfxClock(GfxClockTarget::Min, v)),
        ("gfx-max", [v]) => parse_value(v).map(|v| SmuCommand::GfxClock(GfxClockTarget::Max, v)),
        ("stapm" | "ppt-fast" | "ppt-slow", _) => Err(format!("usage: {verb} <milliwatts>")),
        ("gfx" | "gfx-min" | "gfx-max", _) => Err(format!("usage: {verb} <mhz>")),
        ("version" | "codename" | "catalog", _) => Err(format!("{verb} takes no arguments")),
        _ => Err(format!("unknown command '{verb}'")),
    }
}

fn parse_count(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("'{raw}' is not a positive word count")),
    }
}

fn parse_value(raw: &str) -> Result<u32, String> {
    raw.parse::<u32>()
        .map_err(|_| format!("'{raw}' is not an unsigned 32-bit value"))
}

/// Result of a successfully dispatched [`SmuCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Version(SmuVersion),
    CodeName(i64),
    PmRefreshed,
    PmLocation(PmTableLocation),
    PmTable(Vec<i64>),
    PmDump {
        location: PmTableLocation,
        table: Vec<i64>,
    },
    /// A setter ran; `applied` is the driver's verdict.
    Setting {
        command: &'static str,
        value: u32,
        unit: &'static str,
        applied: bool,
    },
    Catalog(String),
}

impl Report {
    /// `false` only for a setter the driver did not apply.
    pub fn succeeded(&self) -> bool {
        !matches!(self, Report::Setting { applied: false, .. })
    }

    pub fn render(&self) -> String {
        match self {
            Report::Version(v) => format!("SMU firmware {} ({})", v.to_string().bold(), v.0),
            Report::CodeName(c) => format!("Code name id {}", c.to_string().bold()),
            Report::PmRefreshed => format!("{} PM table refreshed", "✓".green()),
            Report::PmLocation(loc) => render_location(loc),
            Report::PmTable(words) => render_words(words),
            Report::PmDump { location, table } => {
                format!("{}\n{}", render_location(location), render_words(table))
            }
            Report::Setting {
                command,
                value,
                unit,
                applied: true,
            } => format!("{} {} = {} {}", "✓".green(), command, value, unit),
            Report::Setting {
                command,
                value,
                unit,
                applied: false,
            } => format!(
                "{} {} = {} {} was not applied",
                "✗".red(),
                command,
                value,
                unit
            ),
            Report::Catalog(json) => json.clone(),
        }
    }
}

fn render_location(loc: &PmTableLocation) -> String {
    format!(
        "PM table version {:#010x} at {:#010x}",
        loc.version, loc.base_address
    )
}

fn render_words(words: &[i64]) -> String {
    words
        .chunks(8)
        .enumerate()
        .map(|(row, chunk)| {
            let cells: Vec<String> = chunk.iter().map(|w| format!("{w:>12}")).collect();
            format!("{:>5}: {}", (row * 8).to_string().dimmed(), cells.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Dispatch `cmd`.  `pm_words` is the size used by a bare `pm dump`.
///
/// Lock timeouts are returned as errors for every command, setters included.
pub fn execute(
    cmd: SmuCommand,
    smu: &SmuDispatcher,
    pm_words: usize,
) -> Result<Report, SmuError> {
    let report = match cmd {
        SmuCommand::Version => Report::Version(SmuVersion(smu.firmware_version()?)),
        SmuCommand::CodeName => Report::CodeName(smu.code_name()?),
        SmuCommand::PmRefresh => {
            smu.refresh_pm_table()?;
            Report::PmRefreshed
        }
        SmuCommand::PmResolve => Report::PmLocation(smu.resolve_pm_table()?),
        SmuCommand::PmRead(n) => Report::PmTable(smu.read_pm_table(n)?),
        SmuCommand::PmDump(n) => {
            smu.refresh_pm_table()?;
            let location = smu.resolve_pm_table()?;
            let table = smu.read_pm_table(n.unwrap_or(pm_words))?;
            Report::PmDump { location, table }
        }
        SmuCommand::PowerLimit(limit, mw) => Report::Setting {
            command: limit.command().name,
            value: mw,
            unit: "mW",
            applied: smu.set_power_limit(limit, mw)?,
        },
        SmuCommand::GfxClock(target, mhz) => Report::Setting {
            command: target.command().name,
            value: mhz,
            unit: "MHz",
            applied: smu.set_gfx_clock_limit(target, mhz)?,
        },
        SmuCommand::Catalog => Report::Catalog(catalog_json()),
    };
    Ok(report)
}

fn catalog_json() -> String {
    serde_json::to_string_pretty(catalog::all())
        .unwrap_or_else(|e| format!("catalog serialization failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smubus_hal::sim::{SIM_PM_TABLE_BASE, SIM_PM_TABLE_VERSION, SIM_SMU_VERSION};
    use smubus_hal::{ProcessBusLock, SimChannel};
    use std::sync::Arc;

    fn sim_dispatcher() -> (SmuDispatcher, SimChannel) {
        let sim = SimChannel::ryzen_preset();
        let smu = SmuDispatcher::new(Box::new(sim.clone()), Arc::new(ProcessBusLock::new()));
        (smu, sim)
    }

    #[test]
    fn parses_with_and_without_slash() {
        assert_eq!(parse(&["version"]), Ok(SmuCommand::Version));
        assert_eq!(parse(&["/version"]), Ok(SmuCommand::Version));
        assert_eq!(
            parse(&["/stapm", "25000"]),
            Ok(SmuCommand::PowerLimit(PowerLimit::Stapm, 25000))
        );
        assert_eq!(
            parse(&["gfx-max", "2200"]),
            Ok(SmuCommand::GfxClock(GfxClockTarget::Max, 2200))
        );
        assert_eq!(parse(&["pm", "read", "64"]), Ok(SmuCommand::PmRead(64)));
        assert_eq!(parse(&["pm", "dump"]), Ok(SmuCommand::PmDump(None)));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["stapm"]).is_err());
        assert!(parse(&["stapm", "-5"]).is_err());
        assert!(parse(&["ppt-fast", "4294967296"]).is_err());
        assert!(parse(&["pm", "read", "0"]).is_err());
        assert!(parse(&["pm"]).is_err());
        assert!(parse(&["version", "now"]).is_err());
        assert!(parse(&["reboot"]).is_err());
    }

    #[test]
    fn full_u32_range_is_accepted() {
        assert_eq!(
            parse(&["ppt-slow", "4294967295"]),
            Ok(SmuCommand::PowerLimit(PowerLimit::PptSlow, u32::MAX))
        );
    }

    #[test]
    fn version_report_uses_sim_firmware() {
        let (smu, _) = sim_dispatcher();
        let report = execute(SmuCommand::Version, &smu, 256).unwrap();
        assert_eq!(report, Report::Version(SmuVersion(SIM_SMU_VERSION as u32)));
    }

    #[test]
    fn pm_dump_refreshes_resolves_then_reads() {
        let (smu, sim) = sim_dispatcher();
        let report = execute(SmuCommand::PmDump(Some(16)), &smu, 256).unwrap();

        match report {
            Report::PmDump { location, table } => {
                assert_eq!(location.version, SIM_PM_TABLE_VERSION as u32);
                assert_eq!(location.base_address, SIM_PM_TABLE_BASE as u32);
                assert_eq!(table.len(), 16);
            }
            other => panic!("unexpected report {other:?}"),
        }

        let order: Vec<String> = sim.calls().into_iter().map(|c| c.name).collect();
        assert_eq!(
            order,
            vec![
                "ioctl_update_pm_table",
                "ioctl_resolve_pm_table",
                "ioctl_read_pm_table"
            ]
        );
    }

    #[test]
    fn bare_pm_dump_uses_configured_size() {
        let (smu, _) = sim_dispatcher();
        match execute(SmuCommand::PmDump(None), &smu, 32).unwrap() {
            Report::PmDump { table, .. } => assert_eq!(table.len(), 32),
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn unsupported_setter_reports_not_applied() {
        let (smu, _) = sim_dispatcher();
        let report = execute(SmuCommand::GfxClock(GfxClockTarget::Direct, 1800), &smu, 256).unwrap();
        assert!(!report.succeeded());
        assert!(matches!(
            report,
            Report::Setting {
                command: "ioctl_set_gfx_clk",
                applied: false,
                ..
            }
        ));
    }

    #[test]
    fn applied_setter_succeeds() {
        let (smu, sim) = sim_dispatcher();
        let report = execute(SmuCommand::PowerLimit(PowerLimit::PptFast, 30000), &smu, 256).unwrap();
        assert!(report.succeeded());
        assert_eq!(sim.calls_to("ioctl_set_ppt_fast_limit")[0].inputs, vec![30000]);
    }

    #[test]
    fn catalog_report_is_valid_json() {
        let (smu, _) = sim_dispatcher();
        let Report::Catalog(json) = execute(SmuCommand::Catalog, &smu, 256).unwrap() else {
            panic!("expected catalog report");
        };
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), catalog::all().len());
    }

    #[test]
    fn rendered_rows_hold_eight_words() {
        colored::control::set_override(false);
        let rendered = Report::PmTable((0..10).collect()).render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].trim_start().starts_with("8:"));
    }
}
