//! REPL – interactive shell over a single [`SmuDispatcher`].
//!
//! Every SMU command accepted on the command line is also a slash-command
//! here (`/version`, `/stapm 25000`, `/pm dump`, ...).  In addition:
//!   /help         – show the command list
//!   /settings     – edit `~/.smubus/config.toml`
//!   /quit | /exit – close the driver channel and exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use smubus_kernel::SmuDispatcher;

use crate::commands;
use crate::config::{self, Config, LockBackend};

/// Run the REPL until `/quit`, end of input, or `shutdown` is set.
pub fn run(smu: &SmuDispatcher, cfg: &Config, shutdown: Arc<AtomicBool>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start line editor".red(), e);
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match rl.readline("smuctl> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(cmd);

        match cmd {
            "/help" => cmd_help(),
            "/settings" => cmd_settings(&mut rl),
            "/quit" | "/exit" => {
                println!("{}", "Goodbye.".green());
                break;
            }
            other if other.starts_with('/') => {
                let words: Vec<&str> = other.split_whitespace().collect();
                dispatch(&words, smu, cfg);
            }
            other => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

fn dispatch(words: &[&str], smu: &SmuDispatcher, cfg: &Config) {
    let cmd = match commands::parse(words) {
        Ok(cmd) => cmd,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };
    match commands::execute(cmd, smu, cfg.pm_table_words) {
        Ok(report) => println!("{}", report.render()),
        Err(e) => println!("{}: {}", "SMU error".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "smuctl Commands".bold().underline());
    println!("  {}               – SMU firmware version", "/version".bold().cyan());
    println!("  {}              – processor code-name id", "/codename".bold().cyan());
    println!("  {}            – ask the SMU to refresh the PM table", "/pm refresh".bold().cyan());
    println!("  {}            – PM table version and base address", "/pm resolve".bold().cyan());
    println!("  {}         – read N raw PM table words", "/pm read <N>".bold().cyan());
    println!("  {}          – refresh, resolve and read", "/pm dump [N]".bold().cyan());
    println!("  {}           – STAPM limit", "/stapm <mW>".bold().cyan());
    println!("  {}        – PPT fast limit", "/ppt-fast <mW>".bold().cyan());
    println!("  {}        – PPT slow limit", "/ppt-slow <mW>".bold().cyan());
    println!("  {}            – direct GFX clock", "/gfx <MHz>".bold().cyan());
    println!("  {} – GFX clock bounds", "/gfx-min|/gfx-max <MHz>".bold().cyan());
    println!("  {}               – driver command table as JSON", "/catalog".bold().cyan());
    println!("  {}              – edit ~/.smubus/config.toml", "/settings".bold().cyan());
    println!("  {}           – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_settings(rl: &mut DefaultEditor) {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    println!("  Press Enter to keep the current value.");

    cfg.lock_timeout_ms = prompt_parsed(
        rl,
        &format!("  Lock timeout (ms) [{}]: ", cfg.lock_timeout_ms),
        cfg.lock_timeout_ms,
    );

    let backend = prompt_str(
        rl,
        &format!("  Lock backend (process / file) [{}]: ", cfg.lock_backend),
        &cfg.lock_backend.to_string(),
    );
    cfg.lock_backend = match backend.to_lowercase().as_str() {
        "process" => LockBackend::Process,
        _ => LockBackend::File,
    };

    cfg.lock_path = prompt_str(rl, &format!("  Lock path [{}]: ", cfg.lock_path), &cfg.lock_path);

    cfg.lock_code_name = prompt_parsed(
        rl,
        &format!("  Lock code-name reads (true / false) [{}]: ", cfg.lock_code_name),
        cfg.lock_code_name,
    );

    cfg.driver_module = prompt_str(
        rl,
        &format!("  Driver module [{}]: ", cfg.driver_module),
        &cfg.driver_module,
    );

    cfg.pm_table_words = prompt_parsed(
        rl,
        &format!("  PM table words [{}]: ", cfg.pm_table_words),
        cfg.pm_table_words,
    );

    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Saved to {}. Restart smuctl to apply.",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for a value of type `T`.  Keeps `default` on Enter or bad input.
fn prompt_parsed<T>(rl: &mut DefaultEditor, msg: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    let raw = prompt_str(rl, msg, &default.to_string());
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not valid here, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
fn prompt_str(rl: &mut DefaultEditor, msg: &str, default: &str) -> String {
    match rl.readline(msg) {
        Ok(line) => {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => default.to_string(),
    }
}
