//! `smuctl` – command line front end for the SMU dispatcher
//!
//! 1. Loads `~/.smubus/config.toml` (defaults plus `SMUBUS_*` overrides when
//!    the file is absent).
//! 2. Opens the configured bus lock and driver module.
//! 3. With arguments, runs a single command and exits:
//!    `0` success, `1` error, `2` setting not applied.
//!    Without arguments, drops into the interactive REPL.
//! 4. Closes the driver channel exactly once before exiting.

mod commands;
mod config;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use smubus_hal::{ChannelLoader, SimChannel, SimLoader};
use smubus_kernel::SmuDispatcher;

use config::{Config, DriverBackend};

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "warn").  SMUBUS_LOG_FORMAT=json
    // switches to newline-delimited JSON.  Logs go to stderr so command
    // output on stdout stays clean.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    if std::env::var("SMUBUS_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("help" | "--help" | "-h")) {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let cfg = match config::load_or_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let smu = match open_dispatcher(&cfg) {
        Ok(smu) => smu,
        Err(e) => {
            eprintln!("{}: {}", "Startup failed".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let code = if args.is_empty() {
        run_interactive(&smu, &cfg);
        ExitCode::SUCCESS
    } else {
        run_once(&args, &smu, &cfg)
    };

    smu.close();
    code
}

fn open_dispatcher(cfg: &Config) -> Result<SmuDispatcher, String> {
    let lock = cfg.open_lock()?;
    let loader: Box<dyn ChannelLoader> = match cfg.backend {
        DriverBackend::Sim => Box::new(SimLoader::new(SimChannel::ryzen_preset())),
    };
    SmuDispatcher::open(
        loader.as_ref(),
        &cfg.driver_module,
        lock,
        cfg.dispatcher_config(),
    )
    .map_err(|e| e.to_string())
}

fn run_once(args: &[String], smu: &SmuDispatcher, cfg: &Config) -> ExitCode {
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    let cmd = match commands::parse(&words) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            eprintln!("  Run `{}` for usage.", "smuctl help".bold());
            return ExitCode::FAILURE;
        }
    };
    match commands::execute(cmd, smu, cfg.pm_table_words) {
        Ok(report) => {
            println!("{}", report.render());
            if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "SMU error".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn run_interactive(smu: &SmuDispatcher, cfg: &Config) {
    print_banner(cfg);

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!(
        "  Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );
    repl::run(smu, cfg, shutdown);
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(cfg: &Config) {
    println!();
    println!(
        "  {} {}",
        "smuctl".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  AMD SMU command dispatcher");
    println!();
    println!(
        "  Driver  : {} ({} backend)",
        cfg.driver_module.bold(),
        cfg.backend
    );
    println!(
        "  Bus lock: {} {} (timeout {} ms)",
        cfg.lock_backend,
        cfg.lock_path.dimmed(),
        cfg.lock_timeout_ms
    );
    println!();
}

fn print_usage() {
    println!("{}", "Usage: smuctl [command]".bold());
    println!();
    println!("  version | codename | catalog");
    println!("  pm refresh | pm resolve | pm read <N> | pm dump [N]");
    println!("  stapm <mW> | ppt-fast <mW> | ppt-slow <mW>");
    println!("  gfx <MHz> | gfx-min <MHz> | gfx-max <MHz>");
    println!();
    println!("Without a command, smuctl starts an interactive shell.");
    println!(
        "Configuration: {}",
        config::config_path().display().to_string().bold()
    );
}
