//! `dispenser`: command-line front end for the medication dispenser core.

mod app;
mod cli;
mod error_fmt;

use std::path::Path;

use clap::Parser;
use dispenser_config::Logging;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            println!("{}", humanize(&err));
        }
        tracing::error!(error = %format!("{err:#}"), "command failed");
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = app::load_config(cli.config.as_deref())?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    tracing::debug!(kind = ?cfg.channel.kind, "configuration loaded");

    match cli.cmd {
        Commands::Run {
            sim_start,
            max_ticks,
        } => {
            let schedules = app::load_schedules(&cfg, cli.schedules.as_deref())?;
            let (tx, rx) = crossbeam_channel::bounded::<()>(1);
            ctrlc::set_handler(move || {
                let _ = tx.try_send(());
            })
            .wrap_err("installing Ctrl-C handler")?;
            app::cmd_run(&cfg, schedules, sim_start, max_ticks, cli.json, &rx)?;
        }
        Commands::Dispense {
            dispenser,
            size,
            remote,
        } => app::cmd_dispense(&cfg, dispenser, size, remote, cli.json)?,
        Commands::SelfCheck => app::cmd_self_check(&cfg, cli.json)?,
        Commands::RecoverBus => app::cmd_recover_bus(&cfg, cli.json)?,
        Commands::Schedules { at } => {
            let schedules = app::load_schedules(&cfg, cli.schedules.as_deref())?;
            app::cmd_schedules(&cfg, schedules, at, cli.json)?;
        }
    }
    Ok(())
}

/// Console layer on stderr (pretty or JSON), plus an optional JSON file
/// layer from `[logging]`. `RUST_LOG` wins over `--log-level`, which wins
/// over `logging.level`.
fn init_tracing(json: bool, cli_level: Option<&str>, logging: &Logging) -> eyre::Result<()> {
    let level = cli_level
        .or(logging.level.as_deref())
        .unwrap_or("info")
        .to_string();
    let filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("creating log directory {}", dir.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dispenser.log".to_string());
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console.with_filter(filter()))
        .with(file)
        .try_init()
        .wrap_err("installing tracing subscriber")?;
    Ok(())
}
