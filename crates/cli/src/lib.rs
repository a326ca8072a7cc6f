pub mod commands;

use clap::{Parser, Subcommand};
use leadflow_core::config::{AppConfig, LoadOptions, LogFormat};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "leadflow",
    about = "Leadflow operator CLI",
    long_about = "Operate the Leadflow advisor rotation: migrations, demo data, backlog draining, \
                  and readiness inspection.",
    after_help = "Examples:\n  leadflow migrate\n  leadflow assign-pending --limit 50\n  \
                  leadflow doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and create the rotation state")]
    Migrate,
    #[command(about = "Load the deterministic demo advisors and pending leads")]
    Seed,
    #[command(about = "Assign pending leads oldest first using the advisor rotation")]
    AssignPending {
        #[arg(long, help = "Maximum number of pending leads to drain (defaults to config)")]
        limit: Option<u32>,
    },
    #[command(about = "Show rotation state, pending backlog, and per-advisor workload")]
    Status,
    #[command(about = "Validate config, database connectivity, schema, and rotation readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::AssignPending { limit } => commands::assign_pending::run(limit),
        Command::Status => commands::status::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so the JSON payload on stdout stays parseable. A broken
/// config falls back to defaults here; the command itself reports the error.
fn init_logging() {
    let logging = AppConfig::load(LoadOptions::default()).unwrap_or_default().logging;
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref(), &logging.level);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// `RUST_LOG` directives win over the configured level when they parse.
fn log_filter(rust_log: Option<&str>, configured_level: &str) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| {
            EnvFilter::try_new(configured_level).unwrap_or_else(|_| EnvFilter::new("info"))
        })
}

#[cfg(test)]
mod tests {
    use super::log_filter;

    #[test]
    fn rust_log_overrides_configured_level() {
        let filter = log_filter(Some("leadflow_db=debug"), "warn");

        assert_eq!(filter.to_string(), "leadflow_db=debug");
    }

    #[test]
    fn configured_level_applies_without_rust_log() {
        assert_eq!(log_filter(None, "warn").to_string(), "warn");
        assert_eq!(log_filter(Some("  "), "error").to_string(), "error");
    }
}
