pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::CommandResult;

/// Operator tooling for a Cadence deployment. Every command reads the same
/// `cadence.toml` and `CADENCE_*` environment as the runtime.
#[derive(Debug, Parser)]
#[command(
    name = "cadence",
    version,
    about = "Cadence operator CLI",
    after_help = "Examples:\n  cadence doctor --json\n  cadence migrate\n  cadence analyze --user shopper-1 --at 2026-06-01T00:00:00Z"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bring the SQLite schema up to date.
    Migrate,
    /// Print effective settings and where each one came from; secrets are redacted.
    Config,
    /// Readiness report: config, analytics forwarding, database, schema version.
    Doctor {
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Usual basket, due reorders, and bundles for one user, computed from stored purchases.
    Analyze {
        #[arg(long, value_name = "USER_ID")]
        user: String,
        /// Evaluate as of this RFC 3339 instant instead of now.
        #[arg(long, value_name = "TIMESTAMP")]
        at: Option<String>,
    },
}

impl Command {
    fn execute(self) -> CommandResult {
        match self {
            Self::Migrate => commands::migrate::run(),
            Self::Config => CommandResult { exit_code: 0, output: commands::config::run() },
            Self::Doctor { json } => commands::doctor::run(json),
            Self::Analyze { user, at } => commands::analyze::run(&user, at.as_deref()),
        }
    }
}

pub fn run() -> ExitCode {
    let result = Cli::parse().command.execute();
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
