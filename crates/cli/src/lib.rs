pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "atlas",
    about = "Atlas catalog assistant CLI",
    long_about = "Execute catalog plans, inspect effective configuration, and check provider readiness.",
    after_help = "Examples:\n  atlas run --plan plan.json --offline\n  atlas config\n  atlas doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Execute an execution plan from a JSON file and print the outcome")]
    Run {
        #[arg(long, help = "Path to a plan file, shaped as {\"plan\": [...]}")]
        plan: PathBuf,
        #[arg(long, help = "Use a deterministic offline provider instead of configured ones")]
        offline: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, provider readiness, and graph store availability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { plan, offline } => commands::run::run(&plan, offline),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
