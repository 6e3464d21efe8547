pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "foms",
    about = "Furniture order management operator CLI",
    long_about = "Operate the order workflow database: migrations, readiness checks, config inspection, \
                  SLA sweeps, and user provisioning.",
    after_help = "Examples:\n  foms doctor --json\n  foms migrate\n  foms sla-sweep\n  \
                  foms user add --name \"Kim\" --role manager"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Create time-based follow-up tasks for every open order")]
    SlaSweep,
    #[command(subcommand, about = "Manage workflow users")]
    User(UserCommand),
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, API token policy, DB connectivity, and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    #[command(about = "Create a user with a role and optional team")]
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, help = "admin | manager | staff | viewer")]
        role: String,
        #[arg(long, help = "cs | sales | measure | drawing | production | construction | as")]
        team: Option<String>,
        #[arg(long, help = "Create the user as inactive")]
        inactive: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::SlaSweep => commands::sla_sweep::run(),
        Command::User(UserCommand::Add { name, role, team, inactive }) => {
            commands::user::add(&name, &role, team.as_deref(), !inactive)
        }
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
