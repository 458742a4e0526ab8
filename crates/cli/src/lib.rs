pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use attendance_core::config::{ConfigOverrides, LoadOptions};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "attendance",
    about = "Attendance exception request operator CLI",
    long_about = "Apply migrations, inspect configuration, lint approval workflows, and inspect approval queues and history.",
    after_help = "Examples:\n  attendance doctor --json\n  attendance workflows lint\n  attendance pending --principal hr-lead\n  attendance history <request-id>"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load (must exist when given)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, attachment storage, DB connectivity, and schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Approval workflow maintenance")]
    Workflows {
        #[command(subcommand)]
        command: WorkflowsCommand,
    },
    #[command(about = "List pending requests a principal may act on or oversee")]
    Pending {
        #[arg(long, help = "Principal whose approval queue to list")]
        principal: String,
    },
    #[command(about = "Show the approval history of an exception request")]
    History {
        #[arg(help = "Exception request id")]
        request_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum WorkflowsCommand {
    #[command(about = "Validate stored workflows and flag fallback routing")]
    Lint,
}

impl Cli {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn execute(cli: Cli) -> ExitCode {
    let options = cli.load_options();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
        Command::Workflows { command: WorkflowsCommand::Lint } => {
            commands::workflows::lint(&options)
        }
        Command::Pending { principal } => commands::pending::run(&options, &principal),
        Command::History { request_id } => commands::history::run(&options, &request_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
