use std::process::ExitCode;

use anyhow::Result;
use attendance_cli::Cli;
use attendance_core::config::{AppConfig, LogFormat};
use clap::Parser;
use tracing::Level;

fn init_logging(config: &AppConfig) -> Result<()> {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(anyhow::Error::msg)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Commands report configuration errors themselves; logging just stays off.
    if let Ok(config) = AppConfig::load(cli.load_options()) {
        init_logging(&config)?;
    }

    Ok(attendance_cli::execute(cli))
}
