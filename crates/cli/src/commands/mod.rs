pub mod config;
pub mod doctor;
pub mod history;
pub mod migrate;
pub mod pending;
pub mod workflows;

use attendance_core::config::{AppConfig, LoadOptions};
use attendance_db::{connect_with_config, DbPool};
use serde::Serialize;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

#[derive(Debug, Serialize)]
struct CommandPayload<'a, T: Serialize> {
    command: &'a str,
    status: &'a str,
    #[serde(flatten)]
    data: T,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_outcome(payload) }
    }

    /// Successful result whose body fields sit next to `command` and `status`.
    pub fn success_with<T: Serialize>(command: &str, data: T) -> Self {
        Self::with_status(command, "ok", 0, data)
    }

    pub fn with_status<T: Serialize>(command: &str, status: &str, exit_code: u8, data: T) -> Self {
        let payload = CommandPayload { command, status, data };
        match serde_json::to_string(&payload) {
            Ok(output) => Self { exit_code, output },
            Err(error) => Self::failure(command, "serialization", error.to_string(), 1),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_outcome(payload) }
    }
}

fn serialize_outcome(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(
    command: &str,
    options: &LoadOptions,
) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options.clone()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

pub(crate) async fn open_pool(command: &str, config: &AppConfig) -> Result<DbPool, CommandResult> {
    connect_with_config(&config.database)
        .await
        .map_err(|error| CommandResult::failure(command, "db_connectivity", error.to_string(), 4))
}
