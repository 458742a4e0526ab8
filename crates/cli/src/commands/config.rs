use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use attendance_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
    overridden: bool,
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let overrides = &options.overrides;

    let fields = [
        Field {
            key_path: "database.url",
            env_keys: &["ATTENDANCE_DATABASE_URL"],
            value: config.database.url.clone(),
            overridden: overrides.database_url.is_some(),
        },
        Field {
            key_path: "database.max_connections",
            env_keys: &["ATTENDANCE_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
            overridden: false,
        },
        Field {
            key_path: "database.timeout_secs",
            env_keys: &["ATTENDANCE_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
            overridden: false,
        },
        Field {
            key_path: "logging.level",
            env_keys: &["ATTENDANCE_LOGGING_LEVEL", "ATTENDANCE_LOG_LEVEL"],
            value: config.logging.level.clone(),
            overridden: overrides.log_level.is_some(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["ATTENDANCE_LOGGING_FORMAT", "ATTENDANCE_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
            overridden: false,
        },
        Field {
            key_path: "attachments.root",
            env_keys: &["ATTENDANCE_ATTACHMENTS_ROOT"],
            value: config.attachments.root.display().to_string(),
            overridden: overrides.attachments_root.is_some(),
        },
        Field {
            key_path: "attachments.max_bytes",
            env_keys: &["ATTENDANCE_ATTACHMENTS_MAX_BYTES"],
            value: config.attachments.max_bytes.to_string(),
            overridden: false,
        },
        Field {
            key_path: "workflow.routing",
            env_keys: &["ATTENDANCE_WORKFLOW_ROUTING"],
            value: config.workflow.routing.as_str().to_string(),
            overridden: overrides.routing.is_some(),
        },
    ];

    let mut lines = vec![
        "effective config (source precedence: flag > env > file > default):".to_string()
    ];
    for field in &fields {
        let source =
            field_source(field, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key_path, field.value));
    }
    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    [PathBuf::from("attendance.toml"), PathBuf::from("config/attendance.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if field.overridden {
        return "flag".to_string();
    }

    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
