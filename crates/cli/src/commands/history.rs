use std::collections::HashMap;

use attendance_core::config::LoadOptions;
use attendance_core::domain::request::ExceptionRequestId;
use attendance_core::service::ANONYMOUS_DOCTOR_NAME;
use attendance_db::repositories::{
    RepositoryError, SqlEmployeeRepository, SqlExceptionRequestRepository,
};
use attendance_db::DbPool;
use serde::Serialize;

use crate::commands::{load_config, open_pool, runtime, CommandResult};

const COMMAND: &str = "history";

#[derive(Debug, Serialize)]
struct HistoryReport {
    request_id: String,
    employee_id: String,
    request_status: &'static str,
    current_step_order: u32,
    entries: Vec<HistoryLine>,
}

#[derive(Debug, Serialize)]
struct HistoryLine {
    step_order: u32,
    action: &'static str,
    approver_id: Option<String>,
    approver_name: String,
    notes: Option<String>,
    acted_at: String,
}

/// Operator view of a request's approval trail. Reads storage directly and
/// applies no capability checks.
pub fn run(options: &LoadOptions, request_id: &str) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool(COMMAND, &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let report = build_report(&pool, &ExceptionRequestId(request_id.to_string())).await;
        pool.close().await;

        match report {
            Ok(Some(report)) => CommandResult::success_with(COMMAND, report),
            Ok(None) => CommandResult::failure(
                COMMAND,
                "not_found",
                format!("exception request `{request_id}` not found"),
                7,
            ),
            Err(error) => CommandResult::failure(COMMAND, "persistence", error.to_string(), 6),
        }
    })
}

async fn build_report(
    pool: &DbPool,
    request_id: &ExceptionRequestId,
) -> Result<Option<HistoryReport>, RepositoryError> {
    let requests = SqlExceptionRequestRepository::new(pool.clone());
    let employees = SqlEmployeeRepository::new(pool.clone());

    let Some(request) = requests.find_by_id(request_id).await? else {
        return Ok(None);
    };

    let mut names: HashMap<String, String> = HashMap::new();
    let mut entries = Vec::new();
    for entry in requests.history(request_id).await? {
        let approver_name = match &entry.approver {
            None => ANONYMOUS_DOCTOR_NAME.to_string(),
            Some(approver) => {
                if !names.contains_key(&approver.0) {
                    let name = employees
                        .find_by_id(approver)
                        .await?
                        .map(|employee| employee.name)
                        .unwrap_or_else(|| approver.0.clone());
                    names.insert(approver.0.clone(), name);
                }
                names.get(&approver.0).cloned().unwrap_or_default()
            }
        };
        entries.push(HistoryLine {
            step_order: entry.step_order,
            action: entry.action.as_str(),
            approver_id: entry.approver.map(|approver| approver.0),
            approver_name,
            notes: entry.notes,
            acted_at: entry.acted_at.to_rfc3339(),
        });
    }

    Ok(Some(HistoryReport {
        request_id: request.id.0,
        employee_id: request.employee_id.0,
        request_status: request.status.as_str(),
        current_step_order: request.current_step_order,
        entries,
    }))
}
