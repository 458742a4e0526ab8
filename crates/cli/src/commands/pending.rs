use std::sync::Arc;

use attendance_core::config::{AppConfig, LoadOptions};
use attendance_core::domain::request::ExceptionRequest;
use attendance_core::{
    CallerContext, ExceptionRequestService, PrincipalId, ServiceDependencies, ServiceSettings,
    SystemClock, TracingAuditSink,
};
use attendance_db::repositories::{
    SqlCapabilityRepository, SqlEmployeeRepository, SqlExceptionRequestRepository,
    SqlScheduleRepository, SqlWorkflowRepository,
};
use attendance_db::{AttachmentFiles, DbPool, SqlAttachmentStore};
use serde::Serialize;

use crate::commands::{load_config, open_pool, runtime, CommandResult};

const COMMAND: &str = "pending";

#[derive(Debug, Serialize)]
struct PendingReport {
    principal_id: String,
    count: usize,
    requests: Vec<PendingRequest>,
}

#[derive(Debug, Serialize)]
struct PendingRequest {
    id: String,
    employee_id: String,
    request_type: &'static str,
    exception_date: String,
    current_step_order: u32,
    created_at: String,
}

impl From<&ExceptionRequest> for PendingRequest {
    fn from(request: &ExceptionRequest) -> Self {
        Self {
            id: request.id.0.clone(),
            employee_id: request.employee_id.0.clone(),
            request_type: request.request_type.as_str(),
            exception_date: request.exception_date.to_string(),
            current_step_order: request.current_step_order,
            created_at: request.created_at.to_rfc3339(),
        }
    }
}

/// The approval queue of `principal`, resolved the same way the service
/// resolves it for an interactive caller.
pub fn run(options: &LoadOptions, principal: &str) -> CommandResult {
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
        let service = sql_service(pool.clone(), &config);
        let caller = CallerContext::with_generated_correlation(PrincipalId(principal.to_string()));
        let queue = service.list_actionable(&caller).await;
        pool.close().await;

        match queue {
            Ok(requests) => CommandResult::success_with(
                COMMAND,
                PendingReport {
                    principal_id: principal.to_string(),
                    count: requests.len(),
                    requests: requests.iter().map(PendingRequest::from).collect(),
                },
            ),
            Err(error) => CommandResult::failure(COMMAND, error.class(), error.to_string(), 6),
        }
    })
}

pub(crate) fn sql_service(pool: DbPool, config: &AppConfig) -> ExceptionRequestService {
    let dependencies = ServiceDependencies {
        employees: Arc::new(SqlEmployeeRepository::new(pool.clone())),
        capabilities: Arc::new(SqlCapabilityRepository::new(pool.clone())),
        workflows: Arc::new(SqlWorkflowRepository::new(pool.clone())),
        schedules: Arc::new(SqlScheduleRepository::new(pool.clone())),
        requests: Arc::new(SqlExceptionRequestRepository::new(pool.clone())),
        attachments: Arc::new(SqlAttachmentStore::new(
            pool,
            AttachmentFiles::new(config.attachments.root.clone()),
        )),
        clock: Arc::new(SystemClock),
        audit: Arc::new(TracingAuditSink),
    };
    ExceptionRequestService::new(dependencies, ServiceSettings::from(config))
}
