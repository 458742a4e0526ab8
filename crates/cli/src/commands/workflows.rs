use attendance_core::config::LoadOptions;
use attendance_core::domain::request::RequestType;
use attendance_core::domain::workflow::{WorkflowDefinition, FALLBACK_STEP_ORDER};
use attendance_db::repositories::SqlWorkflowRepository;
use serde::Serialize;

use crate::commands::{load_config, open_pool, runtime, CommandResult};

const COMMAND: &str = "workflows lint";

#[derive(Debug, Serialize)]
struct LintReport {
    workflows: Vec<WorkflowLint>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WorkflowLint {
    id: String,
    name: String,
    active: bool,
    steps: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Validates every stored workflow and flags routing that only works through
/// the step-1 fallback.
pub fn lint(options: &LoadOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let loaded = runtime.block_on(async {
        let pool = open_pool(COMMAND, &config).await?;
        let workflows = SqlWorkflowRepository::new(pool.clone()).list_all().await;
        pool.close().await;
        workflows.map_err(|error| {
            CommandResult::failure(COMMAND, "persistence", error.to_string(), 6)
        })
    });
    let workflows = match loaded {
        Ok(workflows) => workflows,
        Err(failure) => return failure,
    };

    let report = LintReport { workflows: workflows.iter().map(lint_workflow).collect() };
    if report.workflows.iter().any(|workflow| !workflow.errors.is_empty()) {
        CommandResult::with_status(COMMAND, "error", 7, report)
    } else {
        CommandResult::success_with(COMMAND, report)
    }
}

pub(crate) fn lint_workflow(workflow: &WorkflowDefinition) -> WorkflowLint {
    let errors = match workflow.validate() {
        Ok(()) => Vec::new(),
        Err(error) => vec![error.to_string()],
    };

    let mut warnings = Vec::new();
    if workflow.steps.is_empty() {
        warnings.push("workflow has no steps; requests cannot be approved".to_string());
    } else {
        for request_type in [RequestType::Sick, RequestType::Personal] {
            let initial = workflow.resolve_initial_step(request_type);
            if let Some(fallback) = initial.fallback {
                warnings.push(fallback.describe().to_string());
                if workflow.step(FALLBACK_STEP_ORDER).is_none() {
                    warnings.push(format!(
                        "step {FALLBACK_STEP_ORDER} is not defined; {} requests would be stuck",
                        request_type.as_str()
                    ));
                }
            }
        }
    }

    WorkflowLint {
        id: workflow.id.0.clone(),
        name: workflow.name.clone(),
        active: workflow.active,
        steps: workflow.steps.len(),
        errors,
        warnings,
    }
}
