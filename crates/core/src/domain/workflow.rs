use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::employee::EmployeeId;
use crate::domain::request::RequestType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowStepId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverCategory {
    Doctor,
    Manager,
    HrManager,
}

impl ApproverCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doctor => "doctor",
            Self::Manager => "manager",
            Self::HrManager => "hr_manager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "doctor" => Some(Self::Doctor),
            "manager" => Some(Self::Manager),
            "hr_manager" | "hrmanager" | "hr" => Some(Self::HrManager),
            _ => None,
        }
    }

    /// Every category except Doctor is bound to one designated employee.
    pub fn requires_designated_approver(&self) -> bool {
        !matches!(self, Self::Doctor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: WorkflowStepId,
    pub step_order: u32,
    pub category: ApproverCategory,
    pub approver: Option<EmployeeId>,
}

impl WorkflowStep {
    /// Doctor steps never carry a designated approver; one passed in is dropped.
    pub fn new(
        id: WorkflowStepId,
        step_order: u32,
        category: ApproverCategory,
        approver: Option<EmployeeId>,
    ) -> Self {
        let approver = if category.requires_designated_approver() { approver } else { None };
        Self { id, step_order, category, approver }
    }

    pub fn is_doctor(&self) -> bool {
        self.category == ApproverCategory::Doctor
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub steps: Vec<WorkflowStep>,
}

/// Misconfiguration detected while picking the first step of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialStepFallback {
    NoDoctorStep,
    NoNonDoctorStep,
}

impl InitialStepFallback {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::NoDoctorStep => "sick request routed to step 1: workflow has no doctor step",
            Self::NoNonDoctorStep => {
                "request routed to step 1: workflow has no manager or hr step"
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialStep {
    pub step_order: u32,
    pub fallback: Option<InitialStepFallback>,
}

pub const FALLBACK_STEP_ORDER: u32 = 1;

/// Sick requests start at the first Doctor step; every other request type skips
/// medical review and starts at the first non-Doctor step. A workflow without a
/// matching step falls back to step 1.
pub fn resolve_initial_step(steps: &[WorkflowStep], request_type: RequestType) -> InitialStep {
    let wants_doctor = request_type.requires_medical_review();
    let matching = ordered(steps).into_iter().find(|step| step.is_doctor() == wants_doctor);

    match matching {
        Some(step) => InitialStep { step_order: step.step_order, fallback: None },
        None => InitialStep {
            step_order: FALLBACK_STEP_ORDER,
            fallback: Some(if wants_doctor {
                InitialStepFallback::NoDoctorStep
            } else {
                InitialStepFallback::NoNonDoctorStep
            }),
        },
    }
}

/// Smallest step order strictly greater than `current`; gaps are allowed.
pub fn next_step(steps: &[WorkflowStep], current: u32) -> Option<&WorkflowStep> {
    steps.iter().filter(|step| step.step_order > current).min_by_key(|step| step.step_order)
}

pub fn step_at(steps: &[WorkflowStep], step_order: u32) -> Option<&WorkflowStep> {
    steps.iter().find(|step| step.step_order == step_order)
}

fn ordered(steps: &[WorkflowStep]) -> Vec<&WorkflowStep> {
    let mut sorted: Vec<&WorkflowStep> = steps.iter().collect();
    sorted.sort_by_key(|step| step.step_order);
    sorted
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,
    #[error("duplicate step orders found: {}", join_orders(.0))]
    DuplicateStepOrders(Vec<u32>),
    #[error("step order must be a positive integer (found {0})")]
    NonPositiveStepOrder(u32),
    #[error("approver employee is required for step {step_order} ({category:?})")]
    MissingApprover { step_order: u32, category: ApproverCategory },
}

fn join_orders(orders: &[u32]) -> String {
    orders.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}

impl WorkflowDefinition {
    pub fn ordered_steps(&self) -> Vec<&WorkflowStep> {
        ordered(&self.steps)
    }

    pub fn step(&self, step_order: u32) -> Option<&WorkflowStep> {
        step_at(&self.steps, step_order)
    }

    pub fn resolve_initial_step(&self, request_type: RequestType) -> InitialStep {
        resolve_initial_step(&self.steps, request_type)
    }

    pub fn next_step(&self, current: u32) -> Option<&WorkflowStep> {
        next_step(&self.steps, current)
    }

    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowValidationError::EmptyName);
        }

        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for step in &self.steps {
            *counts.entry(step.step_order).or_default() += 1;
        }
        let duplicates: Vec<u32> =
            counts.into_iter().filter(|(_, count)| *count > 1).map(|(order, _)| order).collect();
        if !duplicates.is_empty() {
            return Err(WorkflowValidationError::DuplicateStepOrders(duplicates));
        }

        for step in self.ordered_steps() {
            if step.step_order == 0 {
                return Err(WorkflowValidationError::NonPositiveStepOrder(step.step_order));
            }
            if step.category.requires_designated_approver() && step.approver.is_none() {
                return Err(WorkflowValidationError::MissingApprover {
                    step_order: step.step_order,
                    category: step.category,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        next_step, resolve_initial_step, ApproverCategory, InitialStepFallback, WorkflowDefinition,
        WorkflowId, WorkflowStep, WorkflowStepId, WorkflowValidationError,
    };
    use crate::domain::employee::EmployeeId;
    use crate::domain::request::RequestType;

    fn step(order: u32, category: ApproverCategory, approver: Option<&str>) -> WorkflowStep {
        WorkflowStep::new(
            WorkflowStepId(format!("step-{order}")),
            order,
            category,
            approver.map(|id| EmployeeId(id.to_string())),
        )
    }

    fn doctor_manager_hr() -> Vec<WorkflowStep> {
        vec![
            step(1, ApproverCategory::Doctor, None),
            step(2, ApproverCategory::Manager, Some("M1")),
            step(3, ApproverCategory::HrManager, Some("H1")),
        ]
    }

    #[test]
    fn sick_requests_start_at_first_doctor_step() {
        let initial = resolve_initial_step(&doctor_manager_hr(), RequestType::Sick);
        assert_eq!(initial.step_order, 1);
        assert!(initial.fallback.is_none());
    }

    #[test]
    fn other_requests_skip_doctor_steps() {
        let initial = resolve_initial_step(&doctor_manager_hr(), RequestType::RemoteWork);
        assert_eq!(initial.step_order, 2);
    }

    #[test]
    fn resolution_ignores_declaration_order() {
        let steps = vec![
            step(30, ApproverCategory::HrManager, Some("H1")),
            step(20, ApproverCategory::Doctor, None),
            step(10, ApproverCategory::Manager, Some("M1")),
        ];

        assert_eq!(resolve_initial_step(&steps, RequestType::Sick).step_order, 20);
        assert_eq!(resolve_initial_step(&steps, RequestType::Other).step_order, 10);
    }

    #[test]
    fn sick_request_without_doctor_step_falls_back_to_step_one() {
        let steps = vec![
            step(4, ApproverCategory::Manager, Some("M1")),
            step(7, ApproverCategory::HrManager, Some("H1")),
        ];

        let initial = resolve_initial_step(&steps, RequestType::Sick);
        assert_eq!(initial.step_order, 1);
        assert_eq!(initial.fallback, Some(InitialStepFallback::NoDoctorStep));
    }

    #[test]
    fn all_doctor_workflow_falls_back_for_non_sick_requests() {
        let steps =
            vec![step(1, ApproverCategory::Doctor, None), step(2, ApproverCategory::Doctor, None)];

        let initial = resolve_initial_step(&steps, RequestType::Personal);
        assert_eq!(initial.step_order, 1);
        assert_eq!(initial.fallback, Some(InitialStepFallback::NoNonDoctorStep));
    }

    #[test]
    fn empty_workflow_falls_back_for_every_request_type() {
        assert_eq!(resolve_initial_step(&[], RequestType::Sick).step_order, 1);
        assert_eq!(resolve_initial_step(&[], RequestType::Other).step_order, 1);
    }

    #[test]
    fn next_step_tolerates_gaps() {
        let steps = vec![
            step(5, ApproverCategory::Doctor, None),
            step(10, ApproverCategory::Manager, Some("M1")),
            step(40, ApproverCategory::HrManager, Some("H1")),
        ];

        assert_eq!(next_step(&steps, 5).map(|s| s.step_order), Some(10));
        assert_eq!(next_step(&steps, 10).map(|s| s.step_order), Some(40));
        assert_eq!(next_step(&steps, 11).map(|s| s.step_order), Some(40));
        assert!(next_step(&steps, 40).is_none());
    }

    #[test]
    fn doctor_steps_drop_designated_approver() {
        let doctor = step(1, ApproverCategory::Doctor, Some("E-9"));
        assert!(doctor.approver.is_none());
    }

    fn workflow(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId("WF-1".to_string()),
            name: "Standard".to_string(),
            description: None,
            active: true,
            steps,
        }
    }

    #[test]
    fn validation_accepts_well_formed_workflow() {
        assert_eq!(workflow(doctor_manager_hr()).validate(), Ok(()));
    }

    #[test]
    fn validation_reports_duplicate_step_orders() {
        let error = workflow(vec![
            step(1, ApproverCategory::Manager, Some("M1")),
            step(1, ApproverCategory::HrManager, Some("H1")),
        ])
        .validate()
        .expect_err("duplicate orders");

        assert_eq!(error, WorkflowValidationError::DuplicateStepOrders(vec![1]));
        assert_eq!(error.to_string(), "duplicate step orders found: 1");
    }

    #[test]
    fn validation_requires_approver_for_non_doctor_steps() {
        let error = workflow(vec![step(2, ApproverCategory::Manager, None)])
            .validate()
            .expect_err("missing approver");

        assert_eq!(
            error,
            WorkflowValidationError::MissingApprover {
                step_order: 2,
                category: ApproverCategory::Manager,
            }
        );
    }

    #[test]
    fn validation_rejects_zero_step_order() {
        let error = workflow(vec![step(0, ApproverCategory::Doctor, None)])
            .validate()
            .expect_err("zero order");
        assert_eq!(error, WorkflowValidationError::NonPositiveStepOrder(0));
    }
}
