use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::employee::EmployeeId;
use crate::domain::history::{ApprovalAction, ApprovalHistoryEntry, ApprovalHistoryId};
use crate::domain::workflow::{self, InitialStep, WorkflowDefinition, WorkflowId, WorkflowStep};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExceptionRequestId(pub String);

impl ExceptionRequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Sick,
    RemoteWork,
    Personal,
    Other,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sick => "sick",
            Self::RemoteWork => "remote_work",
            Self::Personal => "personal",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sick" => Some(Self::Sick),
            "remote_work" | "remote" => Some(Self::RemoteWork),
            "personal" => Some(Self::Personal),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn requires_medical_review(&self) -> bool {
        matches!(self, Self::Sick)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExceptionRequest {
    pub exception_date: NaiveDate,
    pub request_type: RequestType,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRequest {
    pub id: ExceptionRequestId,
    pub employee_id: EmployeeId,
    pub exception_date: NaiveDate,
    pub request_type: RequestType,
    pub reason: String,
    pub status: RequestStatus,
    pub current_step_order: u32,
    pub workflow_id: WorkflowId,
    /// Copy of the workflow's steps taken at creation; `None` when routing
    /// follows the live workflow definition.
    pub step_snapshot: Option<Vec<WorkflowStep>>,
    /// Bumped on every transition; persisted with compare-and-swap.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a recorded action did to the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestTransition {
    Advanced { from_step: u32, to_step: u32 },
    FinallyApproved { at_step: u32 },
    Rejected { at_step: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub entry: ApprovalHistoryEntry,
    pub transition: RequestTransition,
}

impl ExceptionRequest {
    /// Opens a pending request at the workflow's initial step for the request type.
    pub fn open(
        employee_id: EmployeeId,
        input: NewExceptionRequest,
        workflow: &WorkflowDefinition,
        snapshot_steps: bool,
        now: DateTime<Utc>,
    ) -> (Self, InitialStep) {
        let initial = workflow.resolve_initial_step(input.request_type);
        let request = Self {
            id: ExceptionRequestId::generate(),
            employee_id,
            exception_date: input.exception_date,
            request_type: input.request_type,
            reason: input.reason,
            status: RequestStatus::Pending,
            current_step_order: initial.step_order,
            workflow_id: workflow.id.clone(),
            step_snapshot: snapshot_steps.then(|| workflow.steps.clone()),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        (request, initial)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn ensure_pending(&self) -> Result<(), DomainError> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(DomainError::RequestNotPending { status: self.status })
        }
    }

    /// Applies an approve/reject decision taken at `step`.
    ///
    /// `steps` is the route the request is resolved against. Rejection is final
    /// and leaves `current_step_order` untouched; approval advances to the next
    /// defined step or, when none remains, finally approves the request.
    pub fn record_action(
        &mut self,
        steps: &[WorkflowStep],
        step: &WorkflowStep,
        action: ApprovalAction,
        approver: Option<EmployeeId>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, DomainError> {
        self.ensure_pending()?;
        if step.step_order != self.current_step_order {
            return Err(DomainError::StaleStep {
                expected: self.current_step_order,
                actual: step.step_order,
            });
        }

        let entry = ApprovalHistoryEntry {
            id: ApprovalHistoryId(Uuid::new_v4().to_string()),
            request_id: self.id.clone(),
            workflow_step_id: step.id.clone(),
            approver,
            step_order: step.step_order,
            action,
            notes,
            acted_at: now,
        };

        let transition = match action {
            ApprovalAction::Approved => match workflow::next_step(steps, step.step_order) {
                Some(next) => {
                    self.current_step_order = next.step_order;
                    RequestTransition::Advanced {
                        from_step: step.step_order,
                        to_step: next.step_order,
                    }
                }
                None => {
                    self.status = RequestStatus::Approved;
                    RequestTransition::FinallyApproved { at_step: step.step_order }
                }
            },
            ApprovalAction::Rejected => {
                self.status = RequestStatus::Rejected;
                RequestTransition::Rejected { at_step: step.step_order }
            }
        };

        self.touch(now);
        Ok(ActionOutcome { entry, transition })
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_pending()?;
        self.status = RequestStatus::Cancelled;
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}
