use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::employee::EmployeeId;
use crate::domain::request::ExceptionRequestId;
use crate::domain::workflow::WorkflowStepId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalHistoryId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approved,
    Rejected,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One approve/reject decision. Entries are written once and never updated.
///
/// `approver` is `None` when a doctor without an employee record acted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalHistoryEntry {
    pub id: ApprovalHistoryId,
    pub request_id: ExceptionRequestId,
    pub workflow_step_id: WorkflowStepId,
    pub approver: Option<EmployeeId>,
    pub step_order: u32,
    pub action: ApprovalAction,
    pub notes: Option<String>,
    pub acted_at: DateTime<Utc>,
}
