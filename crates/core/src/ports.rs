//! Collaborators the exception-request service depends on. `attendance-db`
//! provides SQLite and in-memory implementations of each.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::attachment::{Attachment, AttachmentId, NewAttachment};
use crate::domain::capability::Capability;
use crate::domain::employee::{Employee, EmployeeId, PrincipalId};
use crate::domain::history::ApprovalHistoryEntry;
use crate::domain::request::{ExceptionRequest, ExceptionRequestId};
use crate::domain::schedule::ScheduleAssignment;
use crate::domain::workflow::{WorkflowDefinition, WorkflowId};
use crate::errors::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub skip: u32,
    pub take: u32,
}

impl PageRequest {
    pub const DEFAULT_TAKE: u32 = 50;

    pub fn new(skip: u32, take: u32) -> Self {
        Self { skip, take: take.max(1) }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { skip: 0, take: Self::DEFAULT_TAKE }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: u64,
    pub items: Vec<T>,
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<Employee>, StoreError>;

    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError>;
}

#[async_trait]
pub trait CapabilityCheck: Send + Sync {
    async fn has_capability(
        &self,
        principal_id: &PrincipalId,
        capability: Capability,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, StoreError>;

    /// Active workflows ordered by name.
    async fn list_active(&self) -> Result<Vec<WorkflowDefinition>, StoreError>;

    async fn save(&self, workflow: WorkflowDefinition) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Every assignment of the employee whose effective range covers `date`.
    async fn active_assignments(
        &self,
        employee_id: &EmployeeId,
        date: NaiveDate,
    ) -> Result<Vec<ScheduleAssignment>, StoreError>;
}

#[async_trait]
pub trait ExceptionRequestStore: Send + Sync {
    async fn insert(&self, request: ExceptionRequest) -> Result<(), StoreError>;

    async fn find_by_id(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<ExceptionRequest>, StoreError>;

    async fn list_pending(&self) -> Result<Vec<ExceptionRequest>, StoreError>;

    /// Newest first.
    async fn list_by_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<ExceptionRequest>, StoreError>;

    /// Newest first.
    async fn list_all(&self, page: PageRequest) -> Result<Page<ExceptionRequest>, StoreError>;

    /// Persists `request` only if the stored row still carries `expected_version`,
    /// appending `entry` to the approval history in the same unit of work.
    async fn update(
        &self,
        request: ExceptionRequest,
        expected_version: u32,
        entry: Option<ApprovalHistoryEntry>,
    ) -> Result<(), StoreError>;

    /// Ordered by action timestamp.
    async fn history(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, StoreError>;

    /// The request together with its history, both read from one consistent state.
    async fn find_with_history(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<(ExceptionRequest, Vec<ApprovalHistoryEntry>)>, StoreError>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn save_file(
        &self,
        request_id: &ExceptionRequestId,
        upload: NewAttachment,
        uploaded_at: DateTime<Utc>,
    ) -> Result<Attachment, StoreError>;

    async fn find(&self, id: &AttachmentId) -> Result<Option<Attachment>, StoreError>;

    async fn list_for_request(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<Attachment>, StoreError>;

    /// Fails with `StoreError::NotFound` when the stored content is gone.
    async fn read_file(&self, attachment: &Attachment) -> Result<Vec<u8>, StoreError>;
}
