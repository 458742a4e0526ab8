use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use attendance_core::domain::attachment::{self, Attachment, AttachmentId, NewAttachment};
use attendance_core::domain::capability::Capability;
use attendance_core::domain::employee::{Employee, EmployeeId, PrincipalId};
use attendance_core::domain::history::ApprovalHistoryEntry;
use attendance_core::domain::request::{ExceptionRequest, ExceptionRequestId};
use attendance_core::domain::schedule::ScheduleAssignment;
use attendance_core::domain::workflow::{WorkflowDefinition, WorkflowId};
use attendance_core::errors::StoreError;
use attendance_core::ports::{
    AttachmentStore, CapabilityCheck, EmployeeDirectory, ExceptionRequestStore, Page,
    PageRequest, ScheduleStore, WorkflowStore,
};

#[derive(Default)]
pub struct InMemoryEmployeeRepository {
    employees: RwLock<HashMap<String, Employee>>,
}

impl InMemoryEmployeeRepository {
    pub async fn save(&self, employee: Employee) {
        let mut employees = self.employees.write().await;
        employees.insert(employee.id.0.clone(), employee);
    }
}

#[async_trait::async_trait]
impl EmployeeDirectory for InMemoryEmployeeRepository {
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<Employee>, StoreError> {
        let employees = self.employees.read().await;
        Ok(employees
            .values()
            .find(|employee| employee.principal_id.as_ref() == Some(principal_id))
            .cloned())
    }

    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        let employees = self.employees.read().await;
        Ok(employees.get(&id.0).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCapabilityRepository {
    grants: RwLock<HashMap<String, HashSet<Capability>>>,
}

impl InMemoryCapabilityRepository {
    pub async fn grant(&self, principal_id: &PrincipalId, capability: Capability) {
        let mut grants = self.grants.write().await;
        grants.entry(principal_id.0.clone()).or_default().insert(capability);
    }

    pub async fn revoke(&self, principal_id: &PrincipalId, capability: Capability) {
        let mut grants = self.grants.write().await;
        if let Some(granted) = grants.get_mut(&principal_id.0) {
            granted.remove(&capability);
        }
    }
}

#[async_trait::async_trait]
impl CapabilityCheck for InMemoryCapabilityRepository {
    async fn has_capability(
        &self,
        principal_id: &PrincipalId,
        capability: Capability,
    ) -> Result<bool, StoreError> {
        let grants = self.grants.read().await;
        Ok(grants.get(&principal_id.0).is_some_and(|granted| granted.contains(&capability)))
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
}

#[async_trait::async_trait]
impl WorkflowStore for InMemoryWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, StoreError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn list_active(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let workflows = self.workflows.read().await;
        let mut active: Vec<WorkflowDefinition> =
            workflows.values().filter(|workflow| workflow.active).cloned().collect();
        active.sort_by(|left, right| {
            left.name.cmp(&right.name).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(active)
    }

    async fn save(&self, workflow: WorkflowDefinition) -> Result<(), StoreError> {
        workflow.validate().map_err(StoreError::InvalidWorkflow)?;
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.0.clone(), workflow);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    assignments: RwLock<Vec<ScheduleAssignment>>,
}

impl InMemoryScheduleRepository {
    pub async fn save_assignment(&self, assignment: ScheduleAssignment) {
        let mut assignments = self.assignments.write().await;
        assignments.retain(|existing| existing.id != assignment.id);
        assignments.push(assignment);
    }
}

#[async_trait::async_trait]
impl ScheduleStore for InMemoryScheduleRepository {
    async fn active_assignments(
        &self,
        employee_id: &EmployeeId,
        date: NaiveDate,
    ) -> Result<Vec<ScheduleAssignment>, StoreError> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .iter()
            .filter(|assignment| &assignment.employee_id == employee_id && assignment.covers(date))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct RequestState {
    requests: HashMap<String, ExceptionRequest>,
    history: Vec<ApprovalHistoryEntry>,
}

/// Requests and history share one lock so a version check and the history
/// append land together.
#[derive(Default)]
pub struct InMemoryExceptionRequestRepository {
    state: RwLock<RequestState>,
}

fn newest_first(requests: &mut [ExceptionRequest]) {
    requests.sort_by(|left, right| {
        right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
    });
}

#[async_trait::async_trait]
impl ExceptionRequestStore for InMemoryExceptionRequestRepository {
    async fn insert(&self, request: ExceptionRequest) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id.0) {
            return Err(StoreError::Backend(format!(
                "exception request `{}` already exists",
                request.id.0
            )));
        }
        state.requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<ExceptionRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<ExceptionRequest>, StoreError> {
        let state = self.state.read().await;
        let mut pending: Vec<ExceptionRequest> =
            state.requests.values().filter(|request| request.is_pending()).cloned().collect();
        pending.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(pending)
    }

    async fn list_by_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<ExceptionRequest>, StoreError> {
        let state = self.state.read().await;
        let mut mine: Vec<ExceptionRequest> = state
            .requests
            .values()
            .filter(|request| &request.employee_id == employee_id)
            .cloned()
            .collect();
        newest_first(&mut mine);
        Ok(mine)
    }

    async fn list_all(&self, page: PageRequest) -> Result<Page<ExceptionRequest>, StoreError> {
        let state = self.state.read().await;
        let mut all: Vec<ExceptionRequest> = state.requests.values().cloned().collect();
        newest_first(&mut all);
        let total = all.len() as u64;
        let items =
            all.into_iter().skip(page.skip as usize).take(page.take as usize).collect();
        Ok(Page { total, items })
    }

    async fn update(
        &self,
        request: ExceptionRequest,
        expected_version: u32,
        entry: Option<ApprovalHistoryEntry>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored_version = match state.requests.get(&request.id.0) {
            Some(stored) => stored.version,
            None => {
                return Err(StoreError::NotFound {
                    entity: "exception_request",
                    id: request.id.0.clone(),
                })
            }
        };
        if stored_version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "exception_request",
                id: request.id.0.clone(),
                expected_version,
            });
        }

        if let Some(entry) = entry {
            state.history.push(entry);
        }
        state.requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn history(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, StoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<ApprovalHistoryEntry> =
            state.history.iter().filter(|entry| &entry.request_id == request_id).cloned().collect();
        entries.sort_by_key(|entry| entry.acted_at);
        Ok(entries)
    }

    async fn find_with_history(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<(ExceptionRequest, Vec<ApprovalHistoryEntry>)>, StoreError> {
        let state = self.state.read().await;
        let Some(request) = state.requests.get(&id.0).cloned() else {
            return Ok(None);
        };
        let mut entries: Vec<ApprovalHistoryEntry> =
            state.history.iter().filter(|entry| &entry.request_id == id).cloned().collect();
        entries.sort_by_key(|entry| entry.acted_at);
        Ok(Some((request, entries)))
    }
}

/// Keeps attachment bytes next to their metadata. Re-uploading a file name for
/// the same request replaces the earlier attachment; content is digest-checked
/// on read.
#[derive(Default)]
pub struct InMemoryAttachmentStore {
    files: RwLock<HashMap<String, (Attachment, Vec<u8>)>>,
}

impl InMemoryAttachmentStore {
    /// Overwrites stored bytes without touching the recorded digest.
    pub async fn corrupt(&self, id: &AttachmentId, bytes: Vec<u8>) {
        let mut files = self.files.write().await;
        if let Some((_, stored)) = files.get_mut(&id.0) {
            *stored = bytes;
        }
    }
}

#[async_trait::async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn save_file(
        &self,
        request_id: &ExceptionRequestId,
        upload: NewAttachment,
        uploaded_at: DateTime<Utc>,
    ) -> Result<Attachment, StoreError> {
        let metadata = Attachment {
            id: AttachmentId(Uuid::new_v4().to_string()),
            request_id: request_id.clone(),
            relative_path: attachment::relative_path(request_id, &upload.file_name),
            file_name: upload.file_name,
            content_type: upload.content_type,
            kind: upload.kind,
            sha256: attachment::content_digest(&upload.bytes),
            size_bytes: upload.bytes.len() as u64,
            uploaded_at,
        };
        let mut files = self.files.write().await;
        files.retain(|_, (existing, _)| {
            existing.request_id != metadata.request_id || existing.file_name != metadata.file_name
        });
        files.insert(metadata.id.0.clone(), (metadata.clone(), upload.bytes));
        Ok(metadata)
    }

    async fn find(&self, id: &AttachmentId) -> Result<Option<Attachment>, StoreError> {
        let files = self.files.read().await;
        Ok(files.get(&id.0).map(|(metadata, _)| metadata.clone()))
    }

    async fn list_for_request(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<Attachment>, StoreError> {
        let files = self.files.read().await;
        let mut attachments: Vec<Attachment> = files
            .values()
            .filter(|(metadata, _)| &metadata.request_id == request_id)
            .map(|(metadata, _)| metadata.clone())
            .collect();
        attachments.sort_by(|left, right| {
            left.uploaded_at.cmp(&right.uploaded_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(attachments)
    }

    async fn read_file(&self, attachment: &Attachment) -> Result<Vec<u8>, StoreError> {
        let files = self.files.read().await;
        let (_, bytes) = files.get(&attachment.id.0).ok_or_else(|| StoreError::NotFound {
            entity: "attachment",
            id: attachment.id.0.clone(),
        })?;
        if attachment::content_digest(bytes) != attachment.sha256 {
            return Err(StoreError::Backend(format!(
                "attachment `{}` content does not match its recorded digest",
                attachment.id.0
            )));
        }
        Ok(bytes.clone())
    }
}
