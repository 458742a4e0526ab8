//! Exception-request operations as consumed by a presentation layer.
//!
//! Every operation takes the already-authenticated caller, resolves it to an
//! [`Actor`], applies the capability gate for the operation and then drives the
//! state machine in [`crate::domain::request`] against the injected stores.
//! Refused or failed operations emit an audit event before the error is returned.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approvals::{self, Actor, AuthorizationDecision};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::clock::Clock;
use crate::config::RoutingMode;
use crate::domain::attachment::{self, Attachment, AttachmentId, NewAttachment};
use crate::domain::capability::Capability;
use crate::domain::employee::{Employee, PrincipalId};
use crate::domain::history::{ApprovalAction, ApprovalHistoryEntry};
use crate::domain::request::{
    ExceptionRequest, ExceptionRequestId, NewExceptionRequest, RequestTransition,
};
use crate::domain::workflow::{WorkflowId, WorkflowStep};
use crate::errors::{ApplicationError, DomainError};
use crate::ports::{
    AttachmentStore, CapabilityCheck, EmployeeDirectory, ExceptionRequestStore, Page,
    PageRequest, ScheduleStore, WorkflowStore,
};
use crate::schedule::ScheduleGate;

/// Display name recorded for history entries without an approver identity.
pub const ANONYMOUS_DOCTOR_NAME: &str = "Doctor";

const APPROVE_CAPABILITIES: [Capability; 2] = [Capability::Approve, Capability::ApproveAsDoctor];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerContext {
    pub principal_id: PrincipalId,
    pub correlation_id: String,
}

impl CallerContext {
    pub fn new(principal_id: PrincipalId, correlation_id: impl Into<String>) -> Self {
        Self { principal_id, correlation_id: correlation_id.into() }
    }

    pub fn with_generated_correlation(principal_id: PrincipalId) -> Self {
        Self::new(principal_id, Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    pub routing: RoutingMode,
    pub max_attachment_bytes: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            routing: RoutingMode::Snapshot,
            max_attachment_bytes: crate::config::DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

impl From<&crate::config::AppConfig> for ServiceSettings {
    fn from(config: &crate::config::AppConfig) -> Self {
        Self {
            routing: config.workflow.routing,
            max_attachment_bytes: config.attachments.max_bytes,
        }
    }
}

#[derive(Clone)]
pub struct ServiceDependencies {
    pub employees: Arc<dyn EmployeeDirectory>,
    pub capabilities: Arc<dyn CapabilityCheck>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub requests: Arc<dyn ExceptionRequestStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryView {
    pub entry: ApprovalHistoryEntry,
    pub approver_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRequestDetails {
    pub request: ExceptionRequest,
    pub history: Vec<HistoryView>,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionReceipt {
    pub request: ExceptionRequest,
    pub entry: ApprovalHistoryEntry,
    pub transition: RequestTransition,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadedAttachment {
    pub attachment: Attachment,
    pub bytes: Vec<u8>,
}

pub struct ExceptionRequestService {
    employees: Arc<dyn EmployeeDirectory>,
    capabilities: Arc<dyn CapabilityCheck>,
    workflows: Arc<dyn WorkflowStore>,
    requests: Arc<dyn ExceptionRequestStore>,
    attachments: Arc<dyn AttachmentStore>,
    schedule: ScheduleGate,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    settings: ServiceSettings,
}

impl ExceptionRequestService {
    pub fn new(dependencies: ServiceDependencies, settings: ServiceSettings) -> Self {
        Self {
            employees: dependencies.employees,
            capabilities: dependencies.capabilities,
            workflows: dependencies.workflows,
            requests: dependencies.requests,
            attachments: dependencies.attachments,
            schedule: ScheduleGate::new(dependencies.schedules),
            clock: dependencies.clock,
            audit: dependencies.audit,
            settings,
        }
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    pub async fn resolve_actor(&self, caller: &CallerContext) -> Result<Actor, ApplicationError> {
        let employee = self.employees.find_by_principal(&caller.principal_id).await?;
        let mut granted = Vec::new();
        for capability in Capability::ALL {
            if self.capabilities.has_capability(&caller.principal_id, capability).await? {
                granted.push(capability);
            }
        }
        Ok(Actor::new(caller.principal_id.clone(), employee, granted))
    }

    /// Whether today is an on-site day for the caller's employee record.
    pub async fn is_on_site_today(&self, caller: &CallerContext) -> Result<bool, ApplicationError> {
        let employee = self.require_employee(&caller.principal_id).await?;
        self.schedule.is_on_site_today(&employee.id, self.clock.as_ref()).await
    }

    pub async fn create(
        &self,
        caller: &CallerContext,
        input: NewExceptionRequest,
    ) -> Result<ExceptionRequest, ApplicationError> {
        let result = self.create_inner(caller, input).await;
        self.observe_failure(caller, "create", None, result)
    }

    async fn create_inner(
        &self,
        caller: &CallerContext,
        input: NewExceptionRequest,
    ) -> Result<ExceptionRequest, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        require(&actor, &[Capability::Create], "create exception requests")?;
        let employee = actor
            .employee
            .ok_or_else(|| ApplicationError::not_found("employee", &caller.principal_id.0))?;

        let workflow_id = employee.workflow_id.clone().ok_or_else(|| {
            DomainError::NoWorkflowAssigned { employee_id: employee.id.0.clone() }
        })?;
        let workflow = self
            .workflows
            .find_by_id(&workflow_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("workflow", &workflow_id.0))?;

        let date = input.exception_date;
        let on_site = match self.schedule.is_on_site_day(&employee.id, date).await {
            Ok(on_site) => on_site,
            Err(ApplicationError::NotFound { .. }) => {
                return Err(DomainError::NoActiveSchedule { date }.into());
            }
            Err(error) => return Err(error),
        };
        if !on_site {
            return Err(DomainError::NotOnSiteDay { date }.into());
        }

        let now = self.clock.now();
        let snapshot = self.settings.routing == RoutingMode::Snapshot;
        let (request, initial) =
            ExceptionRequest::open(employee.id.clone(), input, &workflow, snapshot, now);
        if let Some(fallback) = initial.fallback {
            tracing::warn!(
                event_name = "workflow.initial_step_fallback",
                workflow_id = %workflow.id.0,
                request_id = %request.id.0,
                request_type = request.request_type.as_str(),
                step_order = initial.step_order,
                reason = fallback.describe(),
                "workflow has no step matching the request type"
            );
        }

        self.requests.insert(request.clone()).await?;

        tracing::info!(
            event_name = "exception_request.created",
            correlation_id = %caller.correlation_id,
            request_id = %request.id.0,
            employee_id = %employee.id.0,
            workflow_id = %workflow.id.0,
            step_order = request.current_step_order,
            "exception request created"
        );
        self.emit(
            caller,
            Some(&request.id),
            "exception_request.created",
            AuditCategory::Request,
            AuditOutcome::Success,
            &[
                ("request_type", request.request_type.as_str().to_string()),
                ("step_order", request.current_step_order.to_string()),
                ("routing", self.settings.routing.as_str().to_string()),
            ],
        );

        Ok(request)
    }

    pub async fn get(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
    ) -> Result<ExceptionRequestDetails, ApplicationError> {
        let result = self.get_inner(caller, request_id).await;
        self.observe_failure(caller, "get", Some(request_id), result)
    }

    async fn get_inner(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
    ) -> Result<ExceptionRequestDetails, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        let (request, entries) = self
            .requests
            .find_with_history(request_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("exception_request", &request_id.0))?;

        let owns = actor.employee_id() == Some(&request.employee_id);
        let allowed = (owns && actor.has(Capability::ViewOwn))
            || actor.has(Capability::ViewAll)
            || actor.has_any(&APPROVE_CAPABILITIES);
        if !allowed {
            return Err(ApplicationError::forbidden("not permitted to view this request"));
        }

        let mut names: HashMap<String, String> = HashMap::new();
        let mut history = Vec::with_capacity(entries.len());
        for entry in entries {
            let approver_name = match &entry.approver {
                None => ANONYMOUS_DOCTOR_NAME.to_string(),
                Some(approver) => match names.get(&approver.0) {
                    Some(name) => name.clone(),
                    None => {
                        let name = self
                            .employees
                            .find_by_id(approver)
                            .await?
                            .map(|employee| employee.name)
                            .unwrap_or_else(|| approver.0.clone());
                        names.insert(approver.0.clone(), name.clone());
                        name
                    }
                },
            };
            history.push(HistoryView { entry, approver_name });
        }

        let attachments = self.attachments.list_for_request(request_id).await?;
        Ok(ExceptionRequestDetails { request, history, attachments })
    }

    /// The caller's own requests, newest first. Empty when the caller has no
    /// employee record.
    pub async fn list_mine(
        &self,
        caller: &CallerContext,
    ) -> Result<Vec<ExceptionRequest>, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        require(&actor, &[Capability::ViewOwn], "view own exception requests")?;
        match actor.employee_id() {
            Some(employee_id) => Ok(self.requests.list_by_employee(employee_id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn list_all(
        &self,
        caller: &CallerContext,
        page: PageRequest,
    ) -> Result<Page<ExceptionRequest>, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        require(&actor, &[Capability::ViewAll], "view all exception requests")?;
        Ok(self.requests.list_all(page).await?)
    }

    /// Pending requests the caller may act on or oversee.
    pub async fn list_actionable(
        &self,
        caller: &CallerContext,
    ) -> Result<Vec<ExceptionRequest>, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        require(
            &actor,
            &[Capability::Approve, Capability::ApproveAsDoctor, Capability::ViewAll],
            "list actionable exception requests",
        )?;

        let pending = self.requests.list_pending().await?;
        let mut live_steps: HashMap<WorkflowId, Option<Vec<WorkflowStep>>> = HashMap::new();
        let mut actionable = Vec::new();

        for request in pending {
            let steps = match self.snapshot_steps(&request) {
                Some(steps) => steps.to_vec(),
                None => {
                    if !live_steps.contains_key(&request.workflow_id) {
                        let workflow = self.workflows.find_by_id(&request.workflow_id).await?;
                        live_steps.insert(
                            request.workflow_id.clone(),
                            workflow.map(|workflow| workflow.steps),
                        );
                    }
                    match live_steps.get(&request.workflow_id).cloned().flatten() {
                        Some(steps) => steps,
                        None => {
                            tracing::debug!(
                                event_name = "exception_request.actionable_skipped",
                                request_id = %request.id.0,
                                workflow_id = %request.workflow_id.0,
                                "workflow no longer exists"
                            );
                            continue;
                        }
                    }
                }
            };

            match approvals::actionable(&actor, &request, &steps) {
                Ok(inclusion) => {
                    tracing::debug!(
                        event_name = "exception_request.actionable_included",
                        principal_id = %caller.principal_id.0,
                        request_id = %request.id.0,
                        step_order = request.current_step_order,
                        reason = ?inclusion,
                        "request included in approval queue"
                    );
                    actionable.push(request);
                }
                Err(exclusion) => {
                    tracing::debug!(
                        event_name = "exception_request.actionable_excluded",
                        principal_id = %caller.principal_id.0,
                        request_id = %request.id.0,
                        step_order = request.current_step_order,
                        reason = ?exclusion,
                        "request excluded from approval queue"
                    );
                }
            }
        }

        Ok(actionable)
    }

    /// Whether the caller may act on the request's current step right now.
    pub async fn can_act(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
    ) -> Result<bool, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        let request = self.load_request(request_id).await?;
        let steps = self.route_steps(&request).await?;
        Ok(approvals::can_act(&actor, &request, &steps)?)
    }

    /// Approves or rejects the request at its current step.
    pub async fn record_action(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
        action: ApprovalAction,
        notes: Option<String>,
    ) -> Result<ActionReceipt, ApplicationError> {
        let result = self.record_action_inner(caller, request_id, action, notes).await;
        self.observe_failure(caller, "record_action", Some(request_id), result)
    }

    async fn record_action_inner(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
        action: ApprovalAction,
        notes: Option<String>,
    ) -> Result<ActionReceipt, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        require(&actor, &APPROVE_CAPABILITIES, "approve exception requests")?;

        let mut request = self.load_request(request_id).await?;
        request.ensure_pending()?;

        let steps = self.route_steps(&request).await?;
        let (step, decision) = approvals::authorize_current_step(&actor, &request, &steps)?;
        let approver = match decision {
            AuthorizationDecision::Allowed { approver } => approver,
            AuthorizationDecision::Denied(failure) => {
                return Err(ApplicationError::forbidden(failure.reason()));
            }
        };

        let expected_version = request.version;
        let step = step.clone();
        let outcome =
            request.record_action(&steps, &step, action, approver, notes, self.clock.now())?;
        self.requests.update(request.clone(), expected_version, Some(outcome.entry.clone())).await?;

        tracing::info!(
            event_name = "exception_request.action_recorded",
            correlation_id = %caller.correlation_id,
            request_id = %request.id.0,
            step_order = step.step_order,
            action = action.as_str(),
            status = request.status.as_str(),
            "approval action recorded"
        );
        let mut metadata = vec![
            ("action", action.as_str().to_string()),
            ("step_order", step.step_order.to_string()),
            ("status", request.status.as_str().to_string()),
        ];
        if let RequestTransition::Advanced { to_step, .. } = outcome.transition {
            metadata.push(("next_step", to_step.to_string()));
        }
        self.emit(
            caller,
            Some(&request.id),
            "exception_request.action_recorded",
            AuditCategory::Approval,
            AuditOutcome::Success,
            &metadata,
        );

        Ok(ActionReceipt { request, entry: outcome.entry, transition: outcome.transition })
    }

    pub async fn cancel(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
    ) -> Result<ExceptionRequest, ApplicationError> {
        let result = self.cancel_inner(caller, request_id).await;
        self.observe_failure(caller, "cancel", Some(request_id), result)
    }

    async fn cancel_inner(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
    ) -> Result<ExceptionRequest, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        require(&actor, &[Capability::Delete], "cancel exception requests")?;

        let mut request = self.load_request(request_id).await?;
        let expected_version = request.version;
        request.cancel(self.clock.now())?;
        self.requests.update(request.clone(), expected_version, None).await?;

        tracing::info!(
            event_name = "exception_request.cancelled",
            correlation_id = %caller.correlation_id,
            request_id = %request.id.0,
            "exception request cancelled"
        );
        self.emit(
            caller,
            Some(&request.id),
            "exception_request.cancelled",
            AuditCategory::Request,
            AuditOutcome::Success,
            &[],
        );
        Ok(request)
    }

    /// Stores a file against a request. Allowed to the request owner and to
    /// holders of `ViewAll`.
    pub async fn upload_attachment(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
        upload: NewAttachment,
    ) -> Result<Attachment, ApplicationError> {
        let result = self.upload_attachment_inner(caller, request_id, upload).await;
        self.observe_failure(caller, "upload_attachment", Some(request_id), result)
    }

    async fn upload_attachment_inner(
        &self,
        caller: &CallerContext,
        request_id: &ExceptionRequestId,
        mut upload: NewAttachment,
    ) -> Result<Attachment, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        let request = self.load_request(request_id).await?;

        let owns = actor.employee_id() == Some(&request.employee_id);
        if !owns && !actor.has(Capability::ViewAll) {
            return Err(ApplicationError::forbidden("only the requester may attach files"));
        }

        upload.file_name = attachment::sanitize_file_name(&upload.file_name)
            .ok_or_else(|| DomainError::InvalidFileName(upload.file_name.clone()))?;
        let size_bytes = upload.bytes.len() as u64;
        if size_bytes > self.settings.max_attachment_bytes {
            return Err(DomainError::AttachmentTooLarge {
                size_bytes,
                limit: self.settings.max_attachment_bytes,
            }
            .into());
        }

        let stored = self.attachments.save_file(request_id, upload, self.clock.now()).await?;

        tracing::info!(
            event_name = "exception_request.attachment_uploaded",
            correlation_id = %caller.correlation_id,
            request_id = %request_id.0,
            attachment_id = %stored.id.0,
            size_bytes = stored.size_bytes,
            "attachment stored"
        );
        self.emit(
            caller,
            Some(request_id),
            "exception_request.attachment_uploaded",
            AuditCategory::Attachment,
            AuditOutcome::Success,
            &[
                ("attachment_id", stored.id.0.clone()),
                ("kind", stored.kind.as_str().to_string()),
                ("sha256", stored.sha256.clone()),
            ],
        );
        Ok(stored)
    }

    /// Returns the stored bytes to the request owner or to any approver or
    /// overseer.
    pub async fn download_attachment(
        &self,
        caller: &CallerContext,
        attachment_id: &AttachmentId,
    ) -> Result<DownloadedAttachment, ApplicationError> {
        let result = self.download_attachment_inner(caller, attachment_id).await;
        self.observe_failure(caller, "download_attachment", None, result)
    }

    async fn download_attachment_inner(
        &self,
        caller: &CallerContext,
        attachment_id: &AttachmentId,
    ) -> Result<DownloadedAttachment, ApplicationError> {
        let actor = self.resolve_actor(caller).await?;
        let attachment = self
            .attachments
            .find(attachment_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("attachment", &attachment_id.0))?;
        let request = self.load_request(&attachment.request_id).await?;

        let owns = actor.employee_id() == Some(&request.employee_id);
        let privileged = actor.has_any(&[
            Capability::Approve,
            Capability::ApproveAsDoctor,
            Capability::ViewAll,
        ]);
        if !owns && !privileged {
            return Err(ApplicationError::forbidden("not permitted to view this attachment"));
        }

        let bytes = self.attachments.read_file(&attachment).await?;
        Ok(DownloadedAttachment { attachment, bytes })
    }

    async fn require_employee(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Employee, ApplicationError> {
        self.employees
            .find_by_principal(principal_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("employee", &principal_id.0))
    }

    async fn load_request(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<ExceptionRequest, ApplicationError> {
        self.requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("exception_request", &request_id.0))
    }

    fn snapshot_steps<'r>(&self, request: &'r ExceptionRequest) -> Option<&'r [WorkflowStep]> {
        match self.settings.routing {
            RoutingMode::Snapshot => request.step_snapshot.as_deref(),
            RoutingMode::Live => None,
        }
    }

    /// Steps the request is routed against. Requests created without a
    /// snapshot always follow the live workflow.
    async fn route_steps(
        &self,
        request: &ExceptionRequest,
    ) -> Result<Vec<WorkflowStep>, ApplicationError> {
        if let Some(steps) = self.snapshot_steps(request) {
            return Ok(steps.to_vec());
        }
        let workflow = self
            .workflows
            .find_by_id(&request.workflow_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("workflow", &request.workflow_id.0))?;
        Ok(workflow.steps)
    }

    fn emit(
        &self,
        caller: &CallerContext,
        request_id: Option<&ExceptionRequestId>,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let context = AuditContext::new(
            request_id.cloned(),
            caller.correlation_id.clone(),
            caller.principal_id.0.clone(),
        );
        let event = metadata.iter().fold(
            AuditEvent::new(&context, event_type, category, outcome, self.clock.now()),
            |event, (key, value)| event.with_metadata(*key, value.clone()),
        );
        self.audit.emit(event);
    }

    fn observe_failure<T>(
        &self,
        caller: &CallerContext,
        operation: &str,
        request_id: Option<&ExceptionRequestId>,
        result: Result<T, ApplicationError>,
    ) -> Result<T, ApplicationError> {
        if let Err(error) = &result {
            let (category, outcome) = match error {
                ApplicationError::Forbidden(_) => {
                    (AuditCategory::Authorization, AuditOutcome::Rejected)
                }
                ApplicationError::Persistence(_) | ApplicationError::Configuration(_) => {
                    (AuditCategory::Request, AuditOutcome::Failed)
                }
                _ => (AuditCategory::Request, AuditOutcome::Rejected),
            };
            tracing::warn!(
                event_name = "exception_request.rejected_attempt",
                correlation_id = %caller.correlation_id,
                principal_id = %caller.principal_id.0,
                operation,
                error_class = error.class(),
                error = %error,
                "exception request operation refused"
            );
            self.emit(
                caller,
                request_id,
                "exception_request.rejected_attempt",
                category,
                outcome,
                &[
                    ("operation", operation.to_string()),
                    ("error_class", error.class().to_string()),
                    ("error", error.to_string()),
                ],
            );
        }
        result
    }
}

fn require(actor: &Actor, any_of: &[Capability], purpose: &str) -> Result<(), ApplicationError> {
    if actor.has_any(any_of) {
        return Ok(());
    }
    let names: Vec<&str> = any_of.iter().map(Capability::as_str).collect();
    Err(ApplicationError::forbidden(format!("{purpose} requires one of: {}", names.join(", "))))
}
