use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use attendance_core::chrono::{NaiveDate, TimeZone, Utc, Weekday};
use attendance_core::audit::AuditOutcome;
use attendance_core::config::RoutingMode;
use attendance_core::domain::attachment::{AttachmentKind, NewAttachment};
use attendance_core::domain::employee::{Employee, EmployeeId, PrincipalId};
use attendance_core::domain::history::{ApprovalAction, ApprovalHistoryEntry};
use attendance_core::domain::request::{
    ExceptionRequest, ExceptionRequestId, NewExceptionRequest, RequestStatus, RequestTransition,
    RequestType,
};
use attendance_core::domain::schedule::{
    Schedule, ScheduleAssignment, ScheduleAssignmentId, ScheduleDay, ScheduleId,
};
use attendance_core::domain::workflow::{
    ApproverCategory, WorkflowDefinition, WorkflowId, WorkflowStep, WorkflowStepId,
};
use attendance_core::errors::{ApplicationError, DomainError, StoreError};
use attendance_core::ports::{
    AttachmentStore, ExceptionRequestStore, Page, PageRequest, WorkflowStore,
};
use attendance_core::{
    AuditSink, CallerContext, Capability, Clock, ExceptionRequestService, FixedClock,
    InMemoryAuditSink, ServiceDependencies, ServiceSettings,
};
use attendance_db::repositories::{
    InMemoryAttachmentStore, InMemoryCapabilityRepository, InMemoryEmployeeRepository,
    InMemoryExceptionRequestRepository, InMemoryScheduleRepository, InMemoryWorkflowRepository,
    SqlCapabilityRepository, SqlEmployeeRepository, SqlExceptionRequestRepository,
    SqlScheduleRepository, SqlWorkflowRepository,
};
use attendance_db::{connect_with_settings, migrations, AttachmentFiles, SqlAttachmentStore};
use tempfile::TempDir;

type RequestStore = Arc<dyn ExceptionRequestStore>;

const EMPLOYEE: &str = "p-emp";
const SOLO_EMPLOYEE: &str = "p-solo";
const MANAGER: &str = "p-mgr";
const HR: &str = "p-hr";
const DOCTOR: &str = "p-doc";
const OUTSIDER: &str = "p-outsider";

#[derive(Clone, Copy, Debug)]
enum Backend {
    Memory,
    Sqlite,
}

enum Seeder {
    Memory {
        employees: Arc<InMemoryEmployeeRepository>,
        capabilities: Arc<InMemoryCapabilityRepository>,
        schedules: Arc<InMemoryScheduleRepository>,
    },
    Sqlite {
        employees: SqlEmployeeRepository,
        capabilities: SqlCapabilityRepository,
        schedules: SqlScheduleRepository,
    },
}

impl Seeder {
    async fn employee(&self, employee: Employee) {
        match self {
            Self::Memory { employees, .. } => employees.save(employee).await,
            Self::Sqlite { employees, .. } => {
                employees.save(&employee).await.expect("save employee")
            }
        }
    }

    async fn grant(&self, principal: &str, granted: &[Capability]) {
        let principal_id = PrincipalId(principal.to_string());
        for capability in granted {
            match self {
                Self::Memory { capabilities, .. } => {
                    capabilities.grant(&principal_id, *capability).await
                }
                Self::Sqlite { capabilities, .. } => {
                    capabilities.grant(&principal_id, *capability).await.expect("grant")
                }
            }
        }
    }

    async fn assignment(&self, assignment: ScheduleAssignment) {
        match self {
            Self::Memory { schedules, .. } => schedules.save_assignment(assignment).await,
            Self::Sqlite { schedules, .. } => {
                schedules.save_assignment(&assignment).await.expect("save assignment")
            }
        }
    }
}

struct Harness {
    service: ExceptionRequestService,
    audit: InMemoryAuditSink,
    workflows: Arc<dyn WorkflowStore>,
    requests: RequestStore,
    attachments: Arc<dyn AttachmentStore>,
    memory_attachments: Option<Arc<InMemoryAttachmentStore>>,
    files: TempDir,
}

impl Harness {
    async fn new(backend: Backend, settings: ServiceSettings) -> Self {
        Self::build(backend, settings, |requests| requests).await
    }

    /// `wrap_requests` decorates the request store handed to the service.
    async fn build(
        backend: Backend,
        settings: ServiceSettings,
        wrap_requests: impl FnOnce(RequestStore) -> RequestStore,
    ) -> Self {
        let files = tempfile::tempdir().expect("attachment root");
        let audit = InMemoryAuditSink::default();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("timestamp"),
        ));

        let mut memory_attachments = None;
        let (seeder, mut deps) = match backend {
            Backend::Memory => {
                let stored_files = Arc::new(InMemoryAttachmentStore::default());
                memory_attachments = Some(stored_files.clone());
                let employees = Arc::new(InMemoryEmployeeRepository::default());
                let capabilities = Arc::new(InMemoryCapabilityRepository::default());
                let schedules = Arc::new(InMemoryScheduleRepository::default());
                let deps = ServiceDependencies {
                    employees: employees.clone(),
                    capabilities: capabilities.clone(),
                    workflows: Arc::new(InMemoryWorkflowRepository::default()),
                    schedules: schedules.clone(),
                    requests: Arc::new(InMemoryExceptionRequestRepository::default()),
                    attachments: stored_files,
                    clock,
                    audit: Arc::new(audit.clone()) as Arc<dyn AuditSink>,
                };
                (Seeder::Memory { employees, capabilities, schedules }, deps)
            }
            Backend::Sqlite => {
                let pool =
                    connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
                migrations::run_pending(&pool).await.expect("migrations");
                let deps = ServiceDependencies {
                    employees: Arc::new(SqlEmployeeRepository::new(pool.clone())),
                    capabilities: Arc::new(SqlCapabilityRepository::new(pool.clone())),
                    workflows: Arc::new(SqlWorkflowRepository::new(pool.clone())),
                    schedules: Arc::new(SqlScheduleRepository::new(pool.clone())),
                    requests: Arc::new(SqlExceptionRequestRepository::new(pool.clone())),
                    attachments: Arc::new(SqlAttachmentStore::new(
                        pool.clone(),
                        AttachmentFiles::new(files.path()),
                    )),
                    clock,
                    audit: Arc::new(audit.clone()) as Arc<dyn AuditSink>,
                };
                let seeder = Seeder::Sqlite {
                    employees: SqlEmployeeRepository::new(pool.clone()),
                    capabilities: SqlCapabilityRepository::new(pool.clone()),
                    schedules: SqlScheduleRepository::new(pool),
                };
                (seeder, deps)
            }
        };

        deps.requests = wrap_requests(deps.requests);
        let workflows = deps.workflows.clone();
        let requests = deps.requests.clone();
        let attachments = deps.attachments.clone();
        let harness = Self {
            service: ExceptionRequestService::new(deps, settings),
            audit,
            workflows,
            requests,
            attachments,
            memory_attachments,
            files,
        };
        harness.seed(&seeder).await;
        harness
    }

    async fn seed(&self, seeder: &Seeder) {
        self.workflows.save(medical_workflow()).await.expect("save medical workflow");
        self.workflows.save(doctor_only_workflow()).await.expect("save doctor workflow");

        seeder.employee(employee("E1", EMPLOYEE, "Erin Employee", Some("WF-MED"))).await;
        seeder.employee(employee("E2", SOLO_EMPLOYEE, "Sam Solo", Some("WF-DOC"))).await;
        seeder.employee(employee("M1", MANAGER, "Mona Manager", None)).await;
        seeder.employee(employee("H1", HR, "Hugo Hr", None)).await;
        seeder.employee(employee("X1", OUTSIDER, "Oscar Outsider", None)).await;

        let requester = [Capability::Create, Capability::ViewOwn, Capability::Delete];
        seeder.grant(EMPLOYEE, &requester).await;
        seeder.grant(SOLO_EMPLOYEE, &requester).await;
        seeder.grant(MANAGER, &[Capability::Approve]).await;
        seeder.grant(HR, &[Capability::Approve, Capability::ViewAll]).await;
        seeder.grant(DOCTOR, &[Capability::ApproveAsDoctor]).await;
        seeder.grant(OUTSIDER, &[Capability::Approve]).await;

        seeder.assignment(hybrid_assignment("SA-1", "E1")).await;
        seeder.assignment(hybrid_assignment("SA-2", "E2")).await;
    }
}

/// Lets a competing cancellation commit between the service's read of a
/// request and its versioned write.
struct RacingRequests {
    inner: RequestStore,
    armed: AtomicBool,
}

impl RacingRequests {
    fn new(inner: RequestStore) -> Self {
        Self { inner, armed: AtomicBool::new(false) }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ExceptionRequestStore for RacingRequests {
    async fn insert(&self, request: ExceptionRequest) -> Result<(), StoreError> {
        self.inner.insert(request).await
    }

    async fn find_by_id(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<ExceptionRequest>, StoreError> {
        let found = self.inner.find_by_id(id).await?;
        if let Some(request) = &found {
            if self.armed.swap(false, Ordering::SeqCst) {
                let mut rival = request.clone();
                rival.cancel(Utc::now()).expect("rival cancels a pending request");
                self.inner.update(rival, request.version, None).await?;
            }
        }
        Ok(found)
    }

    async fn list_pending(&self) -> Result<Vec<ExceptionRequest>, StoreError> {
        self.inner.list_pending().await
    }

    async fn list_by_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<ExceptionRequest>, StoreError> {
        self.inner.list_by_employee(employee_id).await
    }

    async fn list_all(&self, page: PageRequest) -> Result<Page<ExceptionRequest>, StoreError> {
        self.inner.list_all(page).await
    }

    async fn update(
        &self,
        request: ExceptionRequest,
        expected_version: u32,
        entry: Option<ApprovalHistoryEntry>,
    ) -> Result<(), StoreError> {
        self.inner.update(request, expected_version, entry).await
    }

    async fn history(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, StoreError> {
        self.inner.history(request_id).await
    }

    async fn find_with_history(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<(ExceptionRequest, Vec<ApprovalHistoryEntry>)>, StoreError> {
        self.inner.find_with_history(id).await
    }
}

fn employee(id: &str, principal: &str, name: &str, workflow: Option<&str>) -> Employee {
    Employee {
        id: EmployeeId(id.to_string()),
        principal_id: Some(PrincipalId(principal.to_string())),
        name: name.to_string(),
        email: None,
        workflow_id: workflow.map(|value| WorkflowId(value.to_string())),
        active: true,
    }
}

fn step(id: &str, order: u32, category: ApproverCategory, approver: Option<&str>) -> WorkflowStep {
    WorkflowStep::new(
        WorkflowStepId(id.to_string()),
        order,
        category,
        approver.map(|value| EmployeeId(value.to_string())),
    )
}

fn medical_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        id: WorkflowId("WF-MED".to_string()),
        name: "Doctor, manager, HR".to_string(),
        description: None,
        active: true,
        steps: vec![
            step("MED-1", 1, ApproverCategory::Doctor, None),
            step("MED-2", 2, ApproverCategory::Manager, Some("M1")),
            step("MED-3", 3, ApproverCategory::HrManager, Some("H1")),
        ],
    }
}

fn doctor_only_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        id: WorkflowId("WF-DOC".to_string()),
        name: "Doctor only".to_string(),
        description: None,
        active: true,
        steps: vec![step("DOC-1", 1, ApproverCategory::Doctor, None)],
    }
}

fn hybrid_assignment(id: &str, employee_id: &str) -> ScheduleAssignment {
    ScheduleAssignment {
        id: ScheduleAssignmentId(id.to_string()),
        employee_id: EmployeeId(employee_id.to_string()),
        schedule: Schedule {
            id: ScheduleId(format!("SCH-{employee_id}")),
            name: "Hybrid".to_string(),
            days: vec![
                ScheduleDay { weekday: Weekday::Mon, on_site: true },
                ScheduleDay { weekday: Weekday::Tue, on_site: true },
                ScheduleDay { weekday: Weekday::Fri, on_site: false },
            ],
        },
        effective_from: date("2026-01-01"),
        effective_to: None,
    }
}

fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
}

fn caller(principal: &str) -> CallerContext {
    CallerContext::new(PrincipalId(principal.to_string()), format!("corr-{principal}"))
}

fn new_request(request_type: RequestType, on: &str) -> NewExceptionRequest {
    NewExceptionRequest {
        exception_date: date(on),
        request_type,
        reason: "needs to be away".to_string(),
    }
}

fn upload(file_name: &str, bytes: &[u8]) -> NewAttachment {
    NewAttachment {
        file_name: file_name.to_string(),
        content_type: Some("application/pdf".to_string()),
        kind: AttachmentKind::MedicalCertificate,
        bytes: bytes.to_vec(),
    }
}

async fn open(harness: &Harness, principal: &str, request_type: RequestType) -> ExceptionRequest {
    harness
        .service
        .create(&caller(principal), new_request(request_type, "2026-03-09"))
        .await
        .expect("create request")
}

async fn act(
    harness: &Harness,
    principal: &str,
    request: &ExceptionRequest,
    action: ApprovalAction,
) -> Result<RequestTransition, ApplicationError> {
    harness
        .service
        .record_action(&caller(principal), &request.id, action, None)
        .await
        .map(|receipt| receipt.transition)
}

macro_rules! on_both_backends {
    ($($name:ident),+ $(,)?) => {
        $(
            mod $name {
                #[tokio::test]
                async fn in_memory() {
                    super::$name(super::Backend::Memory).await;
                }

                #[tokio::test]
                async fn sqlite() {
                    super::$name(super::Backend::Sqlite).await;
                }
            }
        )+
    };
}

on_both_backends!(
    sick_request_walks_doctor_manager_and_hr,
    non_sick_request_skips_doctor_and_rejection_keeps_step,
    create_requires_on_site_schedule,
    undesignated_approver_is_forbidden,
    second_action_on_decided_request_is_invalid_state,
    doctor_queue_only_shows_sick_requests,
    designated_approvers_see_only_their_step,
    stale_version_is_reported_as_conflict,
    action_losing_the_version_race_is_a_conflict,
    cancel_is_terminal,
    listings_respect_capabilities,
    attachments_are_stored_and_guarded,
    snapshot_routing_ignores_later_workflow_edits,
);

async fn sick_request_walks_doctor_manager_and_hr(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let request = open(&harness, EMPLOYEE, RequestType::Sick).await;
    assert_eq!(request.current_step_order, 1);

    let doctor = act(&harness, DOCTOR, &request, ApprovalAction::Approved).await;
    assert_eq!(doctor.expect("doctor"), RequestTransition::Advanced { from_step: 1, to_step: 2 });
    let manager = act(&harness, MANAGER, &request, ApprovalAction::Approved).await;
    assert_eq!(manager.expect("manager"), RequestTransition::Advanced { from_step: 2, to_step: 3 });
    let hr = act(&harness, HR, &request, ApprovalAction::Approved).await;
    assert_eq!(hr.expect("hr"), RequestTransition::FinallyApproved { at_step: 3 });

    let details = harness.service.get(&caller(EMPLOYEE), &request.id).await.expect("details");
    assert_eq!(details.request.status, RequestStatus::Approved);
    let orders: Vec<u32> = details.history.iter().map(|view| view.entry.step_order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    assert_eq!(details.history[0].entry.approver, None);
    let names: Vec<&str> =
        details.history.iter().map(|view| view.approver_name.as_str()).collect();
    assert_eq!(names, vec!["Doctor", "Mona Manager", "Hugo Hr"]);
}

async fn non_sick_request_skips_doctor_and_rejection_keeps_step(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let request = open(&harness, EMPLOYEE, RequestType::RemoteWork).await;
    assert_eq!(request.current_step_order, 2);

    act(&harness, MANAGER, &request, ApprovalAction::Approved).await.expect("manager approves");
    assert!(harness.service.can_act(&caller(HR), &request.id).await.expect("can act"));

    let rejected = act(&harness, HR, &request, ApprovalAction::Rejected).await.expect("reject");
    assert_eq!(rejected, RequestTransition::Rejected { at_step: 3 });

    let stored = harness.requests.find_by_id(&request.id).await.expect("load").expect("exists");
    assert_eq!(stored.status, RequestStatus::Rejected);
    assert_eq!(stored.current_step_order, 3);
    assert_eq!(harness.requests.history(&request.id).await.expect("history").len(), 2);
}

async fn create_requires_on_site_schedule(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let employee = caller(EMPLOYEE);

    let before_assignment = harness
        .service
        .create(&employee, new_request(RequestType::Personal, "2025-12-01"))
        .await
        .expect_err("no schedule covers the date");
    assert!(matches!(
        before_assignment,
        ApplicationError::InvalidState(DomainError::NoActiveSchedule { .. })
    ));

    let remote_friday = harness
        .service
        .create(&employee, new_request(RequestType::Personal, "2026-03-06"))
        .await
        .expect_err("friday is a remote day");
    assert!(matches!(
        remote_friday,
        ApplicationError::InvalidState(DomainError::NotOnSiteDay { .. })
    ));

    let no_capability = harness
        .service
        .create(&caller(MANAGER), new_request(RequestType::Personal, "2026-03-09"))
        .await
        .expect_err("manager cannot create");
    assert!(matches!(no_capability, ApplicationError::Forbidden(_)));

    assert!(harness.service.is_on_site_today(&employee).await.expect("today"));
}

async fn undesignated_approver_is_forbidden(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let request = open(&harness, EMPLOYEE, RequestType::Personal).await;

    let outsider = act(&harness, OUTSIDER, &request, ApprovalAction::Approved).await;
    assert!(matches!(outsider, Err(ApplicationError::Forbidden(_))));
    let doctor = act(&harness, DOCTOR, &request, ApprovalAction::Approved).await;
    assert!(matches!(doctor, Err(ApplicationError::Forbidden(_))));

    let stored = harness.requests.find_by_id(&request.id).await.expect("load").expect("exists");
    assert_eq!(stored.current_step_order, 2);
    assert_eq!(stored.version, request.version);
    assert!(harness
        .audit
        .events()
        .iter()
        .any(|event| event.event_type == "exception_request.rejected_attempt"
            && event.actor == OUTSIDER));
}

async fn second_action_on_decided_request_is_invalid_state(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let request = open(&harness, EMPLOYEE, RequestType::Personal).await;
    act(&harness, MANAGER, &request, ApprovalAction::Approved).await.expect("manager");
    act(&harness, HR, &request, ApprovalAction::Approved).await.expect("hr");

    let again = act(&harness, HR, &request, ApprovalAction::Approved).await;
    assert!(matches!(
        again,
        Err(ApplicationError::InvalidState(DomainError::RequestNotPending {
            status: RequestStatus::Approved
        }))
    ));
    assert_eq!(harness.requests.history(&request.id).await.expect("history").len(), 2);
}

async fn doctor_queue_only_shows_sick_requests(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let sick = open(&harness, EMPLOYEE, RequestType::Sick).await;
    let personal_on_doctor_step = open(&harness, SOLO_EMPLOYEE, RequestType::Personal).await;
    assert_eq!(personal_on_doctor_step.current_step_order, 1);

    let queue = harness.service.list_actionable(&caller(DOCTOR)).await.expect("doctor queue");
    let ids: Vec<&str> = queue.iter().map(|request| request.id.0.as_str()).collect();
    assert_eq!(ids, vec![sick.id.0.as_str()]);

    let oversight = harness.service.list_actionable(&caller(HR)).await.expect("hr queue");
    assert_eq!(oversight.len(), 2);
}

async fn designated_approvers_see_only_their_step(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let sick = open(&harness, EMPLOYEE, RequestType::Sick).await;
    let personal = open(&harness, EMPLOYEE, RequestType::Personal).await;

    let manager_queue = harness.service.list_actionable(&caller(MANAGER)).await.expect("queue");
    let ids: Vec<&str> = manager_queue.iter().map(|request| request.id.0.as_str()).collect();
    assert_eq!(ids, vec![personal.id.0.as_str()]);

    let outsider_queue = harness.service.list_actionable(&caller(OUTSIDER)).await.expect("queue");
    assert!(outsider_queue.is_empty());
    assert!(!harness.service.can_act(&caller(MANAGER), &sick.id).await.expect("can act"));

    let employee_queue = harness.service.list_actionable(&caller(EMPLOYEE)).await;
    assert!(matches!(employee_queue, Err(ApplicationError::Forbidden(_))));
}

async fn stale_version_is_reported_as_conflict(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let request = open(&harness, EMPLOYEE, RequestType::Personal).await;
    act(&harness, MANAGER, &request, ApprovalAction::Approved).await.expect("manager");

    let mut stale = request.clone();
    stale.cancel(Utc::now()).expect("cancel in memory");
    let error = harness
        .requests
        .update(stale, request.version, None)
        .await
        .expect_err("version already moved on");
    assert!(matches!(error, StoreError::VersionConflict { .. }));
    assert!(matches!(ApplicationError::from(error), ApplicationError::Conflict { .. }));

    let stored = harness.requests.find_by_id(&request.id).await.expect("load").expect("exists");
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(stored.current_step_order, 3);
}

async fn action_losing_the_version_race_is_a_conflict(backend: Backend) {
    let mut racing = None;
    let harness = Harness::build(backend, ServiceSettings::default(), |inner| {
        let store = Arc::new(RacingRequests::new(inner));
        racing = Some(store.clone());
        store as RequestStore
    })
    .await;
    let racing = racing.expect("racing store installed");
    let request = open(&harness, EMPLOYEE, RequestType::Personal).await;

    racing.arm();
    let error = act(&harness, MANAGER, &request, ApprovalAction::Approved)
        .await
        .expect_err("a rival write landed first");
    assert!(matches!(error, ApplicationError::Conflict { .. }));

    let stored = harness.requests.find_by_id(&request.id).await.expect("load").expect("exists");
    assert_eq!(stored.status, RequestStatus::Cancelled);
    assert!(harness.requests.history(&request.id).await.expect("history").is_empty());
    let rejected = harness
        .audit
        .events()
        .into_iter()
        .filter(|event| event.outcome == AuditOutcome::Rejected)
        .count();
    assert_eq!(rejected, 1);
}

async fn cancel_is_terminal(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    let request = open(&harness, EMPLOYEE, RequestType::Personal).await;

    let cancelled = harness.service.cancel(&caller(EMPLOYEE), &request.id).await.expect("cancel");
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    let again = harness.service.cancel(&caller(EMPLOYEE), &request.id).await;
    assert!(matches!(again, Err(ApplicationError::InvalidState(_))));
    let by_manager = harness.service.cancel(&caller(MANAGER), &request.id).await;
    assert!(matches!(by_manager, Err(ApplicationError::Forbidden(_))));
    assert!(harness
        .service
        .list_actionable(&caller(HR))
        .await
        .expect("queue")
        .is_empty());
}

async fn listings_respect_capabilities(backend: Backend) {
    let harness = Harness::new(backend, ServiceSettings::default()).await;
    open(&harness, EMPLOYEE, RequestType::Personal).await;
    open(&harness, EMPLOYEE, RequestType::Sick).await;
    open(&harness, SOLO_EMPLOYEE, RequestType::Sick).await;

    let mine = harness.service.list_mine(&caller(EMPLOYEE)).await.expect("mine");
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|request| request.employee_id.0 == "E1"));

    let page = harness
        .service
        .list_all(&caller(HR), PageRequest::new(0, 2))
        .await
        .expect("all requests");
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);

    let denied = harness.service.list_all(&caller(MANAGER), PageRequest::default()).await;
    assert!(matches!(denied, Err(ApplicationError::Forbidden(_))));
}

async fn attachments_are_stored_and_guarded(backend: Backend) {
    let settings = ServiceSettings { max_attachment_bytes: 16, ..ServiceSettings::default() };
    let harness = Harness::new(backend, settings).await;
    let request = open(&harness, EMPLOYEE, RequestType::Sick).await;

    let stored = harness
        .service
        .upload_attachment(&caller(EMPLOYEE), &request.id, upload("scans/note.pdf", b"certificate"))
        .await
        .expect("upload");
    assert_eq!(stored.file_name, "note.pdf");
    assert_eq!(stored.relative_path, format!("attachments/{}/note.pdf", request.id.0));

    let downloaded = harness
        .service
        .download_attachment(&caller(DOCTOR), &stored.id)
        .await
        .expect("doctor downloads");
    assert_eq!(downloaded.bytes, b"certificate");

    let stranger = harness.service.download_attachment(&caller(SOLO_EMPLOYEE), &stored.id).await;
    assert!(matches!(stranger, Err(ApplicationError::Forbidden(_))));

    let too_large = harness
        .service
        .upload_attachment(&caller(EMPLOYEE), &request.id, upload("big.pdf", &[0_u8; 17]))
        .await;
    assert!(matches!(
        too_large,
        Err(ApplicationError::InvalidState(DomainError::AttachmentTooLarge { .. }))
    ));
    let traversal = harness
        .service
        .upload_attachment(&caller(EMPLOYEE), &request.id, upload("..", b"x"))
        .await;
    assert!(matches!(
        traversal,
        Err(ApplicationError::InvalidState(DomainError::InvalidFileName(_)))
    ));

    let details = harness.service.get(&caller(EMPLOYEE), &request.id).await.expect("details");
    assert_eq!(details.attachments.len(), 1);
    assert_eq!(
        harness.attachments.list_for_request(&request.id).await.expect("list").len(),
        1
    );

    match &harness.memory_attachments {
        Some(store) => store.corrupt(&stored.id, b"tampered".to_vec()).await,
        None => {
            let on_disk = harness.files.path().join(&stored.relative_path);
            assert_eq!(std::fs::read(&on_disk).expect("file on disk"), b"certificate");
            std::fs::write(&on_disk, b"tampered").expect("overwrite stored file");
        }
    }
    let tampered = harness.service.download_attachment(&caller(DOCTOR), &stored.id).await;
    assert!(matches!(tampered, Err(ApplicationError::Persistence(_))));
}

async fn snapshot_routing_ignores_later_workflow_edits(backend: Backend) {
    let snapshot = Harness::new(backend, ServiceSettings::default()).await;
    let live = Harness::new(
        backend,
        ServiceSettings { routing: RoutingMode::Live, ..ServiceSettings::default() },
    )
    .await;

    for harness in [&snapshot, &live] {
        let request = open(harness, EMPLOYEE, RequestType::Personal).await;
        let mut edited = medical_workflow();
        edited.steps[1] = step("MED-2", 2, ApproverCategory::Manager, Some("X1"));
        harness.workflows.save(edited).await.expect("edit workflow");

        let manager = harness.service.can_act(&caller(MANAGER), &request.id).await.expect("check");
        let outsider =
            harness.service.can_act(&caller(OUTSIDER), &request.id).await.expect("check");
        match harness.service.settings().routing {
            RoutingMode::Snapshot => assert!(manager && !outsider),
            RoutingMode::Live => assert!(!manager && outsider),
        }
    }
}
