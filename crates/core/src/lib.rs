pub mod approvals;
pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod schedule;
pub mod service;

pub use chrono;

pub use approvals::{Actor, AuthorizationDecision, AuthorizationFailure, Exclusion, Inclusion};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::capability::Capability;
pub use domain::employee::{Employee, EmployeeId, PrincipalId};
pub use domain::history::{ApprovalAction, ApprovalHistoryEntry};
pub use domain::request::{
    ExceptionRequest, ExceptionRequestId, NewExceptionRequest, RequestStatus, RequestType,
};
pub use domain::workflow::{ApproverCategory, WorkflowDefinition, WorkflowId, WorkflowStep};
pub use errors::{ApplicationError, DomainError, InterfaceError, StoreError};
pub use service::{CallerContext, ExceptionRequestService, ServiceDependencies, ServiceSettings};
