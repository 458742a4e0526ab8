use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::request::RequestStatus;
use crate::domain::workflow::WorkflowValidationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("request is already {}; only pending requests accept this operation", .status.as_str())]
    RequestNotPending { status: RequestStatus },
    #[error("step {actual} is not the current step {expected}")]
    StaleStep { expected: u32, actual: u32 },
    #[error("workflow has no step with order {step_order}")]
    StepNotFound { step_order: u32 },
    #[error("no workflow assigned to employee `{employee_id}`")]
    NoWorkflowAssigned { employee_id: String },
    #[error("no active schedule covers {date}")]
    NoActiveSchedule { date: NaiveDate },
    #[error("{date} is not a scheduled on-site day")]
    NotOnSiteDay { date: NaiveDate },
    #[error("attachment of {size_bytes} bytes exceeds the {limit} byte limit")]
    AttachmentTooLarge { size_bytes: u64, limit: u64 },
    #[error("attachment file name `{0}` is not allowed")]
    InvalidFileName(String),
    #[error(transparent)]
    InvalidWorkflow(#[from] WorkflowValidationError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure reported by a collaborator store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} `{id}` was modified concurrently (expected version {expected_version})")]
    VersionConflict { entity: &'static str, id: String, expected_version: u32 },
    #[error("{entity} `{id}` not found in store")]
    NotFound { entity: &'static str, id: String },
    #[error("store refused invalid workflow: {0}")]
    InvalidWorkflow(WorkflowValidationError),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    InvalidState(#[from] DomainError),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("request `{request_id}` changed concurrently (expected version {expected_version})")]
    Conflict { request_id: String, expected_version: u32 },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Stable label used in logs and audit metadata.
    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::VersionConflict { id, expected_version, .. } => {
                Self::Conflict { request_id: id, expected_version }
            }
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::InvalidWorkflow(error) => Self::InvalidState(error.into()),
            StoreError::Backend(message) => Self::Persistence(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Forbidden { .. } => "You are not authorized to act on this request at this step.",
            Self::Conflict { .. } => {
                "The request was updated by someone else. Reload it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Forbidden { .. } => 403,
            Self::Conflict { .. } => 409,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::NotFound { .. } => Self::NotFound { message, correlation_id },
            ApplicationError::InvalidState(_) => Self::BadRequest { message, correlation_id },
            ApplicationError::Forbidden(_) => Self::Forbidden { message, correlation_id },
            ApplicationError::Conflict { .. } => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(_) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(_) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::request::RequestStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError, StoreError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::RequestNotPending {
            status: RequestStatus::Approved,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.status_code(), 400);
    }

    #[test]
    fn forbidden_and_invalid_state_stay_distinct() {
        let forbidden = ApplicationError::forbidden("not your turn").into_interface("req-2");
        let decided = ApplicationError::from(DomainError::RequestNotPending {
            status: RequestStatus::Rejected,
        })
        .into_interface("req-2");

        assert_eq!(forbidden.status_code(), 403);
        assert_eq!(decided.status_code(), 400);
        assert_ne!(forbidden.user_message(), decided.user_message());
    }

    #[test]
    fn store_version_conflict_becomes_conflict() {
        let error = ApplicationError::from(StoreError::VersionConflict {
            entity: "exception_request",
            id: "ER-1".to_owned(),
            expected_version: 3,
        });

        assert_eq!(
            error,
            ApplicationError::Conflict { request_id: "ER-1".to_owned(), expected_version: 3 }
        );
        assert_eq!(error.class(), "conflict");
        assert_eq!(error.into_interface("req-3").status_code(), 409);
    }

    #[test]
    fn backend_failure_maps_to_service_unavailable() {
        let interface = ApplicationError::from(StoreError::Backend("database lock timeout".into()))
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        let interface =
            ApplicationError::not_found("exception_request", "ER-404").into_interface("req-5");
        assert_eq!(interface.status_code(), 404);
        assert!(interface.to_string().contains("ER-404"));
    }
}
