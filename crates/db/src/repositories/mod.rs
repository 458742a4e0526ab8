use thiserror::Error;

use attendance_core::domain::workflow::WorkflowValidationError;
use attendance_core::errors::StoreError;

pub mod capability;
pub mod employee;
pub mod exception_request;
pub mod memory;
pub mod schedule;
pub mod workflow;

pub use capability::SqlCapabilityRepository;
pub use employee::SqlEmployeeRepository;
pub use exception_request::SqlExceptionRequestRepository;
pub use memory::{
    InMemoryAttachmentStore, InMemoryCapabilityRepository, InMemoryEmployeeRepository,
    InMemoryExceptionRequestRepository, InMemoryScheduleRepository, InMemoryWorkflowRepository,
};
pub use schedule::SqlScheduleRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was modified concurrently (expected version {expected_version})")]
    VersionConflict { entity: &'static str, id: String, expected_version: u32 },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    InvalidWorkflow(#[from] WorkflowValidationError),
    #[error("attachment storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("attachment `{id}` content does not match its recorded digest")]
    ContentMismatch { id: String },
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::VersionConflict { entity, id, expected_version } => {
                Self::VersionConflict { entity, id, expected_version }
            }
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::InvalidWorkflow(error) => Self::InvalidWorkflow(error),
            other => Self::Backend(other.to_string()),
        }
    }
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, RepositoryError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&chrono::Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

pub(crate) fn parse_date(value: &str) -> Result<chrono::NaiveDate, RepositoryError> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("invalid date `{value}`: {error}")))
}

pub(crate) fn to_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("column `{column}` out of range: {value}")))
}
