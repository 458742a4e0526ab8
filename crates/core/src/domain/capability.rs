use serde::{Deserialize, Serialize};

const CAPABILITY_PREFIX: &str = "AttendanceManagement.ExceptionRequests";
const SHORT_PREFIX: &str = "ExceptionRequests";

/// Permission names understood by the exception request engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Create,
    Approve,
    ApproveAsDoctor,
    ViewAll,
    ViewOwn,
    Delete,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Self::Create,
        Self::Approve,
        Self::ApproveAsDoctor,
        Self::ViewAll,
        Self::ViewOwn,
        Self::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "AttendanceManagement.ExceptionRequests.Create",
            Self::Approve => "AttendanceManagement.ExceptionRequests.Approve",
            Self::ApproveAsDoctor => "AttendanceManagement.ExceptionRequests.ApproveAsDoctor",
            Self::ViewAll => "AttendanceManagement.ExceptionRequests.ViewAll",
            Self::ViewOwn => "AttendanceManagement.ExceptionRequests.ViewOwn",
            Self::Delete => "AttendanceManagement.ExceptionRequests.Delete",
        }
    }

    /// Accepts the fully-qualified name, the `ExceptionRequests.X` short form,
    /// or the bare suffix.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let suffix = trimmed
            .strip_prefix(CAPABILITY_PREFIX)
            .or_else(|| trimmed.strip_prefix(SHORT_PREFIX))
            .map(|rest| rest.trim_start_matches('.'))
            .unwrap_or(trimmed);

        match suffix.to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "approve" => Some(Self::Approve),
            "approveasdoctor" | "approve_as_doctor" => Some(Self::ApproveAsDoctor),
            "viewall" | "view_all" => Some(Self::ViewAll),
            "viewown" | "view_own" => Some(Self::ViewOwn),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}
