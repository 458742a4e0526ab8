//! Who may act on a request's current step, and which pending requests show up
//! in an actor's approval queue.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::capability::Capability;
use crate::domain::employee::{Employee, EmployeeId, PrincipalId};
use crate::domain::request::{ExceptionRequest, RequestType};
use crate::domain::workflow::{self, ApproverCategory, WorkflowStep};
use crate::errors::DomainError;

/// Caller identity with its employee record and granted capabilities resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub principal_id: PrincipalId,
    pub employee: Option<Employee>,
    pub capabilities: HashSet<Capability>,
}

impl Actor {
    pub fn new(
        principal_id: PrincipalId,
        employee: Option<Employee>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self { principal_id, employee, capabilities: capabilities.into_iter().collect() }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_any(&self, capabilities: &[Capability]) -> bool {
        capabilities.iter().any(|capability| self.has(*capability))
    }

    pub fn employee_id(&self) -> Option<&EmployeeId> {
        self.employee.as_ref().map(|employee| &employee.id)
    }
}

/// How a step's approver category is authorized. Each category maps to exactly
/// one strategy; adding a category forces a decision here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepAuthority<'a> {
    /// Any holder of the capability may act, with or without an employee record.
    CapabilityHolder(Capability),
    /// Only the named employee may act; capabilities never substitute.
    DesignatedEmployee(Option<&'a EmployeeId>),
}

pub fn step_authority(step: &WorkflowStep) -> StepAuthority<'_> {
    match step.category {
        ApproverCategory::Doctor => StepAuthority::CapabilityHolder(Capability::ApproveAsDoctor),
        ApproverCategory::Manager | ApproverCategory::HrManager => {
            StepAuthority::DesignatedEmployee(step.approver.as_ref())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorizationFailure {
    MissingCapability { capability: Capability },
    NoEmployeeRecord,
    StepHasNoApprover { step_order: u32 },
    NotDesignatedApprover { step_order: u32 },
}

impl AuthorizationFailure {
    pub fn reason(&self) -> String {
        match self {
            Self::MissingCapability { capability } => {
                format!("missing capability `{}`", capability.as_str())
            }
            Self::NoEmployeeRecord => "no employee record for current user".to_string(),
            Self::StepHasNoApprover { step_order } => {
                format!("step {step_order} has no designated approver")
            }
            Self::NotDesignatedApprover { step_order } => {
                format!("not the designated approver for step {step_order}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationDecision {
    /// `approver` is what goes into the history entry.
    Allowed { approver: Option<EmployeeId> },
    Denied(AuthorizationFailure),
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

pub fn authorize_step(actor: &Actor, step: &WorkflowStep) -> AuthorizationDecision {
    match step_authority(step) {
        StepAuthority::CapabilityHolder(capability) => {
            if actor.has(capability) {
                AuthorizationDecision::Allowed { approver: actor.employee_id().cloned() }
            } else {
                AuthorizationDecision::Denied(AuthorizationFailure::MissingCapability {
                    capability,
                })
            }
        }
        StepAuthority::DesignatedEmployee(designated) => {
            let Some(employee_id) = actor.employee_id() else {
                return AuthorizationDecision::Denied(AuthorizationFailure::NoEmployeeRecord);
            };
            match designated {
                Some(designated) if designated == employee_id => {
                    AuthorizationDecision::Allowed { approver: Some(employee_id.clone()) }
                }
                Some(_) => {
                    AuthorizationDecision::Denied(AuthorizationFailure::NotDesignatedApprover {
                        step_order: step.step_order,
                    })
                }
                None => AuthorizationDecision::Denied(AuthorizationFailure::StepHasNoApprover {
                    step_order: step.step_order,
                }),
            }
        }
    }
}

/// Resolves the request's current step in `steps` and authorizes the actor on it.
pub fn authorize_current_step<'s>(
    actor: &Actor,
    request: &ExceptionRequest,
    steps: &'s [WorkflowStep],
) -> Result<(&'s WorkflowStep, AuthorizationDecision), DomainError> {
    let step = workflow::step_at(steps, request.current_step_order)
        .ok_or(DomainError::StepNotFound { step_order: request.current_step_order })?;
    Ok((step, authorize_step(actor, step)))
}

pub fn can_act(
    actor: &Actor,
    request: &ExceptionRequest,
    steps: &[WorkflowStep],
) -> Result<bool, DomainError> {
    authorize_current_step(actor, request, steps).map(|(_, decision)| decision.is_allowed())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inclusion {
    Oversight,
    DoctorQueue,
    DesignatedApprover,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    NotPending,
    StepMissing,
    NotSickRequest,
    NoDoctorCapability,
    NoEmployeeRecord,
    StepHasNoApprover,
    NotDesignatedApprover,
    StepDrift,
}

/// Queue membership for one request. Holders of `ViewAll` see every pending
/// request; doctors only see sick requests sitting at a doctor step; everyone
/// else sees requests whose current step names them.
pub fn actionable(
    actor: &Actor,
    request: &ExceptionRequest,
    steps: &[WorkflowStep],
) -> Result<Inclusion, Exclusion> {
    if !request.is_pending() {
        return Err(Exclusion::NotPending);
    }
    if actor.has(Capability::ViewAll) {
        return Ok(Inclusion::Oversight);
    }

    let step = workflow::step_at(steps, request.current_step_order).ok_or(Exclusion::StepMissing)?;

    match step_authority(step) {
        StepAuthority::CapabilityHolder(capability) => {
            if !actor.has(capability) {
                return Err(Exclusion::NoDoctorCapability);
            }
            if request.request_type != RequestType::Sick {
                return Err(Exclusion::NotSickRequest);
            }
            Ok(Inclusion::DoctorQueue)
        }
        StepAuthority::DesignatedEmployee(designated) => {
            let employee_id = actor.employee_id().ok_or(Exclusion::NoEmployeeRecord)?;
            let designated = designated.ok_or(Exclusion::StepHasNoApprover)?;
            if designated != employee_id {
                return Err(Exclusion::NotDesignatedApprover);
            }
            if request.current_step_order != step.step_order {
                return Err(Exclusion::StepDrift);
            }
            Ok(Inclusion::DesignatedApprover)
        }
    }
}
