use serde::{Deserialize, Serialize};

use crate::domain::workflow::WorkflowId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

/// Authenticated identity as handed over by the host application.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub principal_id: Option<PrincipalId>,
    pub name: String,
    pub email: Option<String>,
    pub workflow_id: Option<WorkflowId>,
    pub active: bool,
}

impl Employee {
    pub fn assign_workflow(&mut self, workflow_id: WorkflowId) {
        self.workflow_id = Some(workflow_id);
    }
}
