use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use attendance_core::domain::employee::EmployeeId;
use attendance_core::domain::workflow::{
    ApproverCategory, WorkflowDefinition, WorkflowId, WorkflowStep, WorkflowStepId,
};
use attendance_core::errors::StoreError;
use attendance_core::ports::WorkflowStore;

use super::{decode_error, to_u32, RepositoryError};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, description, active FROM workflow WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_active(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        self.list(true).await
    }

    /// Every stored workflow, inactive ones included.
    pub async fn list_all(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        self.list(false).await
    }

    async fn list(&self, active_only: bool) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, description, active FROM workflow
             WHERE active = 1 OR ? = 0
             ORDER BY name, id",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            workflows.push(self.hydrate(row).await?);
        }
        Ok(workflows)
    }

    /// Validates, then replaces the workflow header and its full step list.
    pub async fn save(&self, workflow: &WorkflowDefinition) -> Result<(), RepositoryError> {
        workflow.validate()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow (id, name, description, active) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 active = excluded.active",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.name)
        .bind(workflow.description.as_deref())
        .bind(workflow.active)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM workflow_step WHERE workflow_id = ?")
            .bind(&workflow.id.0)
            .execute(&mut *tx)
            .await?;

        for step in &workflow.steps {
            sqlx::query(
                "INSERT INTO workflow_step
                     (id, workflow_id, step_order, approver_category, approver_employee_id)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&workflow.id.0)
            .bind(i64::from(step.step_order))
            .bind(step.category.as_str())
            .bind(step.approver.as_ref().map(|approver| approver.0.as_str()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            event_name = "workflow.saved",
            workflow_id = %workflow.id.0,
            steps = workflow.steps.len(),
            "workflow persisted"
        );
        Ok(())
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<WorkflowDefinition, RepositoryError> {
        let id: String = row.try_get("id").map_err(decode_error)?;
        let steps = sqlx::query(
            "SELECT id, step_order, approver_category, approver_employee_id
             FROM workflow_step WHERE workflow_id = ? ORDER BY step_order",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(step_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(WorkflowDefinition {
            id: WorkflowId(id),
            name: row.try_get("name").map_err(decode_error)?,
            description: row.try_get("description").map_err(decode_error)?,
            active: row.try_get("active").map_err(decode_error)?,
            steps,
        })
    }
}

fn step_from_row(row: &SqliteRow) -> Result<WorkflowStep, RepositoryError> {
    let category: String = row.try_get("approver_category").map_err(decode_error)?;
    let category = ApproverCategory::parse(&category)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approver category `{category}`")))?;
    let approver: Option<String> = row.try_get("approver_employee_id").map_err(decode_error)?;
    let step_order: i64 = row.try_get("step_order").map_err(decode_error)?;

    Ok(WorkflowStep::new(
        WorkflowStepId(row.try_get("id").map_err(decode_error)?),
        to_u32("step_order", step_order)?,
        category,
        approver.map(EmployeeId),
    ))
}

#[async_trait::async_trait]
impl WorkflowStore for SqlWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(SqlWorkflowRepository::find_by_id(self, id).await?)
    }

    async fn list_active(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        Ok(SqlWorkflowRepository::list_active(self).await?)
    }

    async fn save(&self, workflow: WorkflowDefinition) -> Result<(), StoreError> {
        Ok(SqlWorkflowRepository::save(self, &workflow).await?)
    }
}
