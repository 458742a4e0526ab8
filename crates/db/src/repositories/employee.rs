use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use attendance_core::domain::employee::{Employee, EmployeeId, PrincipalId};
use attendance_core::domain::workflow::WorkflowId;
use attendance_core::errors::StoreError;
use attendance_core::ports::EmployeeDirectory;

use super::{decode_error, RepositoryError};
use crate::DbPool;

const EMPLOYEE_COLUMNS: &str = "id, principal_id, name, email, workflow_id, active";

pub struct SqlEmployeeRepository {
    pool: DbPool,
}

impl SqlEmployeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, employee: &Employee) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO employee (id, principal_id, name, email, workflow_id, active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 principal_id = excluded.principal_id,
                 name = excluded.name,
                 email = excluded.email,
                 workflow_id = excluded.workflow_id,
                 active = excluded.active",
        )
        .bind(&employee.id.0)
        .bind(employee.principal_id.as_ref().map(|principal| principal.0.as_str()))
        .bind(&employee.name)
        .bind(employee.email.as_deref())
        .bind(employee.workflow_id.as_ref().map(|workflow| workflow.0.as_str()))
        .bind(employee.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(employee_from_row).transpose()
    }

    pub async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<Employee>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE principal_id = ?"))
                .bind(&principal_id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(employee_from_row).transpose()
    }
}

fn employee_from_row(row: &SqliteRow) -> Result<Employee, RepositoryError> {
    let principal_id: Option<String> = row.try_get("principal_id").map_err(decode_error)?;
    let workflow_id: Option<String> = row.try_get("workflow_id").map_err(decode_error)?;
    Ok(Employee {
        id: EmployeeId(row.try_get("id").map_err(decode_error)?),
        principal_id: principal_id.map(PrincipalId),
        name: row.try_get("name").map_err(decode_error)?,
        email: row.try_get("email").map_err(decode_error)?,
        workflow_id: workflow_id.map(WorkflowId),
        active: row.try_get("active").map_err(decode_error)?,
    })
}

#[async_trait::async_trait]
impl EmployeeDirectory for SqlEmployeeRepository {
    async fn find_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<Employee>, StoreError> {
        Ok(SqlEmployeeRepository::find_by_principal(self, principal_id).await?)
    }

    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        Ok(SqlEmployeeRepository::find_by_id(self, id).await?)
    }
}
