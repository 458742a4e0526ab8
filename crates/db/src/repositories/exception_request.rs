use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use attendance_core::domain::employee::EmployeeId;
use attendance_core::domain::history::{ApprovalAction, ApprovalHistoryEntry, ApprovalHistoryId};
use attendance_core::domain::request::{
    ExceptionRequest, ExceptionRequestId, RequestStatus, RequestType,
};
use attendance_core::domain::workflow::{WorkflowId, WorkflowStep, WorkflowStepId};
use attendance_core::errors::StoreError;
use attendance_core::ports::{ExceptionRequestStore, Page, PageRequest};

use super::{decode_error, parse_date, parse_timestamp, to_u32, RepositoryError};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, employee_id, exception_date, request_type, reason, status,
     current_step_order, workflow_id, step_snapshot_json, version, created_at, updated_at";

const HISTORY_QUERY: &str = "SELECT id, request_id, workflow_step_id, approver_employee_id,
            step_order, action, notes, acted_at
     FROM exception_request_approval_history
     WHERE request_id = ?
     ORDER BY acted_at ASC, rowid ASC";

/// Exception requests and their append-only approval history.
///
/// Every state change goes through [`SqlExceptionRequestRepository::update`], which
/// compares the stored `version` and writes the history entry in one transaction.
pub struct SqlExceptionRequestRepository {
    pool: DbPool,
}

impl SqlExceptionRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, request: &ExceptionRequest) -> Result<(), RepositoryError> {
        let snapshot = encode_snapshot(request.step_snapshot.as_deref())?;
        sqlx::query(
            "INSERT INTO exception_request
                 (id, employee_id, exception_date, request_type, reason, status,
                  current_step_order, workflow_id, step_snapshot_json, version,
                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.employee_id.0)
        .bind(request.exception_date.to_string())
        .bind(request.request_type.as_str())
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(i64::from(request.current_step_order))
        .bind(&request.workflow_id.0)
        .bind(snapshot)
        .bind(i64::from(request.version))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<ExceptionRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM exception_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    pub async fn list_pending(&self) -> Result<Vec<ExceptionRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM exception_request
             WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }

    pub async fn list_by_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<ExceptionRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM exception_request
             WHERE employee_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(&employee_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }

    pub async fn list_all(
        &self,
        page: PageRequest,
    ) -> Result<Page<ExceptionRequest>, RepositoryError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM exception_request")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;

        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM exception_request
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(page.take))
        .bind(i64::from(page.skip))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            total: u64::try_from(total).map_err(decode_error)?,
            items: rows.iter().map(request_from_row).collect::<Result<Vec<_>, _>>()?,
        })
    }

    pub async fn update(
        &self,
        request: &ExceptionRequest,
        expected_version: u32,
        entry: Option<&ApprovalHistoryEntry>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE exception_request
             SET status = ?, current_step_order = ?, version = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(request.status.as_str())
        .bind(i64::from(request.current_step_order))
        .bind(i64::from(request.version))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 AS present FROM exception_request WHERE id = ?")
                .bind(&request.id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            tracing::warn!(
                event_name = "exception_request.version_conflict",
                request_id = %request.id.0,
                expected_version,
                exists,
                "exception request update lost the version race"
            );
            return Err(if exists {
                RepositoryError::VersionConflict {
                    entity: "exception_request",
                    id: request.id.0.clone(),
                    expected_version,
                }
            } else {
                RepositoryError::NotFound { entity: "exception_request", id: request.id.0.clone() }
            });
        }

        if let Some(entry) = entry {
            sqlx::query(
                "INSERT INTO exception_request_approval_history
                     (id, request_id, workflow_step_id, approver_employee_id, step_order,
                      action, notes, acted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.id.0)
            .bind(&entry.request_id.0)
            .bind(&entry.workflow_step_id.0)
            .bind(entry.approver.as_ref().map(|approver| approver.0.as_str()))
            .bind(i64::from(entry.step_order))
            .bind(entry.action.as_str())
            .bind(entry.notes.as_deref())
            .bind(entry.acted_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn history(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, RepositoryError> {
        let rows = sqlx::query(HISTORY_QUERY).bind(&request_id.0).fetch_all(&self.pool).await?;
        rows.iter().map(history_from_row).collect()
    }

    /// Reads the request and its history inside one transaction so both come
    /// from the same committed state.
    pub async fn find_with_history(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<(ExceptionRequest, Vec<ApprovalHistoryEntry>)>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM exception_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let request = request_from_row(&row)?;
        let rows = sqlx::query(HISTORY_QUERY).bind(&id.0).fetch_all(&mut *tx).await?;
        let history = rows.iter().map(history_from_row).collect::<Result<Vec<_>, _>>()?;
        tx.commit().await?;
        Ok(Some((request, history)))
    }
}

fn encode_snapshot(steps: Option<&[WorkflowStep]>) -> Result<Option<String>, RepositoryError> {
    steps.map(|steps| serde_json::to_string(steps).map_err(decode_error)).transpose()
}

fn request_from_row(row: &SqliteRow) -> Result<ExceptionRequest, RepositoryError> {
    let request_type: String = row.try_get("request_type").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let exception_date: String = row.try_get("exception_date").map_err(decode_error)?;
    let snapshot: Option<String> = row.try_get("step_snapshot_json").map_err(decode_error)?;
    let current_step_order: i64 = row.try_get("current_step_order").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(ExceptionRequest {
        id: ExceptionRequestId(row.try_get("id").map_err(decode_error)?),
        employee_id: EmployeeId(row.try_get("employee_id").map_err(decode_error)?),
        exception_date: parse_date(&exception_date)?,
        request_type: RequestType::parse(&request_type).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown request type `{request_type}`"))
        })?,
        reason: row.try_get("reason").map_err(decode_error)?,
        status: RequestStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status}`")))?,
        current_step_order: to_u32("current_step_order", current_step_order)?,
        workflow_id: WorkflowId(row.try_get("workflow_id").map_err(decode_error)?),
        step_snapshot: snapshot
            .as_deref()
            .map(serde_json::from_str::<Vec<WorkflowStep>>)
            .transpose()
            .map_err(decode_error)?,
        version: to_u32("version", version)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<ApprovalHistoryEntry, RepositoryError> {
    let approver: Option<String> = row.try_get("approver_employee_id").map_err(decode_error)?;
    let action: String = row.try_get("action").map_err(decode_error)?;
    let step_order: i64 = row.try_get("step_order").map_err(decode_error)?;
    let acted_at: String = row.try_get("acted_at").map_err(decode_error)?;

    Ok(ApprovalHistoryEntry {
        id: ApprovalHistoryId(row.try_get("id").map_err(decode_error)?),
        request_id: ExceptionRequestId(row.try_get("request_id").map_err(decode_error)?),
        workflow_step_id: WorkflowStepId(row.try_get("workflow_step_id").map_err(decode_error)?),
        approver: approver.map(EmployeeId),
        step_order: to_u32("step_order", step_order)?,
        action: ApprovalAction::parse(&action)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown approval action `{action}`")))?,
        notes: row.try_get("notes").map_err(decode_error)?,
        acted_at: parse_timestamp(&acted_at)?,
    })
}

#[async_trait::async_trait]
impl ExceptionRequestStore for SqlExceptionRequestRepository {
    async fn insert(&self, request: ExceptionRequest) -> Result<(), StoreError> {
        Ok(SqlExceptionRequestRepository::insert(self, &request).await?)
    }

    async fn find_by_id(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<ExceptionRequest>, StoreError> {
        Ok(SqlExceptionRequestRepository::find_by_id(self, id).await?)
    }

    async fn list_pending(&self) -> Result<Vec<ExceptionRequest>, StoreError> {
        Ok(SqlExceptionRequestRepository::list_pending(self).await?)
    }

    async fn list_by_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Vec<ExceptionRequest>, StoreError> {
        Ok(SqlExceptionRequestRepository::list_by_employee(self, employee_id).await?)
    }

    async fn list_all(&self, page: PageRequest) -> Result<Page<ExceptionRequest>, StoreError> {
        Ok(SqlExceptionRequestRepository::list_all(self, page).await?)
    }

    async fn update(
        &self,
        request: ExceptionRequest,
        expected_version: u32,
        entry: Option<ApprovalHistoryEntry>,
    ) -> Result<(), StoreError> {
        Ok(SqlExceptionRequestRepository::update(self, &request, expected_version, entry.as_ref())
            .await?)
    }

    async fn history(
        &self,
        request_id: &ExceptionRequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, StoreError> {
        Ok(SqlExceptionRequestRepository::history(self, request_id).await?)
    }

    async fn find_with_history(
        &self,
        id: &ExceptionRequestId,
    ) -> Result<Option<(ExceptionRequest, Vec<ApprovalHistoryEntry>)>, StoreError> {
        Ok(SqlExceptionRequestRepository::find_with_history(self, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use attendance_core::domain::employee::{Employee, EmployeeId};
    use attendance_core::domain::history::ApprovalAction;
    use attendance_core::domain::request::{
        ExceptionRequest, ExceptionRequestId, NewExceptionRequest, RequestStatus, RequestType,
    };
    use attendance_core::domain::workflow::{
        ApproverCategory, WorkflowDefinition, WorkflowId, WorkflowStep, WorkflowStepId,
    };

    use super::SqlExceptionRequestRepository;
    use crate::repositories::{SqlEmployeeRepository, SqlWorkflowRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn find_with_history_reads_request_and_entries_together() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let workflow = WorkflowDefinition {
            id: WorkflowId("WF-1".to_string()),
            name: "Manager then HR".to_string(),
            description: None,
            active: true,
            steps: vec![
                WorkflowStep::new(
                    WorkflowStepId("S1".to_string()),
                    1,
                    ApproverCategory::Manager,
                    Some(EmployeeId("M1".to_string())),
                ),
                WorkflowStep::new(
                    WorkflowStepId("S2".to_string()),
                    2,
                    ApproverCategory::HrManager,
                    Some(EmployeeId("H1".to_string())),
                ),
            ],
        };
        SqlWorkflowRepository::new(pool.clone()).save(&workflow).await.expect("save workflow");
        SqlEmployeeRepository::new(pool.clone())
            .save(&Employee {
                id: EmployeeId("E1".to_string()),
                principal_id: None,
                name: "Erin".to_string(),
                email: None,
                workflow_id: Some(workflow.id.clone()),
                active: true,
            })
            .await
            .expect("save employee");

        let repo = SqlExceptionRequestRepository::new(pool);
        let (mut request, _) = ExceptionRequest::open(
            EmployeeId("E1".to_string()),
            NewExceptionRequest {
                exception_date: NaiveDate::from_ymd_opt(2026, 3, 9).expect("date"),
                request_type: RequestType::Personal,
                reason: "moving house".to_string(),
            },
            &workflow,
            true,
            Utc::now(),
        );
        repo.insert(&request).await.expect("insert");

        let steps = workflow.steps.clone();
        let outcome = request
            .record_action(
                &steps,
                &steps[0],
                ApprovalAction::Approved,
                Some(EmployeeId("M1".to_string())),
                None,
                Utc::now(),
            )
            .expect("record action");
        repo.update(&request, 1, Some(&outcome.entry)).await.expect("update");

        let (stored, history) =
            repo.find_with_history(&request.id).await.expect("read").expect("exists");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(stored.current_step_order, 2);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].step_order, 1);

        let missing = repo
            .find_with_history(&ExceptionRequestId("ER-missing".to_string()))
            .await
            .expect("read");
        assert!(missing.is_none());
    }
}
