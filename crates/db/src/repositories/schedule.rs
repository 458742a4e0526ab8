use chrono::{Datelike, NaiveDate, Weekday};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use attendance_core::domain::employee::EmployeeId;
use attendance_core::domain::schedule::{
    Schedule, ScheduleAssignment, ScheduleAssignmentId, ScheduleDay, ScheduleId,
};
use attendance_core::errors::StoreError;
use attendance_core::ports::ScheduleStore;

use super::{decode_error, parse_date, RepositoryError};
use crate::DbPool;

pub struct SqlScheduleRepository {
    pool: DbPool,
}

impl SqlScheduleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_schedule(&self, schedule: &Schedule) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO schedule (id, name) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(&schedule.id.0)
        .bind(&schedule.name)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM schedule_day WHERE schedule_id = ?")
            .bind(&schedule.id.0)
            .execute(&mut *tx)
            .await?;

        for day in &schedule.days {
            sqlx::query("INSERT INTO schedule_day (schedule_id, weekday, on_site) VALUES (?, ?, ?)")
                .bind(&schedule.id.0)
                .bind(i64::from(day.weekday.num_days_from_monday()))
                .bind(day.on_site)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Stores the assignment and the schedule it points at.
    pub async fn save_assignment(
        &self,
        assignment: &ScheduleAssignment,
    ) -> Result<(), RepositoryError> {
        self.save_schedule(&assignment.schedule).await?;
        sqlx::query(
            "INSERT INTO schedule_assignment
                 (id, employee_id, schedule_id, effective_from, effective_to)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 schedule_id = excluded.schedule_id,
                 effective_from = excluded.effective_from,
                 effective_to = excluded.effective_to",
        )
        .bind(&assignment.id.0)
        .bind(&assignment.employee_id.0)
        .bind(&assignment.schedule.id.0)
        .bind(assignment.effective_from.to_string())
        .bind(assignment.effective_to.map(|date| date.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn active_assignments(
        &self,
        employee_id: &EmployeeId,
        date: NaiveDate,
    ) -> Result<Vec<ScheduleAssignment>, RepositoryError> {
        let date = date.to_string();
        let rows = sqlx::query(
            "SELECT a.id, a.employee_id, a.effective_from, a.effective_to,
                    s.id AS schedule_id, s.name AS schedule_name
             FROM schedule_assignment a
             JOIN schedule s ON s.id = a.schedule_id
             WHERE a.employee_id = ?
               AND a.effective_from <= ?
               AND (a.effective_to IS NULL OR a.effective_to >= ?)
             ORDER BY a.effective_from DESC, a.id DESC",
        )
        .bind(&employee_id.0)
        .bind(&date)
        .bind(&date)
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = Vec::with_capacity(rows.len());
        for row in &rows {
            let schedule_id: String = row.try_get("schedule_id").map_err(decode_error)?;
            let days = self.schedule_days(&schedule_id).await?;
            assignments.push(assignment_from_row(row, days)?);
        }
        Ok(assignments)
    }

    async fn schedule_days(&self, schedule_id: &str) -> Result<Vec<ScheduleDay>, RepositoryError> {
        sqlx::query(
            "SELECT weekday, on_site FROM schedule_day WHERE schedule_id = ? ORDER BY weekday",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| -> Result<ScheduleDay, RepositoryError> {
            let weekday: i64 = row.try_get("weekday").map_err(decode_error)?;
            Ok(ScheduleDay {
                weekday: weekday_from_index(weekday)?,
                on_site: row.try_get("on_site").map_err(decode_error)?,
            })
        })
        .collect()
    }
}

fn weekday_from_index(index: i64) -> Result<Weekday, RepositoryError> {
    match index {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        other => Err(RepositoryError::Decode(format!("weekday index out of range: {other}"))),
    }
}

fn assignment_from_row(
    row: &SqliteRow,
    days: Vec<ScheduleDay>,
) -> Result<ScheduleAssignment, RepositoryError> {
    let effective_from: String = row.try_get("effective_from").map_err(decode_error)?;
    let effective_to: Option<String> = row.try_get("effective_to").map_err(decode_error)?;
    Ok(ScheduleAssignment {
        id: ScheduleAssignmentId(row.try_get("id").map_err(decode_error)?),
        employee_id: EmployeeId(row.try_get("employee_id").map_err(decode_error)?),
        schedule: Schedule {
            id: ScheduleId(row.try_get("schedule_id").map_err(decode_error)?),
            name: row.try_get("schedule_name").map_err(decode_error)?,
            days,
        },
        effective_from: parse_date(&effective_from)?,
        effective_to: effective_to.as_deref().map(parse_date).transpose()?,
    })
}

#[async_trait::async_trait]
impl ScheduleStore for SqlScheduleRepository {
    async fn active_assignments(
        &self,
        employee_id: &EmployeeId,
        date: NaiveDate,
    ) -> Result<Vec<ScheduleAssignment>, StoreError> {
        Ok(SqlScheduleRepository::active_assignments(self, employee_id, date).await?)
    }
}
