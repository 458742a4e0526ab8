use std::sync::Arc;

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::domain::employee::EmployeeId;
use crate::domain::schedule::ScheduleAssignment;
use crate::errors::ApplicationError;
use crate::ports::ScheduleStore;

/// Answers whether a date is a mandated on-site day for an employee.
#[derive(Clone)]
pub struct ScheduleGate {
    store: Arc<dyn ScheduleStore>,
}

impl ScheduleGate {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    /// Fails with `NotFound` when no assignment covers `date`.
    pub async fn is_on_site_day(
        &self,
        employee_id: &EmployeeId,
        date: NaiveDate,
    ) -> Result<bool, ApplicationError> {
        let assignments = self.store.active_assignments(employee_id, date).await?;
        let assignment = select_assignment(&assignments, date).ok_or_else(|| {
            ApplicationError::not_found("schedule_assignment", format!("{}@{date}", employee_id.0))
        })?;

        let on_site = assignment.is_on_site(date);
        tracing::debug!(
            event_name = "schedule.on_site_checked",
            employee_id = %employee_id.0,
            %date,
            assignment_id = %assignment.id.0,
            on_site,
            "schedule gate evaluated"
        );
        Ok(on_site)
    }

    pub async fn is_on_site_today(
        &self,
        employee_id: &EmployeeId,
        clock: &dyn Clock,
    ) -> Result<bool, ApplicationError> {
        self.is_on_site_day(employee_id, clock.today()).await
    }
}

/// Picks the covering assignment with the latest `effective_from`. Overlaps are
/// a data error upstream; ties resolve on the assignment id.
pub fn select_assignment(
    assignments: &[ScheduleAssignment],
    date: NaiveDate,
) -> Option<&ScheduleAssignment> {
    assignments
        .iter()
        .filter(|assignment| assignment.covers(date))
        .max_by(|left, right| {
            left.effective_from
                .cmp(&right.effective_from)
                .then_with(|| left.id.0.cmp(&right.id.0))
        })
}
