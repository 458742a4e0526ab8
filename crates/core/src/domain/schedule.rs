use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::employee::EmployeeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleAssignmentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDay {
    pub weekday: Weekday,
    pub on_site: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub days: Vec<ScheduleDay>,
}

impl Schedule {
    /// A weekday missing from the schedule is treated as remote.
    pub fn is_on_site(&self, weekday: Weekday) -> bool {
        self.days.iter().find(|day| day.weekday == weekday).map(|day| day.on_site).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleAssignment {
    pub id: ScheduleAssignmentId,
    pub employee_id: EmployeeId,
    pub schedule: Schedule,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl ScheduleAssignment {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.map(|to| date <= to).unwrap_or(true)
    }

    pub fn is_on_site(&self, date: NaiveDate) -> bool {
        self.schedule.is_on_site(date.weekday())
    }
}
