pub mod attachment;
pub mod capability;
pub mod employee;
pub mod history;
pub mod request;
pub mod schedule;
pub mod workflow;
