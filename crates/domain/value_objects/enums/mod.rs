pub mod failure_reasons;
pub mod recording_statuses;
pub mod task_statuses;
pub mod task_types;
