pub mod recordings;
pub mod tasks;
