pub mod handlers;
pub mod queue;
pub mod registry;
pub mod tasks;
