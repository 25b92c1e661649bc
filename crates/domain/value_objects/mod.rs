pub mod engine_events;
pub mod enums;
pub mod post_processing;
pub mod recordings;
