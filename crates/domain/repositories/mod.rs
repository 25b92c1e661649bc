pub mod event_bridge;
pub mod recordings;
pub mod streams;
