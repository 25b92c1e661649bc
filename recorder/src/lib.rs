pub mod axum_http;
pub mod config;
pub mod recording_engine;
pub mod task_queue;
