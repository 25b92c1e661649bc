use std::{path::PathBuf, time::Duration};
use url::Url;

use super::stage::Stage;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub stage: Stage,
    pub worker_server: WorkerServer,
    pub database: Database,
    pub recording: Recording,
    pub capture: Capture,
    pub task_queue: TaskQueue,
    pub events: Events,
    pub internal_api: InternalApi,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub timeout: u64,
    pub body_limit: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub root: PathBuf,
    pub file_extension: String,
    pub monitor_interval: Duration,
    pub segment_max_duration: Duration,
    pub segment_max_bytes: u64,
    pub stop_grace_period: Duration,
    pub keep_segments: bool,
}

#[derive(Debug, Clone)]
pub struct Capture {
    pub program: String,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaskQueue {
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub stale_threshold: Duration,
    pub sweep_interval: Duration,
    pub history_limit: usize,
    pub remux_enabled: bool,
    pub ffmpeg_program: String,
}

#[derive(Debug, Clone)]
pub struct Events {
    pub webhook_url: Option<Url>,
    pub webhook_timeout: Duration,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct InternalApi {
    pub token: Option<String>,
}
