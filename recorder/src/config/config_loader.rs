use super::{
    config_model::{
        Capture, Database, DotEnvyConfig, Events, InternalApi, Recording, TaskQueue,
        WorkerServer,
    },
    stage::Stage,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};
use url::Url;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let worker_server = WorkerServer {
        port: std::env::var("SERVER_PORT_WORKER")
            .context("SERVER_PORT_WORKER is invalid")?
            .parse()
            .context("SERVER_PORT_WORKER is invalid")?,
        body_limit: env_or("SERVER_BODY_LIMIT", 1)?,
        timeout: env_or("SERVER_TIMEOUT", 30)?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").context("DATABASE_URL is invalid")?,
        max_connections: env_or("DATABASE_MAX_CONNECTIONS", 8)?,
    };

    let file_extension = std::env::var("RECORDING_FILE_EXTENSION")
        .unwrap_or_else(|_| "ts".to_string())
        .trim()
        .trim_start_matches('.')
        .to_string();

    let recording = Recording {
        root: PathBuf::from(
            std::env::var("RECORDING_ROOT").unwrap_or_else(|_| "/var/recordings".to_string()),
        ),
        file_extension,
        monitor_interval: Duration::from_secs(env_or("RECORDING_MONITOR_INTERVAL_SECS", 600)?),
        segment_max_duration: Duration::from_secs(env_or(
            "RECORDING_SEGMENT_MAX_DURATION_SECS",
            6 * 60 * 60,
        )?),
        segment_max_bytes: env_or::<u64>("RECORDING_SEGMENT_MAX_SIZE_MB", 8192)?
            .checked_mul(1024 * 1024)
            .context("RECORDING_SEGMENT_MAX_SIZE_MB is too large")?,
        stop_grace_period: Duration::from_secs(env_or("RECORDING_STOP_GRACE_SECS", 5)?),
        keep_segments: env_or("RECORDING_KEEP_SEGMENTS", false)?,
    };

    let capture = Capture {
        program: std::env::var("CAPTURE_PROGRAM").unwrap_or_else(|_| "streamlink".to_string()),
        extra_args: std::env::var("CAPTURE_EXTRA_ARGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    };

    let task_queue = TaskQueue {
        concurrency: env_or::<usize>("TASK_QUEUE_CONCURRENCY", 2)?.max(1),
        max_retries: env_or("TASK_QUEUE_MAX_RETRIES", 3)?,
        backoff_base: Duration::from_millis(env_or("TASK_QUEUE_BACKOFF_BASE_MS", 5_000)?),
        backoff_max: Duration::from_millis(env_or("TASK_QUEUE_BACKOFF_MAX_MS", 300_000)?),
        stale_threshold: Duration::from_secs(env_or("TASK_QUEUE_STALE_SECS", 1_800)?),
        sweep_interval: Duration::from_secs(env_or("TASK_QUEUE_SWEEP_INTERVAL_SECS", 60)?),
        history_limit: env_or("TASK_QUEUE_HISTORY_LIMIT", 100)?,
        remux_enabled: env_or("REMUX_ENABLED", true)?,
        ffmpeg_program: std::env::var("FFMPEG_PROGRAM").unwrap_or_else(|_| "ffmpeg".to_string()),
    };

    let events = Events {
        webhook_url: std::env::var("EVENT_WEBHOOK_URL")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(|raw| Url::parse(&raw))
            .transpose()
            .context("EVENT_WEBHOOK_URL is invalid")?,
        webhook_timeout: Duration::from_secs(env_or("EVENT_WEBHOOK_TIMEOUT_SECS", 5)?),
        queue_capacity: env_or("EVENT_QUEUE_CAPACITY", 512)?,
    };

    let internal_api = InternalApi {
        token: std::env::var("INTERNAL_API_TOKEN").ok().and_then(|v| {
            let trimmed = v.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        }),
    };

    Ok(DotEnvyConfig {
        stage: get_stage(),
        worker_server,
        database,
        recording,
        capture,
        task_queue,
        events,
        internal_api,
    })
}

pub fn get_stage() -> Stage {
    dotenvy::dotenv().ok();

    let stage_str = std::env::var("STAGE").unwrap_or_default();
    Stage::try_from(&stage_str).unwrap_or_default()
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} is invalid")),
        _ => Ok(default),
    }
}
