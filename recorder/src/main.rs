use anyhow::Result;
use crates::{
    domain::{
        repositories::{
            event_bridge::EventBridge, recordings::RecordingRepository, streams::StreamLookup,
        },
        value_objects::enums::task_types::TaskType,
    },
    infra::{
        db::{
            postgres::postgres_connection,
            repositories::{recordings::RecordingPostgres, streams::StreamPostgres},
        },
        events::{
            channel_bridge::{ChannelEventBridge, EventSink, LogEventSink},
            webhook_sink::WebhookEventSink,
        },
    },
};
use recorder::{
    axum_http, config,
    recording_engine::{
        engine::RecordingEngine,
        finalization::FinalizationPipeline,
        launcher::CommandCaptureLauncher,
        process_registry::ProcessRegistry,
        recovery::StartupRecoveryService,
        rotation::{RotationController, RotationSettings},
        segments::{RecordingPaths, RotationThresholds},
        supervisor::CaptureSupervisor,
    },
    task_queue::{
        handlers::{TaskHandler, remux::RemuxHandler},
        queue::{BackgroundTaskQueue, TaskQueueSettings},
    },
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EVENT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("Recorder exited with error: {:#}", error);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("recorder")?;

    let dotenvy_env = Arc::new(config::config_loader::load()?);
    info!(stage = %dotenvy_env.stage, "ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?;
    info!("Postgres connection has been established");
    let db_pool_arc = Arc::new(postgres_pool);

    // Event bridge: webhook when configured, log-only otherwise
    let sink: Arc<dyn EventSink> = match dotenvy_env.events.webhook_url.clone() {
        Some(url) => Arc::new(WebhookEventSink::new(url, dotenvy_env.events.webhook_timeout)?),
        None => Arc::new(LogEventSink),
    };
    let (event_bridge, event_dispatcher) =
        ChannelEventBridge::new(vec![sink], dotenvy_env.events.queue_capacity);
    let events: Arc<dyn EventBridge + Send + Sync> = Arc::new(event_bridge);

    let recording_repository: Arc<dyn RecordingRepository + Send + Sync> =
        Arc::new(RecordingPostgres::new(Arc::clone(&db_pool_arc)));
    let stream_lookup: Arc<dyn StreamLookup + Send + Sync> =
        Arc::new(StreamPostgres::new(Arc::clone(&db_pool_arc)));

    // Background task queue
    let queue_config = &dotenvy_env.task_queue;
    let mut handlers: HashMap<TaskType, Arc<dyn TaskHandler>> = HashMap::new();
    if queue_config.remux_enabled {
        handlers.insert(
            TaskType::Remux,
            Arc::new(RemuxHandler::new(
                queue_config.ffmpeg_program.clone(),
                Arc::clone(&recording_repository),
            )),
        );
    }
    let task_queue = BackgroundTaskQueue::new(
        TaskQueueSettings {
            concurrency: queue_config.concurrency,
            max_retries: queue_config.max_retries,
            backoff_base: queue_config.backoff_base,
            backoff_max: queue_config.backoff_max,
            stale_threshold: queue_config.stale_threshold,
            sweep_interval: queue_config.sweep_interval,
            history_limit: queue_config.history_limit,
        },
        handlers,
        Arc::clone(&events),
    );

    // Recording engine
    let recording_config = &dotenvy_env.recording;
    let supervisor = Arc::new(CaptureSupervisor::new(
        Arc::new(ProcessRegistry::new()),
        Arc::new(CommandCaptureLauncher::new(
            dotenvy_env.capture.program.clone(),
            dotenvy_env.capture.extra_args.clone(),
        )),
        recording_config.stop_grace_period,
    ));
    let finalization = Arc::new(FinalizationPipeline::new(
        Arc::clone(&recording_repository),
        Arc::clone(&task_queue),
        Arc::clone(&events),
        recording_config.keep_segments,
    ));
    let rotation = Arc::new(RotationController::new(
        supervisor,
        Arc::clone(&stream_lookup),
        Arc::clone(&finalization),
        RecordingPaths::new(
            recording_config.root.clone(),
            recording_config.file_extension.clone(),
        ),
        RotationSettings {
            thresholds: RotationThresholds {
                max_duration: recording_config.segment_max_duration,
                max_bytes: recording_config.segment_max_bytes,
            },
            monitor_interval: recording_config.monitor_interval,
            grace_period: recording_config.stop_grace_period,
        },
    ));
    let engine = Arc::new(RecordingEngine::new(
        Arc::clone(&recording_repository),
        Arc::clone(&stream_lookup),
        Arc::clone(&rotation),
        Arc::clone(&finalization),
        Arc::clone(&events),
    ));

    let cancel = CancellationToken::new();
    let dispatcher = tokio::spawn(Arc::clone(&task_queue).run_dispatcher(cancel.clone()));
    let sweeper = tokio::spawn(Arc::clone(&task_queue).run_sweeper(cancel.clone()));

    // Reconcile what a previous run left behind before taking new recordings
    let recovery = StartupRecoveryService::builder()
        .recordings(Arc::clone(&recording_repository))
        .streams(Arc::clone(&stream_lookup))
        .rotation(Arc::clone(&rotation))
        .finalization(Arc::clone(&finalization))
        .build()?;
    let report = recovery.run().await?;
    info!(
        resumed = report.resumed.len(),
        finalized = report.finalized.len(),
        failed = report.failed.len(),
        "Startup recovery finished"
    );
    engine.mark_ready();

    let server = axum_http::http_serve::start(
        Arc::clone(&dotenvy_env),
        Arc::clone(&engine),
        Arc::clone(&task_queue),
        axum_http::http_serve::shutdown_signal(),
    )
    .await;

    // Finalize active recordings while the queue can still take their tasks
    engine.shutdown().await;
    cancel.cancel();
    if let Err(e) = tokio::try_join!(dispatcher, sweeper) {
        error!(error = %e, "Task queue loop panicked");
    }
    // Flush queued events once every sender is gone
    drop((events, recovery, finalization, rotation, engine, task_queue));
    if tokio::time::timeout(EVENT_FLUSH_TIMEOUT, event_dispatcher)
        .await
        .is_err()
    {
        warn!("Event dispatcher did not drain before exit");
    }

    server
}
