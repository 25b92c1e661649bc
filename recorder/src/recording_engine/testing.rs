//! Fake capture processes for engine tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use crates::domain::repositories::{
    event_bridge::{EventBridge, MockEventBridge},
    recordings::{MockRecordingRepository, RecordingRepository},
    streams::{MockStreamLookup, StreamLookup},
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use super::{
    engine::RecordingEngine,
    finalization::FinalizationPipeline,
    launcher::{CaptureLauncher, CaptureRequest},
    process_handle::{CaptureProcess, Liveness, SignalOutcome},
    process_registry::ProcessRegistry,
    rotation::{RotationController, RotationSettings},
    segments::{RecordingPaths, RotationThresholds},
    supervisor::CaptureSupervisor,
};
use crate::task_queue::queue::{BackgroundTaskQueue, TaskQueueSettings};

#[derive(Default)]
struct FakeState {
    dead: AtomicBool,
    ignore_sigterm: AtomicBool,
    terminate_calls: AtomicUsize,
    kill_calls: AtomicUsize,
}

#[derive(Clone)]
pub struct FakeControl(Arc<FakeState>);

impl FakeControl {
    /// Simulates an external kill (OOM, crash).
    pub fn die(&self) {
        self.0.dead.store(true, Ordering::SeqCst);
    }

    pub fn ignore_sigterm(&self) {
        self.0.ignore_sigterm.store(true, Ordering::SeqCst);
    }

    pub fn is_dead(&self) -> bool {
        self.0.dead.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.0.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn kill_calls(&self) -> usize {
        self.0.kill_calls.load(Ordering::SeqCst)
    }
}

pub struct FakeProcess(Arc<FakeState>);

impl FakeProcess {
    pub fn alive() -> (Box<dyn CaptureProcess>, FakeControl) {
        let state = Arc::new(FakeState::default());
        (Box::new(FakeProcess(Arc::clone(&state))), FakeControl(state))
    }
}

impl CaptureProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        (!self.0.dead.load(Ordering::SeqCst)).then_some(4242)
    }

    fn liveness(&mut self) -> Liveness {
        if self.0.dead.load(Ordering::SeqCst) {
            Liveness::Terminated
        } else {
            Liveness::Alive
        }
    }

    fn terminate(&mut self) -> Result<SignalOutcome> {
        self.0.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.dead.load(Ordering::SeqCst) {
            return Ok(SignalOutcome::AlreadyDead);
        }
        if !self.0.ignore_sigterm.load(Ordering::SeqCst) {
            self.0.dead.store(true, Ordering::SeqCst);
        }
        Ok(SignalOutcome::Delivered)
    }

    fn kill(&mut self) -> Result<SignalOutcome> {
        self.0.kill_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.dead.swap(true, Ordering::SeqCst) {
            Ok(SignalOutcome::AlreadyDead)
        } else {
            Ok(SignalOutcome::Delivered)
        }
    }

    fn diagnostics(&self) -> Option<String> {
        self.0
            .dead
            .load(Ordering::SeqCst)
            .then(|| "fake capture exited".to_string())
    }
}

/// Launcher that hands out fake processes and writes `bytes_per_launch` bytes to each
/// output file, standing in for captured stream data.
#[derive(Default)]
pub struct FakeLauncher {
    bytes_per_launch: usize,
    failing: AtomicBool,
    requests: Mutex<Vec<CaptureRequest>>,
    controls: Mutex<Vec<FakeControl>>,
}

impl FakeLauncher {
    pub fn writing(bytes_per_launch: usize) -> Self {
        Self {
            bytes_per_launch,
            ..Self::default()
        }
    }

    pub fn fail_launches(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn launches(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn control(&self, index: usize) -> FakeControl {
        self.controls.lock().unwrap()[index].clone()
    }

    pub fn last_control(&self) -> FakeControl {
        self.controls.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl CaptureLauncher for FakeLauncher {
    async fn launch(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("capture tool unavailable");
        }
        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if self.bytes_per_launch > 0 {
            tokio::fs::write(&request.output_path, vec![7u8; self.bytes_per_launch]).await?;
        }

        let (process, control) = FakeProcess::alive();
        self.requests.lock().unwrap().push(request.clone());
        self.controls.lock().unwrap().push(control);
        Ok(process)
    }
}

pub struct TestEngine {
    pub engine: Arc<RecordingEngine>,
    pub launcher: Arc<FakeLauncher>,
    _root: tempfile::TempDir,
}

/// Engine wired to mocks and a fake launcher writing 32 bytes per capture. The monitor
/// never ticks, so recordings only end when asked to.
pub fn engine_with(
    recordings: MockRecordingRepository,
    streams: MockStreamLookup,
    events: MockEventBridge,
) -> TestEngine {
    let root = tempfile::tempdir().unwrap();
    let recordings: Arc<dyn RecordingRepository + Send + Sync> = Arc::new(recordings);
    let streams: Arc<dyn StreamLookup + Send + Sync> = Arc::new(streams);
    let events: Arc<dyn EventBridge + Send + Sync> = Arc::new(events);
    let launcher = Arc::new(FakeLauncher::writing(32));
    let task_queue =
        BackgroundTaskQueue::new(TaskQueueSettings::default(), HashMap::new(), Arc::clone(&events));
    let finalization = Arc::new(FinalizationPipeline::new(
        Arc::clone(&recordings),
        task_queue,
        Arc::clone(&events),
        false,
    ));
    let supervisor = Arc::new(CaptureSupervisor::new(
        Arc::new(ProcessRegistry::new()),
        launcher.clone(),
        Duration::from_millis(100),
    ));
    let rotation = Arc::new(RotationController::new(
        supervisor,
        Arc::clone(&streams),
        Arc::clone(&finalization),
        RecordingPaths::new(root.path(), "ts"),
        RotationSettings {
            thresholds: RotationThresholds {
                max_duration: Duration::from_secs(3600),
                max_bytes: u64::MAX,
            },
            monitor_interval: Duration::from_secs(3600),
            grace_period: Duration::from_millis(100),
        },
    ));

    TestEngine {
        engine: Arc::new(RecordingEngine::new(
            recordings, streams, rotation, finalization, events,
        )),
        launcher,
        _root: root,
    }
}
