use std::{path::Path, sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    error::EngineError,
    launcher::{CaptureLauncher, CaptureOptions, CaptureRequest},
    process_handle::{Liveness, ProcessHandle, ProcessInfo, SignalOutcome},
    process_registry::ProcessRegistry,
};
use crates::domain::entities::streams::StreamEntity;

pub fn process_id_for(stream_id: Uuid) -> String {
    format!("stream_{}", stream_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRegistered,
    AlreadyDead,
    Terminated,
    Killed,
    /// Every signal failed; the handle was still dropped from the registry.
    Abandoned,
}

pub struct CaptureSupervisor {
    registry: Arc<ProcessRegistry>,
    launcher: Arc<dyn CaptureLauncher>,
    default_grace: Duration,
}

impl CaptureSupervisor {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        launcher: Arc<dyn CaptureLauncher>,
        default_grace: Duration,
    ) -> Self {
        Self {
            registry,
            launcher,
            default_grace,
        }
    }

    pub fn default_grace(&self) -> Duration {
        self.default_grace
    }

    pub async fn start(
        &self,
        stream: &StreamEntity,
        quality: &str,
        output_path: &Path,
        options: CaptureOptions,
    ) -> Result<ProcessInfo, EngineError> {
        let process_id = process_id_for(stream.id);
        let _guard = self.registry.lock_key(&process_id).await;

        match self.registry.liveness(&process_id) {
            Some(Liveness::Alive) => {
                return Err(EngineError::ProcessAlreadyRunning { process_id });
            }
            Some(liveness) => {
                info!(
                    process_id = %process_id,
                    liveness = ?liveness,
                    "supervisor: clearing dead registry entry before start"
                );
                self.registry.take(&process_id);
            }
            None => {}
        }

        let request = CaptureRequest {
            process_id: process_id.clone(),
            url: stream.url.clone(),
            quality: quality.to_string(),
            output_path: output_path.to_path_buf(),
            options,
        };

        let process = self.launcher.launch(&request).await.map_err(|e| {
            EngineError::StartFailed {
                process_id: process_id.clone(),
                message: format!("{:#}", e),
            }
        })?;

        let handle = ProcessHandle::new(process_id.clone(), output_path, process);
        let info = handle.info();
        if self.registry.try_insert(handle).is_err() {
            // Unreachable while the key lock is held; the rejected handle is killed on drop.
            return Err(EngineError::ProcessAlreadyRunning { process_id });
        }

        info!(
            process_id = %info.process_id,
            pid = ?info.pid,
            output_path = %info.output_path.display(),
            "supervisor: capture process started"
        );
        Ok(info)
    }

    /// Stops and unregisters a capture process. Never fails: a missing or dead
    /// process is a normal outcome.
    pub async fn stop(&self, process_id: &str, grace_period: Option<Duration>) -> StopOutcome {
        let grace_period = grace_period.unwrap_or(self.default_grace);
        let _guard = self.registry.lock_key(process_id).await;

        let Some(mut handle) = self.registry.take(process_id) else {
            info!(process_id = %process_id, "supervisor: stop requested for unregistered process");
            return StopOutcome::NotRegistered;
        };

        let outcome = escalate(&mut handle, grace_period).await;
        match outcome {
            StopOutcome::Abandoned => warn!(
                process_id = %process_id,
                "supervisor: capture process did not respond to signals"
            ),
            _ => info!(
                process_id = %process_id,
                outcome = ?outcome,
                "supervisor: capture process stopped"
            ),
        }
        outcome
    }

    pub fn is_alive(&self, process_id: &str) -> bool {
        self.liveness(process_id)
            .is_some_and(|liveness| liveness.is_alive())
    }

    pub fn liveness(&self, process_id: &str) -> Option<Liveness> {
        self.registry.liveness(process_id)
    }

    pub fn diagnostics(&self, process_id: &str) -> Option<String> {
        self.registry.diagnostics(process_id)
    }

    pub fn process_info(&self, process_id: &str) -> Option<ProcessInfo> {
        self.registry.info(process_id)
    }

    pub fn active_process_ids(&self) -> Vec<String> {
        self.registry.process_ids()
    }
}

async fn escalate(handle: &mut ProcessHandle, grace_period: Duration) -> StopOutcome {
    let process_id = handle.process_id().to_string();

    if !handle.check_liveness().is_alive() {
        return StopOutcome::AlreadyDead;
    }

    match handle.terminate() {
        Ok(SignalOutcome::AlreadyDead) => return StopOutcome::AlreadyDead,
        Ok(SignalOutcome::Delivered) => {
            if handle.wait_for_exit(grace_period).await {
                return StopOutcome::Terminated;
            }
            info!(
                process_id = %process_id,
                grace_ms = grace_period.as_millis() as u64,
                "supervisor: grace period elapsed, escalating to SIGKILL"
            );
        }
        Err(e) => warn!(
            process_id = %process_id,
            error = %e,
            "supervisor: SIGTERM failed, escalating to SIGKILL"
        ),
    }

    match handle.kill() {
        Ok(SignalOutcome::AlreadyDead) => StopOutcome::AlreadyDead,
        Ok(SignalOutcome::Delivered) => {
            handle.wait_for_exit(grace_period).await;
            StopOutcome::Killed
        }
        Err(e) => {
            warn!(process_id = %process_id, error = %e, "supervisor: SIGKILL failed");
            StopOutcome::Abandoned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording_engine::testing::FakeLauncher;
    use chrono::Utc;

    fn stream() -> StreamEntity {
        let now = Utc::now();
        StreamEntity {
            id: Uuid::new_v4(),
            name: "someone".to_string(),
            url: "https://twitch.tv/someone".to_string(),
            quality: "best".to_string(),
            proxy: None,
            is_live: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn supervisor(launcher: Arc<FakeLauncher>) -> CaptureSupervisor {
        CaptureSupervisor::new(
            Arc::new(ProcessRegistry::new()),
            launcher,
            Duration::from_millis(300),
        )
    }

    #[tokio::test]
    async fn start_registers_under_stream_key() {
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = supervisor(Arc::clone(&launcher));
        let stream = stream();

        let info = supervisor
            .start(&stream, "best", Path::new("/tmp/a.ts"), CaptureOptions::default())
            .await
            .unwrap();

        assert_eq!(info.process_id, format!("stream_{}", stream.id));
        assert!(supervisor.is_alive(&info.process_id));
        assert_eq!(launcher.requests()[0].url, stream.url);
    }

    #[tokio::test]
    async fn start_rejects_a_live_duplicate_but_replaces_a_dead_one() {
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = supervisor(Arc::clone(&launcher));
        let stream = stream();
        let path = Path::new("/tmp/a.ts");

        supervisor
            .start(&stream, "best", path, CaptureOptions::default())
            .await
            .unwrap();
        let err = supervisor
            .start(&stream, "best", path, CaptureOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProcessAlreadyRunning { .. }));

        launcher.control(0).die();
        supervisor
            .start(&stream, "best", path, CaptureOptions::default())
            .await
            .unwrap();
        assert_eq!(launcher.launches(), 2);
        assert!(supervisor.is_alive(&process_id_for(stream.id)));
    }

    #[tokio::test]
    async fn launch_failure_is_a_start_error_and_registers_nothing() {
        let launcher = Arc::new(FakeLauncher::default());
        launcher.fail_launches(true);
        let supervisor = supervisor(Arc::clone(&launcher));
        let stream = stream();

        let err = supervisor
            .start(&stream, "best", Path::new("/tmp/a.ts"), CaptureOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::StartFailed { .. }));
        assert!(supervisor.active_process_ids().is_empty());
    }

    #[tokio::test]
    async fn stop_twice_is_harmless() {
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = supervisor(Arc::clone(&launcher));
        let stream = stream();
        let process_id = process_id_for(stream.id);
        supervisor
            .start(&stream, "best", Path::new("/tmp/a.ts"), CaptureOptions::default())
            .await
            .unwrap();

        assert_eq!(supervisor.stop(&process_id, None).await, StopOutcome::Terminated);
        assert_eq!(supervisor.stop(&process_id, None).await, StopOutcome::NotRegistered);
        assert!(supervisor.active_process_ids().is_empty());
        assert_eq!(launcher.control(0).terminate_calls(), 1);
    }

    #[tokio::test]
    async fn stop_of_an_externally_killed_process_sends_no_signal() {
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = supervisor(Arc::clone(&launcher));
        let stream = stream();
        supervisor
            .start(&stream, "best", Path::new("/tmp/a.ts"), CaptureOptions::default())
            .await
            .unwrap();
        launcher.control(0).die();

        let outcome = supervisor.stop(&process_id_for(stream.id), None).await;

        assert_eq!(outcome, StopOutcome::AlreadyDead);
        assert_eq!(launcher.control(0).terminate_calls(), 0);
        assert!(supervisor.active_process_ids().is_empty());
    }

    #[tokio::test]
    async fn stubborn_process_is_killed_after_grace() {
        let launcher = Arc::new(FakeLauncher::default());
        let supervisor = supervisor(Arc::clone(&launcher));
        let stream = stream();
        supervisor
            .start(&stream, "best", Path::new("/tmp/a.ts"), CaptureOptions::default())
            .await
            .unwrap();
        launcher.control(0).ignore_sigterm();

        let outcome = supervisor
            .stop(&process_id_for(stream.id), Some(Duration::from_millis(150)))
            .await;

        assert_eq!(outcome, StopOutcome::Killed);
        assert_eq!(launcher.control(0).kill_calls(), 1);
        assert!(launcher.control(0).is_dead());
    }
}
