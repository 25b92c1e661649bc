use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr},
};
use tracing::debug;

const STDERR_TAIL_LINES: usize = 20;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a liveness query. Query failures are reported as `UnknownAssumeDead`
/// instead of an error so callers branch on data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    Terminated,
    UnknownAssumeDead,
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Outcome of delivering a signal. "No such process" is `AlreadyDead`, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    AlreadyDead,
}

/// One OS-level capture process.
pub trait CaptureProcess: Send {
    fn pid(&self) -> Option<u32>;

    fn liveness(&mut self) -> Liveness;

    /// Graceful stop request (SIGTERM on unix).
    fn terminate(&mut self) -> Result<SignalOutcome>;

    fn kill(&mut self) -> Result<SignalOutcome>;

    /// Exit status and recent stderr output, when known.
    fn diagnostics(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessInfo {
    pub process_id: String,
    pub pid: Option<u32>,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// A capture process plus its last known liveness, owned by the process registry.
pub struct ProcessHandle {
    process_id: String,
    output_path: PathBuf,
    started_at: DateTime<Utc>,
    last_liveness: Liveness,
    process: Box<dyn CaptureProcess>,
}

impl ProcessHandle {
    pub fn new(
        process_id: impl Into<String>,
        output_path: impl Into<PathBuf>,
        process: Box<dyn CaptureProcess>,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            output_path: output_path.into(),
            started_at: Utc::now(),
            last_liveness: Liveness::Alive,
            process,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn last_liveness(&self) -> Liveness {
        self.last_liveness
    }

    pub fn check_liveness(&mut self) -> Liveness {
        self.last_liveness = self.process.liveness();
        self.last_liveness
    }

    pub fn terminate(&mut self) -> Result<SignalOutcome> {
        let outcome = self.process.terminate();
        if matches!(outcome, Ok(SignalOutcome::AlreadyDead)) {
            self.last_liveness = Liveness::Terminated;
        }
        outcome
    }

    pub fn kill(&mut self) -> Result<SignalOutcome> {
        let outcome = self.process.kill();
        if matches!(outcome, Ok(SignalOutcome::AlreadyDead)) {
            self.last_liveness = Liveness::Terminated;
        }
        outcome
    }

    /// Polls liveness until the process is gone or `timeout` elapses. Returns `true` if it exited.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.check_liveness().is_alive() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    pub fn diagnostics(&self) -> Option<String> {
        self.process.diagnostics()
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            process_id: self.process_id.clone(),
            pid: self.process.pid(),
            output_path: self.output_path.clone(),
            started_at: self.started_at,
        }
    }
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Capture process backed by a tokio child. The child is killed if the handle is dropped.
pub struct OsCaptureProcess {
    child: Child,
    exit_status: Option<std::process::ExitStatus>,
    stderr_tail: StderrTail,
}

impl OsCaptureProcess {
    pub fn new(mut child: Child, process_id: &str) -> Self {
        let stderr_tail: StderrTail = Arc::new(Mutex::new(VecDeque::new()));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_reader(stderr, Arc::clone(&stderr_tail), process_id.to_string());
        }

        Self {
            child,
            exit_status: None,
            stderr_tail,
        }
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.liveness(), Liveness::Alive)
    }
}

fn spawn_stderr_reader(stderr: ChildStderr, tail: StderrTail, process_id: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(process_id = %process_id, line = %line, "capture: stderr");
            let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    });
}

impl CaptureProcess for OsCaptureProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn liveness(&mut self) -> Liveness {
        if self.exit_status.is_some() {
            return Liveness::Terminated;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                Liveness::Terminated
            }
            Ok(None) => Liveness::Alive,
            Err(_) => Liveness::UnknownAssumeDead,
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<SignalOutcome> {
        use nix::{
            errno::Errno,
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        // A reaped child has no pid any more.
        let Some(pid) = self.child.id() else {
            return Ok(SignalOutcome::AlreadyDead);
        };
        let pid = i32::try_from(pid)?;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(Errno::ESRCH) => Ok(SignalOutcome::AlreadyDead),
            Err(errno) => {
                if self.has_exited() {
                    Ok(SignalOutcome::AlreadyDead)
                } else {
                    Err(anyhow::anyhow!("SIGTERM to pid {pid} failed: {errno}"))
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<SignalOutcome> {
        self.kill()
    }

    fn kill(&mut self) -> Result<SignalOutcome> {
        match self.child.start_kill() {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(_) if self.has_exited() => Ok(SignalOutcome::AlreadyDead),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {
                Ok(SignalOutcome::AlreadyDead)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn diagnostics(&self) -> Option<String> {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");

        match (self.exit_status, tail.is_empty()) {
            (None, true) => None,
            (Some(status), true) => Some(format!("capture process exited with {status}")),
            (None, false) => Some(tail),
            (Some(status), false) => Some(format!("capture process exited with {status}\n{tail}")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn(script: &str) -> OsCaptureProcess {
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        OsCaptureProcess::new(child, "stream_test")
    }

    #[tokio::test]
    async fn sigterm_stops_a_running_process() {
        let mut handle = ProcessHandle::new("stream_test", "/tmp/out.ts", Box::new(spawn("sleep 30")));

        assert_eq!(handle.check_liveness(), Liveness::Alive);
        assert_eq!(handle.terminate().unwrap(), SignalOutcome::Delivered);
        assert!(handle.wait_for_exit(Duration::from_secs(5)).await);
        assert_eq!(handle.last_liveness(), Liveness::Terminated);
    }

    #[tokio::test]
    async fn signals_to_an_exited_process_report_already_dead() {
        let mut handle = ProcessHandle::new(
            "stream_test",
            "/tmp/out.ts",
            Box::new(spawn("echo boom >&2; exit 3")),
        );

        assert!(handle.wait_for_exit(Duration::from_secs(5)).await);
        assert_eq!(handle.terminate().unwrap(), SignalOutcome::AlreadyDead);
        assert_eq!(handle.kill().unwrap(), SignalOutcome::AlreadyDead);

        // The stderr reader runs concurrently; give it a moment to drain.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let diagnostics = handle.diagnostics().unwrap();
        assert!(diagnostics.contains("exited"));
        assert!(diagnostics.contains("boom"));
    }
}
