//! Capture process supervisor
//!
//! Owns at most one capture session at a time and drives it through:
//!
//! ```text
//! Idle → Starting → Running → Stopping → Idle
//!            └→ FailedImmediately → Idle
//! ```
//!
//! ## Components
//!
//! - [`CaptureSupervisor`]: start/stop/liveness for the capture producer
//! - [`ProcessAdapter`]: platform capability used to launch and terminate it
//! - [`SupervisorTimings`]: grace period and termination timeouts

use crate::config::CaptureConfig;
use crate::logging::{LogRing, OutputLine, OutputStream};
use crate::{CoreError, Result};
use schema::{CaptureState, ProcessExit};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod adapters;

pub use adapters::*;

/// Lines of capture output retained for diagnostics
const OUTPUT_CAPACITY: usize = 500;

/// Shown when an immediately-exiting capture left no output behind
pub const NO_DIAGNOSTICS_MESSAGE: &str = "Process exited immediately. Check console for details.";

/// Timing knobs for the capture lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimings {
    /// How long a fresh capture must survive before it counts as running
    pub grace_period: Duration,
    /// How long to wait after a graceful termination request
    pub graceful_timeout: Duration,
    /// How long to wait after a forced kill
    pub kill_timeout: Duration,
    /// How long to wait for output pipes to drain after an immediate exit
    pub diagnostics_timeout: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(500),
            graceful_timeout: Duration::from_secs(3),
            kill_timeout: Duration::from_secs(2),
            diagnostics_timeout: Duration::from_secs(1),
        }
    }
}

impl SupervisorTimings {
    /// Timings from the `[capture]` configuration table
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            grace_period: Duration::from_millis(config.grace_period_ms),
            graceful_timeout: Duration::from_millis(config.graceful_timeout_ms),
            kill_timeout: Duration::from_millis(config.kill_timeout_ms),
            diagnostics_timeout: Duration::from_millis(config.diagnostics_timeout_ms),
        }
    }
}

struct ActiveSession {
    process: Box<dyn ManagedProcess>,
    pid: u32,
    started_at: Instant,
    readers: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    fn abort_readers(&mut self) {
        for handle in self.readers.drain(..) {
            handle.abort();
        }
    }
}

/// Supervises the capture producer
pub struct CaptureSupervisor {
    adapter: Arc<dyn ProcessAdapter>,
    timings: SupervisorTimings,
    state: CaptureState,
    state_tx: watch::Sender<CaptureState>,
    session: Option<ActiveSession>,
    output: Arc<Mutex<LogRing>>,
    last_exit: Option<ProcessExit>,
}

impl CaptureSupervisor {
    /// Create an idle supervisor
    pub fn new(adapter: Arc<dyn ProcessAdapter>, timings: SupervisorTimings) -> Self {
        let (state_tx, _) = watch::channel(CaptureState::Idle);
        Self {
            adapter,
            timings,
            state: CaptureState::Idle,
            state_tx,
            session: None,
            output: Arc::new(Mutex::new(LogRing::new(OUTPUT_CAPACITY))),
            last_exit: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Subscribe to lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    /// PID of the running capture, if any
    pub fn pid(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.pid)
    }

    /// How long the current capture has been running
    pub fn uptime(&self) -> Option<Duration> {
        self.session.as_ref().map(|s| s.started_at.elapsed())
    }

    /// Exit information of the last capture that ended
    pub fn last_exit(&self) -> Option<&ProcessExit> {
        self.last_exit.as_ref()
    }

    /// Retained stdout/stderr of the current or last capture
    pub async fn recent_output(&self) -> Vec<OutputLine> {
        self.output.lock().await.lines()
    }

    /// Whether a capture session is alive. A capture that exited on its own
    /// is noticed here and the supervisor returns to Idle.
    pub fn is_running(&mut self) -> bool {
        self.refresh_liveness();
        self.session.is_some()
    }

    fn refresh_liveness(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.process.try_wait() {
            Ok(None) => {}
            Ok(Some(exit)) => {
                info!(
                    "Capture process {} exited on its own ({})",
                    session.pid,
                    exit.describe()
                );
                self.finish_session(Some(exit));
            }
            Err(e) => {
                warn!("Could not query capture process {}: {}", session.pid, e);
            }
        }
    }

    /// Launch the capture producer
    ///
    /// Fails with `AlreadyRunning` while a session is alive, with
    /// `MissingCollaborator` when a required artifact is absent, and with
    /// `ImmediateExit` when the process does not survive the grace period.
    pub async fn start(&mut self, launch: &LaunchSpec) -> Result<u32> {
        if self.is_running() {
            return Err(CoreError::AlreadyRunning);
        }
        launch.check_required()?;

        self.transition_to(CaptureState::Starting, Some("start requested"));
        info!("Starting capture: {}", launch.display());

        let mut process = match self.adapter.spawn(launch).await {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to launch capture: {}", e);
                self.transition_to(CaptureState::Idle, Some("spawn failed"));
                return Err(e);
            }
        };
        let pid = process.pid();

        *self.output.lock().await = LogRing::new(OUTPUT_CAPACITY);
        let mut readers = Vec::new();
        if let Some(reader) = process.take_stdout() {
            readers.push(self.spawn_log_reader(reader, OutputStream::Stdout));
        }
        if let Some(reader) = process.take_stderr() {
            readers.push(self.spawn_log_reader(reader, OutputStream::Stderr));
        }

        tokio::time::sleep(self.timings.grace_period).await;

        match process.try_wait() {
            Ok(None) => {
                self.session = Some(ActiveSession {
                    process,
                    pid,
                    started_at: Instant::now(),
                    readers,
                });
                self.last_exit = None;
                self.transition_to(CaptureState::Running, None);
                info!("Capture running with pid {}", pid);
                Ok(pid)
            }
            Ok(Some(exit)) => {
                self.transition_to(CaptureState::FailedImmediately, Some("exited during grace period"));
                let diagnostics = self.collect_diagnostics(readers).await;
                error!(
                    "Capture process {} exited immediately ({})",
                    pid,
                    exit.describe()
                );
                let described = exit.describe();
                self.last_exit = Some(exit);
                self.transition_to(CaptureState::Idle, None);
                Err(CoreError::ImmediateExit {
                    exit: described,
                    diagnostics,
                })
            }
            Err(e) => {
                error!("Could not query capture process {}: {}", pid, e);
                if let Err(kill_err) = process.kill().await {
                    warn!("Failed to kill capture process {}: {}", pid, kill_err);
                }
                for handle in readers {
                    handle.abort();
                }
                self.transition_to(CaptureState::Idle, Some("status query failed"));
                Err(e)
            }
        }
    }

    /// Stop the capture producer
    ///
    /// A graceful request comes first. After the graceful timeout the whole
    /// process tree is killed, including helpers that outlived the leader.
    /// The supervisor always ends in Idle.
    /// Stopping an idle supervisor does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        self.refresh_liveness();
        let Some(mut session) = self.session.take() else {
            self.transition_to(CaptureState::Idle, None);
            return Ok(());
        };
        let pid = session.pid;
        self.transition_to(CaptureState::Stopping, Some("stop requested"));
        debug!("Stopping capture process {}", pid);

        let mut exit = None;
        let terminate_result = session.process.terminate().await;
        match &terminate_result {
            Ok(()) => match session.process.wait_timeout(self.timings.graceful_timeout).await {
                Ok(found) => exit = found,
                Err(e) => warn!("Error waiting for capture process {}: {}", pid, e),
            },
            Err(e) => warn!("Failed to terminate capture process {} gracefully: {}", pid, e),
        }

        if exit.is_none() {
            warn!(
                "Capture process {} still alive after graceful request, killing it",
                pid
            );
        }
        // Helpers that ignore the graceful request can outlive the leader, so
        // the whole tree is always killed.
        let kill_result = session.process.kill().await;
        match &kill_result {
            Ok(()) if exit.is_none() => {
                match session.process.wait_timeout(self.timings.kill_timeout).await {
                    Ok(Some(found)) => exit = Some(found),
                    Ok(None) => warn!("Capture process {} did not exit after kill", pid),
                    Err(e) => warn!("Error waiting for capture process {}: {}", pid, e),
                }
            }
            Ok(()) => {}
            Err(e) if exit.is_none() => error!("Failed to kill capture process {}: {}", pid, e),
            Err(e) => warn!("Failed to kill remaining capture processes of {}: {}", pid, e),
        }

        session.abort_readers();
        if let Some(exit) = &exit {
            info!("Capture process {} stopped ({})", pid, exit.describe());
        }
        self.last_exit = exit;
        self.transition_to(CaptureState::Idle, Some("stopped"));

        match (terminate_result, kill_result) {
            (Err(term), Err(kill)) => Err(CoreError::TerminationFailure(format!(
                "could not stop process {}: terminate: {}; kill: {}",
                pid, term, kill
            ))),
            _ => Ok(()),
        }
    }

    /// Stop any running capture before the application exits
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.session.is_some() {
            info!("Shutting down capture supervisor");
        }
        self.stop().await
    }

    fn finish_session(&mut self, exit: Option<ProcessExit>) {
        if let Some(mut session) = self.session.take() {
            session.abort_readers();
        }
        self.last_exit = exit;
        self.transition_to(CaptureState::Idle, Some("process exited"));
    }

    async fn collect_diagnostics(&self, readers: Vec<JoinHandle<()>>) -> String {
        let deadline = tokio::time::Instant::now() + self.timings.diagnostics_timeout;
        for mut handle in readers {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                debug!("Output reader still open after diagnostics timeout");
                handle.abort();
            }
        }

        let diagnostics = self.output.lock().await.render_diagnostics();
        if diagnostics.trim().is_empty() {
            NO_DIAGNOSTICS_MESSAGE.to_string()
        } else {
            diagnostics
        }
    }

    fn spawn_log_reader(
        &self,
        reader: std::pin::Pin<Box<dyn AsyncRead + Send + Unpin>>,
        stream: OutputStream,
    ) -> JoinHandle<()> {
        let ring = self.output.clone();

        tokio::spawn(async move {
            let reader = std::pin::Pin::into_inner(reader);
            let mut lines = BufReader::new(reader).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!(target: "tunnelwatch::capture", "{:?}: {}", stream, line);
                        ring.lock().await.push(OutputLine::new(stream, line));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Stopped reading capture {:?}: {}", stream, e);
                        break;
                    }
                }
            }
        })
    }

    fn transition_to(&mut self, new_state: CaptureState, reason: Option<&str>) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;

        debug!(
            "Capture transitioning from {} to {}{}",
            old_state,
            new_state,
            reason.map(|r| format!(" ({})", r)).unwrap_or_default()
        );
        self.state_tx.send_replace(new_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn timings() -> SupervisorTimings {
        SupervisorTimings {
            grace_period: Duration::from_millis(50),
            graceful_timeout: Duration::from_millis(100),
            kill_timeout: Duration::from_millis(100),
            diagnostics_timeout: Duration::from_millis(100),
        }
    }

    fn launch() -> LaunchSpec {
        LaunchSpec::from_command(
            &["python3".to_string(), "capture.py".to_string()],
            Path::new("."),
        )
    }

    fn supervisor(adapter: &MockProcessAdapter) -> CaptureSupervisor {
        CaptureSupervisor::new(Arc::new(adapter.clone()), timings())
    }

    #[tokio::test]
    async fn start_then_stop_returns_to_idle() {
        let adapter = MockProcessAdapter::new();
        let mut sup = supervisor(&adapter);
        let mut states = sup.subscribe();

        let pid = sup.start(&launch()).await.expect("start");
        assert_eq!(sup.state(), CaptureState::Running);
        assert_eq!(sup.pid(), Some(pid));
        assert!(sup.is_running());
        assert_eq!(*states.borrow_and_update(), CaptureState::Running);

        sup.stop().await.expect("stop");
        assert_eq!(sup.state(), CaptureState::Idle);
        assert!(!sup.is_running());
        assert_eq!(sup.last_exit().and_then(|e| e.signal), Some(15));
    }

    #[tokio::test]
    async fn stop_kills_tree_even_after_graceful_exit() {
        let adapter = MockProcessAdapter::new();
        let mut sup = supervisor(&adapter);
        sup.start(&launch()).await.expect("start");

        let started = Instant::now();
        sup.stop().await.expect("stop");
        assert!(started.elapsed() < timings().graceful_timeout);
        assert_eq!(adapter.kill_count(), 1);
        assert_eq!(sup.last_exit().and_then(|e| e.signal), Some(15));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let adapter = MockProcessAdapter::new();
        let mut sup = supervisor(&adapter);
        sup.start(&launch()).await.expect("start");

        let err = sup.start(&launch()).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning));
        assert_eq!(adapter.launch_count(), 1);
        assert_eq!(sup.state(), CaptureState::Running);
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let adapter = MockProcessAdapter::new();
        let mut sup = supervisor(&adapter);
        sup.stop().await.expect("first stop");
        sup.stop().await.expect("second stop");
        assert_eq!(sup.state(), CaptureState::Idle);
        assert_eq!(adapter.launch_count(), 0);
    }

    #[tokio::test]
    async fn immediate_exit_reports_captured_stderr() {
        let adapter = MockProcessAdapter::with_instructions(vec![MockInstruction {
            stderr: Some("PermissionError: [Errno 1] Operation not permitted\n".to_string()),
            ..MockInstruction::exits_after(Duration::from_millis(5), 1)
        }]);
        let mut sup = supervisor(&adapter);

        let err = sup.start(&launch()).await.unwrap_err();
        match err {
            CoreError::ImmediateExit { exit, diagnostics } => {
                assert_eq!(exit, "exit code 1");
                assert!(diagnostics.contains("Operation not permitted"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(sup.state(), CaptureState::Idle);
        assert!(!sup.is_running());
        assert_eq!(sup.last_exit().and_then(|e| e.exit_code), Some(1));
    }

    #[tokio::test]
    async fn immediate_exit_without_output_uses_fallback_message() {
        let adapter = MockProcessAdapter::with_instructions(vec![MockInstruction::exits_after(
            Duration::from_millis(5),
            2,
        )]);
        let mut sup = supervisor(&adapter);

        match sup.start(&launch()).await.unwrap_err() {
            CoreError::ImmediateExit { diagnostics, .. } => {
                assert_eq!(diagnostics, NO_DIAGNOSTICS_MESSAGE);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn missing_script_fails_before_launch() {
        let adapter = MockProcessAdapter::new();
        let mut sup = supervisor(&adapter);
        let spec = launch().require("capture script", "/definitely/missing/capture.py");

        let err = sup.start(&spec).await.unwrap_err();
        assert!(matches!(err, CoreError::MissingCollaborator { .. }));
        assert_eq!(adapter.launch_count(), 0);
        assert_eq!(sup.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn unresponsive_capture_is_killed() {
        let adapter = MockProcessAdapter::with_instructions(vec![MockInstruction {
            honors_terminate: false,
            ..MockInstruction::default()
        }]);
        let mut sup = supervisor(&adapter);
        sup.start(&launch()).await.expect("start");

        let started = Instant::now();
        sup.stop().await.expect("stop");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sup.state(), CaptureState::Idle);
        assert_eq!(sup.last_exit().and_then(|e| e.signal), Some(9));
    }

    #[tokio::test]
    async fn failed_signals_report_termination_failure() {
        let adapter = MockProcessAdapter::with_instructions(vec![MockInstruction {
            signals_fail: true,
            ..MockInstruction::default()
        }]);
        let mut sup = supervisor(&adapter);
        sup.start(&launch()).await.expect("start");

        let err = sup.stop().await.unwrap_err();
        assert!(matches!(err, CoreError::TerminationFailure(_)));
        assert!(err.is_recoverable());
        assert_eq!(sup.state(), CaptureState::Idle);
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn natural_exit_is_detected() {
        let adapter = MockProcessAdapter::with_instructions(vec![MockInstruction::exits_after(
            Duration::from_millis(150),
            0,
        )]);
        let mut sup = supervisor(&adapter);
        sup.start(&launch()).await.expect("start");
        assert!(sup.is_running());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!sup.is_running());
        assert_eq!(sup.state(), CaptureState::Idle);
        assert_eq!(sup.last_exit().and_then(|e| e.exit_code), Some(0));

        sup.start(&launch()).await.expect("restart after natural exit");
        assert_eq!(adapter.launch_count(), 2);
    }
}
