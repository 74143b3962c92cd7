//! Process adapters for abstracting process management
//!
//! The supervisor and the analysis runner only talk to [`ProcessAdapter`].
//! One implementation per platform family is compiled in and chosen once by
//! [`platform_adapter`]; [`MockProcessAdapter`] stands in for both in tests.

use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::ProcessExit;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tracing::debug;

/// A file a collaborator needs before it can be launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredArtifact {
    /// Human-readable name used in error messages
    pub what: String,
    /// Absolute location of the artifact
    pub path: PathBuf,
}

/// Everything needed to launch a collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute (must be in PATH or an absolute path)
    pub program: String,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Working directory, always the project root
    pub working_dir: PathBuf,
    /// Artifacts that must exist before the program is launched
    pub required: Vec<RequiredArtifact>,
}

impl LaunchSpec {
    /// Build a spec from a `[program, args...]` list
    pub fn from_command(command: &[String], working_dir: &Path) -> Self {
        let (program, args) = match command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            working_dir: working_dir.to_path_buf(),
            required: Vec::new(),
        }
    }

    /// Add an artifact that must exist before launch
    pub fn require(mut self, what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.required.push(RequiredArtifact {
            what: what.into(),
            path: path.into(),
        });
        self
    }

    /// Fail with `MissingCollaborator` for the first absent artifact
    pub fn check_required(&self) -> Result<()> {
        for artifact in &self.required {
            if !artifact.path.exists() {
                return Err(CoreError::missing(&artifact.what, &artifact.path));
            }
        }
        Ok(())
    }

    /// Command line for log messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn arg_refs(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }
}

/// Platform capability for launching and terminating collaborators
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a long-running process in its own process tree
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>>;

    /// Run a batch job and wait for it to finish, leaving its output visible
    async fn run_to_completion(&self, spec: &LaunchSpec) -> Result<ProcessExit>;
}

/// Trait representing a managed process that can be controlled and monitored
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> Result<Option<ProcessExit>>;

    /// Wait up to `timeout` for the process to exit
    async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ProcessExit>>;

    /// Ask the whole process tree to terminate
    async fn terminate(&mut self) -> Result<()>;

    /// Forcefully kill the whole process tree
    async fn kill(&mut self) -> Result<()>;

    /// Take a readable handle to the child's stdout for async consumption.
    /// Returns None if stdout was not piped or already taken.
    fn take_stdout(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>>;

    /// Take a readable handle to the child's stderr for async consumption.
    /// Returns None if stderr was not piped or already taken.
    fn take_stderr(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>>;
}

/// Select the adapter for the platform this binary was built for
pub fn platform_adapter() -> Arc<dyn ProcessAdapter> {
    #[cfg(unix)]
    {
        Arc::new(UnixProcessAdapter::new())
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsProcessAdapter::new())
    }
}

fn exit_from_status(pid: u32, status: std::process::ExitStatus) -> ProcessExit {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ProcessExit {
        pid,
        exit_code: status.code(),
        signal,
        timestamp: schema::current_timestamp(),
    }
}

/// Unix process adapter: session leaders signalled by process group
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessAdapter;

#[cfg(unix)]
impl UnixProcessAdapter {
    /// Create a new Unix process adapter
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessAdapter for UnixProcessAdapter {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>> {
        use crate::process::{unix, StdioMode};

        debug!("Spawning Unix process: {}", spec.display());
        let child = unix::spawn(
            &spec.program,
            &spec.arg_refs(),
            Some(&spec.working_dir),
            StdioMode::Piped,
        )?;
        Ok(Box::new(UnixManagedProcess { child }))
    }

    async fn run_to_completion(&self, spec: &LaunchSpec) -> Result<ProcessExit> {
        use crate::process::{unix, StdioMode};

        debug!("Running Unix job to completion: {}", spec.display());
        let mut child = unix::spawn(
            &spec.program,
            &spec.arg_refs(),
            Some(&spec.working_dir),
            StdioMode::Inherit,
        )?;
        let status = child.wait().await?;
        Ok(exit_from_status(child.pid(), status))
    }
}

#[cfg(unix)]
struct UnixManagedProcess {
    child: crate::process::unix::ChildProcess,
}

#[cfg(unix)]
#[async_trait]
impl ManagedProcess for UnixManagedProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        let pid = self.pid();
        Ok(self
            .child
            .try_wait()?
            .map(|status| exit_from_status(pid, status)))
    }

    async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ProcessExit>> {
        let pid = self.pid();
        let status = crate::process::unix::wait_with_timeout(&mut self.child, timeout).await?;
        Ok(status.map(|status| exit_from_status(pid, status)))
    }

    async fn terminate(&mut self) -> Result<()> {
        crate::process::unix::signal_term_group(&self.child)
    }

    async fn kill(&mut self) -> Result<()> {
        crate::process::unix::signal_kill_group(&self.child)
    }

    fn take_stdout(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        self.child.take_stdout().map(|s| {
            let r: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(s);
            r
        })
    }

    fn take_stderr(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        self.child.take_stderr().map(|s| {
            let r: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(s);
            r
        })
    }
}

/// Windows process adapter: visible consoles, tree kill by PID
#[cfg(windows)]
#[derive(Copy, Clone, Debug, Default)]
pub struct WindowsProcessAdapter;

#[cfg(windows)]
impl WindowsProcessAdapter {
    /// Create a new Windows process adapter
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
#[async_trait]
impl ProcessAdapter for WindowsProcessAdapter {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>> {
        use crate::process::{windows, StdioMode};

        debug!("Spawning Windows process: {}", spec.display());
        let child = windows::spawn(
            &spec.program,
            &spec.arg_refs(),
            Some(&spec.working_dir),
            StdioMode::NewConsole,
        )?;
        Ok(Box::new(WindowsManagedProcess { child }))
    }

    async fn run_to_completion(&self, spec: &LaunchSpec) -> Result<ProcessExit> {
        use crate::process::{windows, StdioMode};

        debug!("Running Windows job to completion: {}", spec.display());
        let mut child = windows::spawn(
            &spec.program,
            &spec.arg_refs(),
            Some(&spec.working_dir),
            StdioMode::NewConsole,
        )?;
        let status = child.wait().await?;
        Ok(exit_from_status(child.pid(), status))
    }
}

#[cfg(windows)]
struct WindowsManagedProcess {
    child: crate::process::windows::ChildProcess,
}

#[cfg(windows)]
#[async_trait]
impl ManagedProcess for WindowsManagedProcess {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        let pid = self.pid();
        Ok(self
            .child
            .try_wait()?
            .map(|status| exit_from_status(pid, status)))
    }

    async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ProcessExit>> {
        let pid = self.pid();
        let status = crate::process::windows::wait_with_timeout(&mut self.child, timeout).await?;
        Ok(status.map(|status| exit_from_status(pid, status)))
    }

    async fn terminate(&mut self) -> Result<()> {
        crate::process::windows::terminate_tree(&self.child).await
    }

    async fn kill(&mut self) -> Result<()> {
        crate::process::windows::kill_tree(&mut self.child).await
    }

    fn take_stdout(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        self.child.take_stdout().map(|s| {
            let r: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(s);
            r
        })
    }

    fn take_stderr(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        self.child.take_stderr().map(|s| {
            let r: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(s);
            r
        })
    }
}

/// Mock process adapter for testing
#[derive(Debug, Clone, Default)]
pub struct MockProcessAdapter {
    /// Instructions for mock processes, consumed one per spawn/run
    instructions: Arc<tokio::sync::Mutex<Vec<MockInstruction>>>,
    /// Number of processes launched through this adapter
    launches: Arc<AtomicUsize>,
    /// Number of forced kills requested across all processes
    kills: Arc<AtomicUsize>,
}

/// Instructions for mock process behavior
#[derive(Debug, Clone)]
pub struct MockInstruction {
    /// How long to wait before the process "exits" on its own
    pub exit_delay: Duration,
    /// Exit code to return on a natural exit
    pub exit_code: Option<i32>,
    /// Whether a graceful terminate request makes the process exit
    pub honors_terminate: bool,
    /// Whether terminate/kill calls report an error
    pub signals_fail: bool,
    /// Output the process "writes" to stderr
    pub stderr: Option<String>,
}

impl Default for MockInstruction {
    fn default() -> Self {
        Self {
            exit_delay: Duration::from_secs(3600),
            exit_code: Some(0),
            honors_terminate: true,
            signals_fail: false,
            stderr: None,
        }
    }
}

impl MockInstruction {
    /// A process that exits with `code` after `delay`
    pub fn exits_after(delay: Duration, code: i32) -> Self {
        Self {
            exit_delay: delay,
            exit_code: Some(code),
            ..Self::default()
        }
    }
}

static NEXT_MOCK_PID: AtomicU32 = AtomicU32::new(40_000);

impl MockProcessAdapter {
    /// Create a new mock adapter with no pre-configured instructions
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock adapter with a queue of instructions
    pub fn with_instructions(instructions: Vec<MockInstruction>) -> Self {
        Self {
            instructions: Arc::new(tokio::sync::Mutex::new(instructions)),
            ..Self::default()
        }
    }

    /// Number of processes spawned or run so far
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of `kill` calls made on processes from this adapter
    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    async fn next_instruction(&self) -> MockInstruction {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut instructions = self.instructions.lock().await;
        if instructions.is_empty() {
            MockInstruction::default()
        } else {
            instructions.remove(0)
        }
    }
}

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>> {
        debug!("Spawning mock process for: {}", spec.display());
        let instruction = self.next_instruction().await;
        let pid = NEXT_MOCK_PID.fetch_add(1, Ordering::Relaxed);
        let mut process = MockManagedProcess::new(pid, instruction);
        process.kills = self.kills.clone();
        Ok(Box::new(process))
    }

    async fn run_to_completion(&self, spec: &LaunchSpec) -> Result<ProcessExit> {
        debug!("Running mock job for: {}", spec.display());
        let instruction = self.next_instruction().await;
        let pid = NEXT_MOCK_PID.fetch_add(1, Ordering::Relaxed);
        let mut process = MockManagedProcess::new(pid, instruction);
        loop {
            if let Some(exit) = process.try_wait()? {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Mock managed process for testing
struct MockManagedProcess {
    pid: u32,
    instruction: MockInstruction,
    started_at: Instant,
    terminated: bool,
    killed: bool,
    stderr_taken: bool,
    kills: Arc<AtomicUsize>,
}

impl MockManagedProcess {
    fn new(pid: u32, instruction: MockInstruction) -> Self {
        Self {
            pid,
            instruction,
            started_at: Instant::now(),
            terminated: false,
            killed: false,
            stderr_taken: false,
            kills: Arc::default(),
        }
    }

    fn has_exited(&self) -> bool {
        if self.killed && !self.instruction.signals_fail {
            return true;
        }
        if self.terminated && self.instruction.honors_terminate && !self.instruction.signals_fail
        {
            return true;
        }
        self.started_at.elapsed() >= self.instruction.exit_delay
    }

    fn create_exit(&self) -> ProcessExit {
        let (exit_code, signal) = if self.started_at.elapsed() >= self.instruction.exit_delay {
            (self.instruction.exit_code, None)
        } else if self.killed {
            (None, Some(9))
        } else {
            (None, Some(15))
        };

        ProcessExit {
            pid: self.pid,
            exit_code,
            signal,
            timestamp: schema::current_timestamp(),
        }
    }
}

#[async_trait]
impl ManagedProcess for MockManagedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        if self.has_exited() {
            Ok(Some(self.create_exit()))
        } else {
            Ok(None)
        }
    }

    async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ProcessExit>> {
        let start = Instant::now();
        loop {
            if let Some(exit) = self.try_wait()? {
                return Ok(Some(exit));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        debug!("Terminating mock process {}", self.pid);
        self.terminated = true;
        if self.instruction.signals_fail {
            return Err(CoreError::ProcessSignal(format!(
                "mock terminate failed for {}",
                self.pid
            )));
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        debug!("Killing mock process {}", self.pid);
        self.killed = true;
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.instruction.signals_fail {
            return Err(CoreError::ProcessSignal(format!(
                "mock kill failed for {}",
                self.pid
            )));
        }
        Ok(())
    }

    fn take_stdout(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        None
    }

    fn take_stderr(&mut self) -> Option<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        if self.stderr_taken {
            return None;
        }
        self.stderr_taken = true;
        self.instruction.stderr.clone().map(|text| {
            let r: Pin<Box<dyn AsyncRead + Send + Unpin>> =
                Box::pin(std::io::Cursor::new(text.into_bytes()));
            r
        })
    }
}
