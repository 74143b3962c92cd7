//! Windows process management using per-child consoles and tree kills
//!
//! Windows has no process groups that can be signalled the way Unix does, so
//! the whole tree below a child is addressed by PID through `taskkill /T`.
//! A first `taskkill /T` asks the tree to close; `taskkill /F /T` forces it.
//! A `ChildProcess` dropped while still running has its tree force-killed.

use super::StdioMode;
use crate::{CoreError, Result};
use std::os::windows::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// `taskkill` exit code when no process matched the PID
const TASKKILL_NOT_FOUND: i32 = 128;

/// A child process whose tree is terminated by PID
#[derive(Debug)]
pub struct ChildProcess {
    pid: u32,
    child: Child,
    /// Set once an exit status has been observed
    reaped: bool,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to exit and return its exit status (async)
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        let status = self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })?;
        self.reaped = true;
        Ok(status)
    }

    /// Try to wait for the process to exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        let status = self.child.try_wait().map_err(|e| {
            CoreError::ProcessWait(format!(
                "Failed to try_wait for process {}: {}",
                self.pid, e
            ))
        })?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Take the stdout handle for async reading, if available
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if available
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            warn!(
                "Process tree {} still running on drop, forcing taskkill",
                self.pid
            );
            let killed = std::process::Command::new("taskkill")
                .args(["/F", "/T", "/PID", &self.pid.to_string()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .creation_flags(CREATE_NO_WINDOW)
                .status()
                .map(|status| status.success())
                .unwrap_or(false);
            if !killed {
                let _ = self.child.start_kill();
            }
        }
    }
}

/// Spawn a new process
///
/// With [`StdioMode::NewConsole`] the child gets its own visible console so
/// its output can be followed while it runs.
pub fn spawn(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
    stdio: StdioMode,
) -> Result<ChildProcess> {
    debug!("Spawning process: {} {:?} (cwd: {:?})", cmd, args, cwd);

    let mut command = Command::new(cmd);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    match stdio {
        StdioMode::Piped => {
            command.stdin(Stdio::null());
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
            command.creation_flags(CREATE_NO_WINDOW);
        }
        StdioMode::Inherit => {}
        StdioMode::NewConsole => {
            command.creation_flags(CREATE_NEW_CONSOLE);
        }
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", cmd, e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", cmd, e))
    })?;
    let pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    debug!("Successfully spawned process {}", pid);

    Ok(ChildProcess {
        pid,
        child,
        reaped: false,
    })
}

async fn taskkill(pid: u32, force: bool) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/T", "/PID", pid_arg.as_str()];
    if force {
        args.insert(0, "/F");
    }
    debug!("Running taskkill {:?}", args);

    let output = Command::new("taskkill")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .await
        .map_err(|e| CoreError::ProcessSignal(format!("Failed to run taskkill: {}", e)))?;

    match output.status.code() {
        Some(0) => Ok(()),
        Some(TASKKILL_NOT_FOUND) => {
            debug!("Process tree {} already exited", pid);
            Ok(())
        }
        code => Err(CoreError::ProcessSignal(format!(
            "taskkill {:?} for process tree {} failed ({:?}): {}",
            args,
            pid,
            code,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}

/// Ask the process tree to close
pub async fn terminate_tree(child: &ChildProcess) -> Result<()> {
    taskkill(child.pid, false).await
}

/// Forcefully terminate the process tree
pub async fn kill_tree(child: &mut ChildProcess) -> Result<()> {
    match taskkill(child.pid, true).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("taskkill failed, falling back to TerminateProcess: {}", e);
            child.child.start_kill().map_err(|err| {
                CoreError::ProcessSignal(format!("Failed to kill process {}: {}", child.pid, err))
            })
        }
    }
}

/// Poll `try_wait` until the process exits or `timeout` elapses
pub async fn wait_with_timeout(
    child: &mut ChildProcess,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_listed(pid: u32) -> bool {
        std::process::Command::new("tasklist")
            .args(["/NH", "/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_drop_kills_running_tree() {
        let child = spawn(
            "cmd",
            &["/C", "ping -n 30 127.0.0.1 > NUL"],
            None,
            StdioMode::Piped,
        )
        .expect("spawn cmd");
        let pid = child.pid();
        assert!(is_listed(pid));

        drop(child);
        let mut gone = false;
        for _ in 0..40 {
            if !is_listed(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "process {} survived drop", pid);
    }

    #[tokio::test]
    async fn test_wait_marks_process_reaped() {
        let mut child = spawn("cmd", &["/C", "exit 0"], None, StdioMode::Piped).expect("spawn cmd");
        assert!(child.wait().await.expect("wait").success());
        assert!(child.reaped);
    }
}
