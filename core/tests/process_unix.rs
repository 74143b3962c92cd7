//! Integration tests for Unix process management
//!
//! These tests verify that capture processes:
//! - Run in their own process group (via setsid)
//! - Take their helpers down with them when the group is signalled
//! - Are killed when their handle is dropped while still running

#![cfg(unix)]
#![allow(unsafe_code)] // Required for libc calls in tests

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tunnelwatch_core::process::unix::{signal_kill_group, signal_term_group, spawn, wait_with_timeout};
use tunnelwatch_core::process::StdioMode;

/// Whether `pid` is still executing; zombies count as gone
fn is_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    } else {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
}

async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..40 {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path.to_string_lossy().into_owned()
}

/// Spawned processes lead their own group, separate from the test runner
#[tokio::test]
async fn test_process_group_isolation() {
    let child = spawn("sleep", &["5"], None, StdioMode::Piped).expect("Failed to spawn sleep");
    let parent_pgid = unsafe { libc::getpgrp() };

    let child_pgid = unsafe { libc::getpgid(child.pid() as i32) };
    assert_eq!(child_pgid, child.pid() as i32);
    assert_ne!(child_pgid, parent_pgid);

    let _ = signal_kill_group(&child);
}

/// SIGTERM to the group ends a cooperative process
#[tokio::test]
async fn test_sigterm_termination() {
    let mut child = spawn("sleep", &["10"], None, StdioMode::Piped).expect("Failed to spawn sleep");

    signal_term_group(&child).expect("Failed to send SIGTERM");
    let status = wait_with_timeout(&mut child, Duration::from_secs(2))
        .await
        .expect("wait")
        .expect("process should exit after SIGTERM");
    assert!(!status.success());
}

/// A sniffer-like helper started by the capture script is killed with it
#[tokio::test]
async fn test_process_group_tree_termination() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        dir.path(),
        "capture.sh",
        "#!/bin/sh\nsleep 30 &\necho $! > helper.pid\nsleep 30\n",
    );

    let mut child = spawn(&script, &[], Some(dir.path()), StdioMode::Piped).expect("spawn script");
    let pid_file = dir.path().join("helper.pid");
    let mut helper = None;
    for _ in 0..40 {
        if let Ok(text) = std::fs::read_to_string(&pid_file) {
            if let Ok(pid) = text.trim().parse::<u32>() {
                helper = Some(pid);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let helper = helper.expect("helper pid written");
    assert!(is_alive(helper));

    signal_kill_group(&child).expect("Failed to kill process group");
    wait_with_timeout(&mut child, Duration::from_secs(2))
        .await
        .expect("wait")
        .expect("script should exit");
    assert!(wait_until_dead(helper).await, "helper {} survived", helper);
}

/// A group that ignores SIGTERM still goes down on SIGKILL
#[tokio::test]
async fn test_timeout_escalation_to_kill() {
    let mut child = spawn(
        "sh",
        &["-c", "trap '' TERM; sleep 30 & wait"],
        None,
        StdioMode::Piped,
    )
    .expect("spawn sh");
    tokio::time::sleep(Duration::from_millis(200)).await;

    signal_term_group(&child).expect("Failed to send SIGTERM");
    let found = wait_with_timeout(&mut child, Duration::from_millis(200))
        .await
        .expect("wait");
    assert!(found.is_none(), "shell should ignore SIGTERM");

    signal_kill_group(&child).expect("Failed to send SIGKILL");
    let status = wait_with_timeout(&mut child, Duration::from_secs(2))
        .await
        .expect("wait")
        .expect("process should exit after SIGKILL");
    assert!(!status.success());
}

/// Dropping a live handle kills its group
#[tokio::test]
async fn test_drop_kills_running_group() {
    let child = spawn("sleep", &["30"], None, StdioMode::Piped).expect("spawn sleep");
    let pid = child.pid();
    assert!(is_alive(pid));

    drop(child);
    assert!(wait_until_dead(pid).await, "process {} survived drop", pid);
}

/// Each capture gets a distinct group
#[tokio::test]
async fn test_multiple_processes() {
    let child1 = spawn("sleep", &["2"], None, StdioMode::Piped).expect("spawn first");
    let child2 = spawn("sleep", &["2"], None, StdioMode::Piped).expect("spawn second");

    assert_ne!(child1.pid(), child2.pid());
    assert_ne!(
        unsafe { libc::getpgid(child1.pid() as i32) },
        unsafe { libc::getpgid(child2.pid() as i32) }
    );

    let _ = signal_kill_group(&child1);
    let _ = signal_kill_group(&child2);
}
