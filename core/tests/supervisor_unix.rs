//! Capture supervisor against real processes

#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};
use tunnelwatch_core::{
    platform_adapter, CaptureState, CaptureSupervisor, CoreError, MonitorConfig,
    SupervisorTimings, TailReader,
};

fn project(dir: &Path, script: &str) -> MonitorConfig {
    std::fs::write(dir.join("capture.sh"), script).expect("write capture script");
    let mut config = MonitorConfig::for_project(dir);
    config.capture.command = vec!["sh".to_string(), "capture.sh".to_string()];
    config.capture.script = "capture.sh".into();
    config.capture.grace_period_ms = 200;
    config.capture.graceful_timeout_ms = 300;
    config.capture.kill_timeout_ms = 1000;
    config.capture.diagnostics_timeout_ms = 500;
    config
}

/// Whether `pid` is still executing; zombies count as gone
#[cfg(target_os = "linux")]
fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
async fn read_pid_file(path: &Path) -> Option<u32> {
    for _ in 0..40 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return Some(pid);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

fn supervisor(config: &MonitorConfig) -> CaptureSupervisor {
    CaptureSupervisor::new(
        platform_adapter(),
        SupervisorTimings::from_config(&config.capture),
    )
}

#[tokio::test]
async fn capture_rows_reach_the_tail_reader() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        r#"echo "timestamp,qname,src_ip,dst_ip,is_response" > dns_log.csv
i=0
while [ $i -lt 5 ]; do
  echo "t$i,q$i.example,10.0.0.2,8.8.8.8,0" >> dns_log.csv
  i=$((i + 1))
done
sleep 30
"#,
    );
    let mut sup = supervisor(&config);
    sup.start(&config.capture_launch()).await.expect("start");
    assert_eq!(sup.state(), CaptureState::Running);

    let mut tail = TailReader::new(config.capture_log_path());
    let mut seen = Vec::new();
    for _ in 0..40 {
        seen.extend(tail.poll().records);
        if seen.len() == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let names: Vec<_> = seen.iter().map(|r| r.query_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["q0.example", "q1.example", "q2.example", "q3.example", "q4.example"]
    );

    sup.stop().await.expect("stop");
    assert_eq!(sup.state(), CaptureState::Idle);
    sup.stop().await.expect("stop is idempotent");
}

#[tokio::test]
async fn immediate_exit_carries_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        "echo 'scapy not installed' >&2\necho 'starting'\nexit 1\n",
    );
    let mut sup = supervisor(&config);

    match sup.start(&config.capture_launch()).await.unwrap_err() {
        CoreError::ImmediateExit { exit, diagnostics } => {
            assert_eq!(exit, "exit code 1");
            assert!(diagnostics.starts_with("scapy not installed"));
            assert!(diagnostics.contains("starting"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(sup.state(), CaptureState::Idle);
    assert!(!sup.is_running());
}

#[tokio::test]
async fn sigterm_trap_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        "trap '' TERM\nwhile true; do sleep 0.1; done\n",
    );
    let mut sup = supervisor(&config);
    sup.start(&config.capture_launch()).await.expect("start");

    let started = Instant::now();
    sup.stop().await.expect("stop");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(1300 + 500), "took {:?}", elapsed);
    assert_eq!(sup.state(), CaptureState::Idle);
    assert_eq!(sup.last_exit().and_then(|e| e.signal), Some(9));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn stop_kills_helpers_that_outlive_the_leader() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(
        dir.path(),
        "( trap '' TERM; exec sleep 30 ) &\necho $! > helper.pid\nwait\n",
    );
    let mut sup = supervisor(&config);
    sup.start(&config.capture_launch()).await.expect("start");
    let helper = read_pid_file(&dir.path().join("helper.pid"))
        .await
        .expect("helper pid written");
    assert!(is_alive(helper));

    sup.stop().await.expect("stop");
    assert_eq!(sup.state(), CaptureState::Idle);
    assert_eq!(sup.last_exit().and_then(|e| e.signal), Some(15));

    let mut gone = false;
    for _ in 0..40 {
        if !is_alive(helper) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "helper {} survived stop", helper);
}

#[tokio::test]
async fn missing_capture_script_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path(), "sleep 30\n");
    std::fs::remove_file(dir.path().join("capture.sh")).unwrap();
    let mut sup = supervisor(&config);

    match sup.start(&config.capture_launch()).await.unwrap_err() {
        CoreError::MissingCollaborator { what, path } => {
            assert_eq!(what, "capture script");
            assert_eq!(path, dir.path().join("capture.sh"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(sup.state(), CaptureState::Idle);
}

#[tokio::test]
async fn start_while_running_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path(), "sleep 30\n");
    let mut sup = supervisor(&config);
    let pid = sup.start(&config.capture_launch()).await.expect("start");

    assert!(matches!(
        sup.start(&config.capture_launch()).await,
        Err(CoreError::AlreadyRunning)
    ));
    assert_eq!(sup.pid(), Some(pid));

    sup.shutdown().await.expect("shutdown");
    assert!(!sup.is_running());
}
