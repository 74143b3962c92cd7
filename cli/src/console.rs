//! Interactive monitor console
//!
//! The console owns every piece of display state. Capture rows arrive from the
//! background poll task over an mpsc channel and are rendered here; user
//! commands come in one line at a time.

use crate::view;
use crate::Result;
use schema::CaptureState;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tunnelwatch_core::supervisor::ProcessAdapter;
use tunnelwatch_core::{
    spawn_poller, AnalysisRunner, CaptureSupervisor, CoreError, MonitorConfig, PollUpdate,
    PollerHandle, SupervisorTimings, TailReader,
};

/// Asked before quitting while a capture is active
pub const QUIT_CONFIRMATION: &str = "Capture is still running. Stop it and quit? [y/N]";

/// Capture output lines shown by `status`
const STATUS_OUTPUT_LINES: usize = 5;

const HELP: &str = "\
Commands:
  start    start capturing DNS traffic
  stop     stop the running capture
  analyze  classify captured queries and show suspicious ones
  refresh  redraw the capture summary and the analysis results
  status   show capture state and counters
  help     show this help
  quit     stop any capture and exit";

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a capture session
    Start,
    /// Stop the capture session
    Stop,
    /// Run the analysis job
    Analyze,
    /// Redraw both views
    Refresh,
    /// Print state and counters
    Status,
    /// Print the command list
    Help,
    /// Leave the console
    Quit,
    /// Blank input
    Empty,
    /// Anything else
    Unknown(String),
}

impl Command {
    /// Parse one input line; matching is case-insensitive
    pub fn parse(line: &str) -> Self {
        let word = line.trim().to_ascii_lowercase();
        match word.as_str() {
            "" => Command::Empty,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "analyze" | "analyse" => Command::Analyze,
            "refresh" => Command::Refresh,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

/// Whether the console keeps running after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading commands
    Continue,
    /// Leave the console
    Exit,
}

/// Interactive monitor bound to one project
pub struct Console<W: Write> {
    config: MonitorConfig,
    supervisor: CaptureSupervisor,
    analysis: AnalysisRunner,
    poller: PollerHandle,
    total_rows: usize,
    awaiting_quit_confirmation: bool,
    out: W,
}

impl<W: Write> Console<W> {
    /// Build the console and start the background poll task
    pub fn new(
        config: MonitorConfig,
        adapter: Arc<dyn ProcessAdapter>,
        out: W,
    ) -> (Self, mpsc::Receiver<PollUpdate>) {
        let supervisor = CaptureSupervisor::new(
            adapter.clone(),
            SupervisorTimings::from_config(&config.capture),
        );
        let analysis = AnalysisRunner::from_config(&config, adapter);
        let (poller, updates) = spawn_poller(
            TailReader::new(config.capture_log_path()),
            config.poll_interval(),
        );
        let console = Self {
            config,
            supervisor,
            analysis,
            poller,
            total_rows: 0,
            awaiting_quit_confirmation: false,
            out,
        };
        (console, updates)
    }

    /// Output written so far
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Current capture state
    pub fn capture_state(&self) -> CaptureState {
        self.supervisor.state()
    }

    /// Print the greeting and the help text
    pub fn banner(&mut self) -> Result<()> {
        writeln!(self.out, "DNS Tunneling Detection Tool")?;
        writeln!(
            self.out,
            "Project root: {}",
            self.config.project_root.display()
        )?;
        writeln!(self.out, "{}", HELP)?;
        Ok(())
    }

    /// Handle one line of user input
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        if self.awaiting_quit_confirmation {
            self.awaiting_quit_confirmation = false;
            let answer = line.trim().to_ascii_lowercase();
            if answer == "y" || answer == "yes" {
                self.stop_capture().await?;
                return Ok(Flow::Exit);
            }
            writeln!(self.out, "Quit cancelled")?;
            return Ok(Flow::Continue);
        }

        match Command::parse(line) {
            Command::Empty => {}
            Command::Start => self.start_capture().await?,
            Command::Stop => self.stop_capture().await?,
            Command::Analyze => self.analyze().await?,
            Command::Refresh => self.refresh()?,
            Command::Status => self.status().await?,
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Quit => {
                if self.supervisor.is_running() {
                    self.awaiting_quit_confirmation = true;
                    writeln!(self.out, "{}", QUIT_CONFIRMATION)?;
                } else {
                    return Ok(Flow::Exit);
                }
            }
            Command::Unknown(word) => {
                writeln!(self.out, "Unknown command '{}'. Type 'help' for commands.", word)?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Render an update from the poll task
    pub fn apply_update(&mut self, update: PollUpdate) -> Result<()> {
        if update.reset {
            writeln!(self.out, "--- live view cleared ---")?;
        }
        for record in &update.records {
            writeln!(self.out, "{}", view::render_captured(record))?;
        }
        if !update.records.is_empty() || update.reset || update.total_rows != self.total_rows {
            writeln!(self.out, "{}", view::capture_summary(update.total_rows))?;
        }
        self.total_rows = update.total_rows;

        let was_running = self.supervisor.state() == CaptureState::Running;
        if was_running && !self.supervisor.is_running() {
            let how = self
                .supervisor
                .last_exit()
                .map(|e| e.describe())
                .unwrap_or_else(|| "unknown status".to_string());
            writeln!(self.out, "Capture process exited ({})", how)?;
        }
        Ok(())
    }

    /// Acknowledge Ctrl-C before shutting down
    pub fn handle_interrupt(&mut self) -> Result<()> {
        writeln!(self.out, "Interrupted, stopping capture")?;
        Ok(())
    }

    /// Stop the capture and the poll task
    pub async fn shutdown(mut self) -> Result<()> {
        let stopped = self.supervisor.shutdown().await;
        self.poller.shutdown().await;
        if let Err(e) = stopped {
            warn!("Capture did not stop cleanly: {}", e);
            writeln!(self.out, "Warning: {}", e)?;
        }
        self.out.flush()?;
        Ok(())
    }

    async fn start_capture(&mut self) -> Result<()> {
        match self.supervisor.start(&self.config.capture_launch()).await {
            Ok(pid) => {
                self.total_rows = 0;
                self.poller.reset();
                writeln!(self.out, "Capture started (pid {})", pid)?;
            }
            Err(e) => self.report(&e)?,
        }
        Ok(())
    }

    async fn stop_capture(&mut self) -> Result<()> {
        if !self.supervisor.is_running() {
            writeln!(self.out, "No capture is running")?;
            return Ok(());
        }
        match self.supervisor.stop().await {
            Ok(()) => writeln!(self.out, "Capture stopped")?,
            Err(e) => {
                warn!("Capture stop reported: {}", e);
                writeln!(self.out, "Warning: {}", e)?;
            }
        }
        Ok(())
    }

    async fn analyze(&mut self) -> Result<()> {
        writeln!(self.out, "Running analysis... Please wait...")?;
        self.out.flush()?;
        match self.analysis.analyze().await {
            Ok(snapshot) => {
                info!("Analysis finished");
                write!(self.out, "{}", view::render_suspicious(&snapshot))?;
            }
            Err(e) => self.report(&e)?,
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.poller.refresh();
        match self.analysis.snapshot_reader().read_all() {
            Ok(snapshot) => write!(self.out, "{}", view::render_suspicious(&snapshot))?,
            Err(e) => writeln!(self.out, "Error loading predictions: {}", e)?,
        }
        Ok(())
    }

    async fn status(&mut self) -> Result<()> {
        let running = self.supervisor.is_running();
        writeln!(self.out, "Capture: {}", self.supervisor.state())?;
        if running {
            if let (Some(pid), Some(uptime)) = (self.supervisor.pid(), self.supervisor.uptime()) {
                let uptime = std::time::Duration::from_secs(uptime.as_secs());
                writeln!(
                    self.out,
                    "  pid {}, up {}",
                    pid,
                    humantime::format_duration(uptime)
                )?;
            }
        } else if let Some(exit) = self.supervisor.last_exit() {
            writeln!(self.out, "  last capture ended with {}", exit.describe())?;
        }
        let recent = self.supervisor.recent_output().await;
        if !recent.is_empty() {
            writeln!(self.out, "  recent capture output:")?;
            for line in recent.iter().rev().take(STATUS_OUTPUT_LINES).rev() {
                writeln!(self.out, "    [{}] {}", line.timestamp, line.content)?;
            }
        }
        writeln!(self.out, "{}", view::capture_summary(self.total_rows))?;
        match self.analysis.snapshot_reader().read_all() {
            Ok(snapshot) => writeln!(self.out, "{}", view::suspicious_summary(&snapshot))?,
            Err(e) => writeln!(self.out, "Error loading results: {}", e)?,
        }
        Ok(())
    }

    fn report(&mut self, err: &CoreError) -> Result<()> {
        debug!("Command failed with {}", err.code());
        writeln!(self.out, "Error: {}", err)?;
        Ok(())
    }
}

/// Run the console on stdin/stdout until the user quits, stdin closes or
/// Ctrl-C is pressed. Any running capture is stopped on the way out.
pub async fn run_interactive(config: MonitorConfig, adapter: Arc<dyn ProcessAdapter>) -> Result<()> {
    let (mut console, mut updates) = Console::new(config, adapter, std::io::stdout());
    console.banner()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if console.handle_line(&line).await? == Flow::Exit {
                        break;
                    }
                }
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            Some(update) = updates.recv() => console.apply_update(update)?,
            _ = tokio::signal::ctrl_c() => {
                console.handle_interrupt()?;
                break;
            }
        }
    }

    console.shutdown().await
}
