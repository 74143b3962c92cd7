//! Background task that tails the capture log on a fixed interval
//!
//! The task runs for the whole application lifetime, independent of whether
//! a capture is active. New rows reach the foreground through an mpsc channel;
//! the foreground steers the task through [`PollerHandle`].

use crate::tail::TailReader;
use schema::CapturedRecord;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Queue depth between the poll task and its consumer
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Control messages for the poll task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    /// Rewind the reader for a fresh capture session
    Reset,
    /// Poll now and publish even if nothing is new
    Refresh,
    /// Stop the task
    Shutdown,
}

/// One publication from the poll task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    /// Rows appended since the previous update
    pub records: Vec<CapturedRecord>,
    /// Rows delivered since the last reset
    pub total_rows: usize,
    /// Whether the reader was rewound just before this poll
    pub reset: bool,
}

/// Handle for controlling the poll task
#[derive(Debug)]
pub struct PollerHandle {
    control_tx: mpsc::UnboundedSender<PollControl>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Rewind the reader; the next update carries `reset = true`
    pub fn reset(&self) {
        self.send(PollControl::Reset);
    }

    /// Ask for an immediate update
    pub fn refresh(&self) {
        self.send(PollControl::Refresh);
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        self.send(PollControl::Shutdown);
        if let Err(e) = self.join.await {
            debug!("Poll task ended abnormally: {}", e);
        }
    }

    fn send(&self, msg: PollControl) {
        if self.control_tx.send(msg).is_err() {
            debug!("Poll task already stopped, dropping {:?}", msg);
        }
    }
}

/// Spawn the poll task for `reader`
pub fn spawn_poller(
    reader: TailReader,
    period: Duration,
) -> (PollerHandle, mpsc::Receiver<PollUpdate>) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
    let join = tokio::spawn(run(reader, period, control_rx, update_tx));
    (PollerHandle { control_tx, join }, update_rx)
}

async fn run(
    mut reader: TailReader,
    period: Duration,
    mut control_rx: mpsc::UnboundedReceiver<PollControl>,
    update_tx: mpsc::Sender<PollUpdate>,
) {
    info!(
        "Polling {} every {:?}",
        reader.path().display(),
        period
    );
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let (forced, reset) = tokio::select! {
            msg = control_rx.recv() => match msg {
                Some(PollControl::Reset) => {
                    reader.reset();
                    (true, true)
                }
                Some(PollControl::Refresh) => (true, false),
                Some(PollControl::Shutdown) | None => break,
            },
            _ = tick.tick() => (false, false),
        };

        let batch = reader.poll();
        if batch.is_empty() && !forced {
            continue;
        }

        let update = PollUpdate {
            records: batch.records,
            total_rows: batch.total_rows,
            reset,
        };
        if update_tx.send(update).await.is_err() {
            debug!("Update receiver dropped, stopping poll task");
            break;
        }
    }

    info!("Poll task for {} stopped", reader.path().display());
}
