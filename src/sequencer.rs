//! Camera bring-up and the recurring capture trigger.
//!
//! Once the command characteristic is bound the sequencer writes
//! [`Command::STARTUP`] (2M PHY, start streaming, request link parameters,
//! first capture) and then triggers one capture per period until the
//! returned [`CaptureTimer`] is cancelled or dropped.
//!
//! Writes go out without response. A failed write is logged and the sequence
//! carries on; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use btleplug::api::WriteType;
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{Command, CAPTURE_PERIOD};
use crate::transport::Transport;

// ── CommandWriter ────────────────────────────────────────────────────────────

/// A write primitive bound to the command characteristic.
pub struct CommandWriter<T> {
    transport: Arc<T>,
    characteristic: Uuid,
}

impl<T> Clone for CommandWriter<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            characteristic: self.characteristic,
        }
    }
}

impl<T: Transport> CommandWriter<T> {
    pub fn new(transport: Arc<T>, characteristic: Uuid) -> Self {
        Self {
            transport,
            characteristic,
        }
    }

    /// Write `command` without response.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.transport
            .write(self.characteristic, &command.encode(), WriteType::WithoutResponse)
            .await
    }

    /// Write `command`, logging the outcome instead of returning it.
    async fn fire(&self, command: Command) {
        match self.send(command).await {
            Ok(()) => info!("{}: {command}", self.characteristic),
            Err(e) => warn!("{}: {command} command error: {e}", self.characteristic),
        }
    }
}

// ── CaptureTimer ─────────────────────────────────────────────────────────────

/// Owns the task driving the recurring capture trigger.
///
/// Dropping the timer aborts the task, so a session that ends for any reason
/// stops writing to the device.
#[derive(Debug)]
pub struct CaptureTimer {
    task: JoinHandle<()>,
}

impl CaptureTimer {
    /// Stop the trigger now.
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CaptureTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── CommandSequencer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct CommandSequencer {
    capture_period: Duration,
}

impl Default for CommandSequencer {
    fn default() -> Self {
        Self::new(CAPTURE_PERIOD)
    }
}

impl CommandSequencer {
    pub fn new(capture_period: Duration) -> Self {
        Self { capture_period }
    }

    /// Write the startup sequence, then trigger a capture every period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: Transport>(&self, writer: CommandWriter<T>) -> CaptureTimer {
        let period = self.capture_period;
        let task = tokio::spawn(async move {
            for command in Command::STARTUP {
                writer.fire(command).await;
            }

            // The startup sequence already triggered the first capture.
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                writer.fire(Command::StartSingleCapture).await;
            }
        });
        CaptureTimer { task }
    }
}
