//! An in-memory camera that speaks the same GATT protocol.
//!
//! [`SimulatedCamera`] lets the CLI and dashboards run without hardware
//! (`--simulate`) and serves as a transport in tests. It exposes the four
//! characteristics of the configured [`GattUuids`] and behaves like the
//! firmware:
//!
//! * `StartStreaming` / `StopStreaming` gate whether captures are served;
//! * every served `StartSingleCapture` notifies an ImageInfo length record
//!   and then pushes a synthetic JPEG in MTU-sized chunks, paced by
//!   [`SimConfig::chunk_interval`];
//! * a capture requested while a transfer is still running is ignored;
//! * the capture interval characteristic reads back one byte.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use btleplug::api::WriteType;
use futures::StreamExt;
use log::{debug, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::GattUuids;
use crate::error::{CamError, Result};
use crate::protocol::{Command, Phy, IMAGE_INFO_LENGTH_TAG};
use crate::transport::{Notification, NotificationStream, Transport};

/// Behaviour of a [`SimulatedCamera`].
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Name reported in [`crate::types::CamEvent::Connected`].
    pub name: String,
    /// Size of every synthetic image in bytes.
    pub image_len: usize,
    /// Bytes per data notification.
    pub chunk_len: usize,
    /// Pause between two data notifications.
    pub chunk_interval: Duration,
    /// Value of the capture interval characteristic.
    pub capture_interval_minutes: u8,
    /// Send the ImageInfo length record before each image.
    pub announce_length: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "CamSim".into(),
            image_len: 24_000,
            chunk_len: 244,
            chunk_interval: Duration::from_millis(2),
            capture_interval_minutes: 1,
            announce_length: true,
        }
    }
}

/// A deterministic stand-in for a JPEG: SOI marker, a pattern derived from
/// `seq`, EOI marker. Images shorter than four bytes are pattern only.
pub fn synth_image(seq: u64, len: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len)
        .map(|i| (i as u64).wrapping_add(seq.wrapping_mul(31)) as u8)
        .collect();
    if len >= 4 {
        image[..2].copy_from_slice(&[0xFF, 0xD8]);
        image[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    }
    image
}

struct SimState {
    connected: AtomicBool,
    streaming: AtomicBool,
    transferring: AtomicBool,
    captures: AtomicU64,
    phy: Mutex<Phy>,
    subscribed: Mutex<HashSet<Uuid>>,
    commands: Mutex<Vec<Command>>,
    sender: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SimulatedCamera {
    uuids: GattUuids,
    config: SimConfig,
    state: Arc<SimState>,
}

impl SimulatedCamera {
    pub fn new(uuids: GattUuids, config: SimConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            uuids,
            config,
            state: Arc::new(SimState {
                connected: AtomicBool::new(true),
                streaming: AtomicBool::new(false),
                transferring: AtomicBool::new(false),
                captures: AtomicU64::new(0),
                phy: Mutex::new(Phy::OneMbps),
                subscribed: Mutex::new(HashSet::new()),
                commands: Mutex::new(Vec::new()),
                sender: Mutex::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Captures served so far.
    pub fn captures(&self) -> u64 {
        self.state.captures.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.state.streaming.load(Ordering::SeqCst)
    }

    pub fn phy(&self) -> Phy {
        *lock(&self.state.phy)
    }

    /// Every command written so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state.commands).clone()
    }

    /// Drop the link. The notification stream ends once any transfer in
    /// flight has stopped.
    pub fn disconnect(&self) {
        info!("{}: link dropped", self.config.name);
        self.state.connected.store(false, Ordering::SeqCst);
        lock(&self.state.sender).take();
    }

    fn is_subscribed(&self, uuid: Uuid) -> bool {
        lock(&self.state.subscribed).contains(&uuid)
    }

    fn handle(&self, command: Command) {
        lock(&self.state.commands).push(command);
        match command {
            Command::StartStreaming => self.state.streaming.store(true, Ordering::SeqCst),
            Command::StopStreaming => self.state.streaming.store(false, Ordering::SeqCst),
            Command::SetPhy(phy) => *lock(&self.state.phy) = phy,
            Command::GetBleParams => debug!("{}: BLE params requested", self.config.name),
            Command::StartSingleCapture => self.start_capture(),
        }
    }

    fn start_capture(&self) {
        if !self.is_streaming() {
            debug!("{}: capture ignored, not streaming", self.config.name);
            return;
        }
        let Some(sender) = lock(&self.state.sender).clone() else {
            return;
        };
        if self
            .state
            .transferring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("{}: capture ignored, transfer in progress", self.config.name);
            return;
        }

        let seq = self.state.captures.fetch_add(1, Ordering::SeqCst);
        let image = synth_image(seq, self.config.image_len);
        let info = self.config.announce_length && self.is_subscribed(self.uuids.image_info);
        let data = self.is_subscribed(self.uuids.data);
        let (image_info_uuid, data_uuid) = (self.uuids.image_info, self.uuids.data);
        let chunk_len = self.config.chunk_len.max(1);
        let interval = self.config.chunk_interval;
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            if info {
                let mut value = vec![IMAGE_INFO_LENGTH_TAG];
                value.extend_from_slice(&(image.len() as u32).to_le_bytes());
                let _ = sender.send(Notification {
                    uuid: image_info_uuid,
                    value,
                });
            }
            if data {
                for chunk in image.chunks(chunk_len) {
                    if !state.connected.load(Ordering::SeqCst) {
                        break;
                    }
                    let sent = sender.send(Notification {
                        uuid: data_uuid,
                        value: chunk.to_vec(),
                    });
                    if sent.is_err() {
                        break;
                    }
                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                }
            }
            state.transferring.store(false, Ordering::SeqCst);
        });
    }

    fn known(&self, uuid: Uuid) -> Result<()> {
        if self.characteristics().contains(&uuid) {
            Ok(())
        } else {
            Err(CamError::Discovery(format!("characteristic {uuid} not found")))
        }
    }
}

impl Transport for SimulatedCamera {
    fn characteristics(&self) -> Vec<Uuid> {
        vec![
            self.uuids.command,
            self.uuids.data,
            self.uuids.image_info,
            self.uuids.capture_interval,
        ]
    }

    async fn write(
        &self,
        characteristic: Uuid,
        bytes: &[u8],
        _write_type: WriteType,
    ) -> Result<()> {
        self.known(characteristic)?;
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(CamError::Write {
                uuid: characteristic,
                reason: "not connected".into(),
            });
        }
        if characteristic != self.uuids.command {
            return Err(CamError::Write {
                uuid: characteristic,
                reason: "characteristic is not writable".into(),
            });
        }
        match Command::decode(bytes) {
            Some(command) => self.handle(command),
            None => debug!("{}: unknown command {bytes:02x?}", self.config.name),
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        self.known(characteristic)?;
        if characteristic != self.uuids.data && characteristic != self.uuids.image_info {
            return Err(CamError::Subscribe {
                uuid: characteristic,
                reason: "characteristic does not notify".into(),
            });
        }
        lock(&self.state.subscribed).insert(characteristic);
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        self.known(characteristic)?;
        if characteristic != self.uuids.capture_interval {
            return Err(CamError::Read {
                uuid: characteristic,
                reason: "characteristic is not readable".into(),
            });
        }
        Ok(vec![self.config.capture_interval_minutes])
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let rx = lock(&self.state.receiver)
            .take()
            .ok_or_else(|| CamError::Connection("notification stream already taken".into()))?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (n, rx))
        })
        .boxed())
    }
}
