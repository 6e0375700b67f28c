//! Shared fixtures: a scripted transport and in-memory sinks.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blecam_rs::config::GattUuids;
use blecam_rs::error::{CamError, Result};
use blecam_rs::protocol::Command;
use blecam_rs::sink::ImageSink;
use blecam_rs::transport::{Notification, NotificationStream, Transport};
use blecam_rs::types::CamEvent;
use btleplug::api::WriteType;
use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

// ── ScriptedTransport ────────────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    writes: Vec<(Uuid, Vec<u8>, WriteType)>,
    subscribed: Vec<Uuid>,
    reads: Vec<Uuid>,
    fail_subscribe: HashSet<Uuid>,
    fail_writes: bool,
    fail_reads: bool,
    read_value: Vec<u8>,
}

/// A transport whose notifications are pushed by the test and whose
/// writes, subscriptions and reads are recorded.
pub struct ScriptedTransport {
    chars: Vec<Uuid>,
    script: Mutex<Script>,
    sender: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

impl ScriptedTransport {
    pub fn new(chars: Vec<Uuid>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            chars,
            script: Mutex::new(Script {
                read_value: vec![1],
                ..Script::default()
            }),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        })
    }

    /// All four default characteristics.
    pub fn full() -> Arc<Self> {
        let u = GattUuids::default();
        Self::new(vec![u.command, u.data, u.image_info, u.capture_interval])
    }

    /// Deliver a notification. Dropped silently once the session has
    /// released the stream, as a real link would.
    pub fn push(&self, uuid: Uuid, value: &[u8]) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(Notification {
                uuid,
                value: value.to_vec(),
            });
        }
    }

    pub fn push_data(&self, value: &[u8]) {
        self.push(GattUuids::default().data, value);
    }

    pub fn push_info(&self, value: &[u8]) {
        self.push(GattUuids::default().image_info, value);
    }

    /// End the notification stream, as a dropped link would.
    pub fn hang_up(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn fail_subscribe(&self, uuid: Uuid) {
        self.script.lock().unwrap().fail_subscribe.insert(uuid);
    }

    pub fn fail_writes(&self) {
        self.script.lock().unwrap().fail_writes = true;
    }

    pub fn fail_reads(&self) {
        self.script.lock().unwrap().fail_reads = true;
    }

    pub fn set_read_value(&self, value: &[u8]) {
        self.script.lock().unwrap().read_value = value.to_vec();
    }

    /// Commands written so far, decoded.
    pub fn commands(&self) -> Vec<Command> {
        self.script
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter_map(|(_, bytes, _)| Command::decode(bytes))
            .collect()
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteType)> {
        self.script.lock().unwrap().writes.clone()
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        self.script.lock().unwrap().subscribed.clone()
    }

    pub fn reads(&self) -> Vec<Uuid> {
        self.script.lock().unwrap().reads.clone()
    }
}

impl Transport for ScriptedTransport {
    fn characteristics(&self) -> Vec<Uuid> {
        self.chars.clone()
    }

    async fn write(&self, characteristic: Uuid, bytes: &[u8], write_type: WriteType) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.writes.push((characteristic, bytes.to_vec(), write_type));
        if script.fail_writes {
            return Err(CamError::Write {
                uuid: characteristic,
                reason: "scripted failure".into(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.fail_subscribe.contains(&characteristic) {
            return Err(CamError::Subscribe {
                uuid: characteristic,
                reason: "scripted failure".into(),
            });
        }
        script.subscribed.push(characteristic);
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let mut script = self.script.lock().unwrap();
        script.reads.push(characteristic);
        if script.fail_reads {
            return Err(CamError::Read {
                uuid: characteristic,
                reason: "scripted failure".into(),
            });
        }
        Ok(script.read_value.clone())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let rx = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CamError::Connection("stream already taken".into()))?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (n, rx))
        })
        .boxed())
    }
}

// ── Sinks ────────────────────────────────────────────────────────────────────

/// Keeps every saved image in memory; clones share the same storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    images: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn images(&self) -> Vec<Vec<u8>> {
        self.images.lock().unwrap().clone()
    }
}

impl ImageSink for MemorySink {
    async fn save(&mut self, image: Vec<u8>) -> Result<PathBuf> {
        let mut images = self.images.lock().unwrap();
        images.push(image);
        Ok(PathBuf::from(format!("mem/{}", images.len())))
    }
}

/// Fails every save like a full disk would.
pub struct FailingSink;

impl ImageSink for FailingSink {
    async fn save(&mut self, _image: Vec<u8>) -> Result<PathBuf> {
        Err(CamError::FileWrite {
            path: PathBuf::from("output/full"),
            source: std::io::Error::other("no space left on device"),
        })
    }
}

// ── Event helpers ────────────────────────────────────────────────────────────

/// Receive events until one satisfies `done`; returns all of them, the
/// matching one last. Panics after five (possibly simulated) seconds.
pub async fn events_until(
    rx: &mut mpsc::Receiver<CamEvent>,
    mut done: impl FnMut(&CamEvent) -> bool,
) -> Vec<CamEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for an event; got {seen:?}"))
            .unwrap_or_else(|| panic!("event channel closed; got {seen:?}"));
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

/// Let every spawned task run until it blocks.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
