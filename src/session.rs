//! One connected camera: role binding, notification routing and lifetime.
//!
//! A [`DeviceSession`] owns everything that changes while the camera streams
//! (the image in progress, the throughput window, the capture timer) and runs
//! as a single task, so notifications are processed strictly in the order
//! the transport delivered them. The only other task a session starts is the
//! capture trigger, which writes and never touches session state.
//!
//! ```text
//! transport ──notifications──▶ DeviceSession ──▶ FrameReassembler ──▶ ImageSink
//!     ▲                              │        └─▶ ThroughputSampler
//!     └──── CommandSequencer ◀───────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{CamClientConfig, GattUuids};
use crate::error::{CamError, Result};
use crate::parse::{parse_capture_interval, parse_image_info, ImageInfo};
use crate::protocol::Command;
use crate::reassembly::{FrameReassembler, LengthPolicy};
use crate::sequencer::{CaptureTimer, CommandSequencer, CommandWriter};
use crate::sink::ImageSink;
use crate::throughput::ThroughputSampler;
use crate::transport::{Notification, Transport};
use crate::types::{CamEvent, CharacteristicRole, SavedImage};

/// Capacity of the event channel handed to the application.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── SessionConfig ────────────────────────────────────────────────────────────

/// The part of [`CamClientConfig`] a running session needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub uuids: GattUuids,
    pub capture_period: Duration,
    pub throughput_window: Duration,
    pub length_policy: LengthPolicy,
    pub strict_roles: bool,
}

impl From<&CamClientConfig> for SessionConfig {
    fn from(config: &CamClientConfig) -> Self {
        Self {
            uuids: config.uuids,
            capture_period: config.capture_period,
            throughput_window: config.throughput_window,
            length_policy: config.length_policy,
            strict_roles: config.strict_roles,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&CamClientConfig::default())
    }
}

// ── RoleBindings ─────────────────────────────────────────────────────────────

/// Discovered characteristics, one per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleBindings {
    pub command: Option<Uuid>,
    pub data: Option<Uuid>,
    pub image_info: Option<Uuid>,
    pub capture_interval: Option<Uuid>,
}

impl RoleBindings {
    /// Match discovered identifiers against the configured role identifiers.
    ///
    /// Unknown identifiers are ignored. If two characteristics match the same
    /// role the first one wins.
    pub fn bind(discovered: &[Uuid], uuids: &GattUuids) -> Self {
        let mut bindings = Self::default();
        for &uuid in discovered {
            let Some(role) = uuids.role_of(uuid) else {
                debug!("ignoring characteristic {uuid}");
                continue;
            };
            let slot = bindings.slot_mut(role);
            if slot.is_some() {
                warn!("{role} characteristic {uuid} discovered twice; keeping the first");
                continue;
            }
            info!("discovered characteristic {uuid} ({role})");
            *slot = Some(uuid);
        }
        bindings
    }

    pub fn get(&self, role: CharacteristicRole) -> Option<Uuid> {
        match role {
            CharacteristicRole::Command => self.command,
            CharacteristicRole::Data => self.data,
            CharacteristicRole::ImageInfo => self.image_info,
            CharacteristicRole::CaptureInterval => self.capture_interval,
        }
    }

    /// Role bound to `uuid`, if any.
    pub fn role_of(&self, uuid: Uuid) -> Option<CharacteristicRole> {
        CharacteristicRole::ALL
            .into_iter()
            .find(|&role| self.get(role) == Some(uuid))
    }

    /// Roles no discovered characteristic matched.
    pub fn missing(&self) -> Vec<CharacteristicRole> {
        CharacteristicRole::ALL
            .into_iter()
            .filter(|&role| self.get(role).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    fn slot_mut(&mut self, role: CharacteristicRole) -> &mut Option<Uuid> {
        match role {
            CharacteristicRole::Command => &mut self.command,
            CharacteristicRole::Data => &mut self.data,
            CharacteristicRole::ImageInfo => &mut self.image_info,
            CharacteristicRole::CaptureInterval => &mut self.capture_interval,
        }
    }
}

// ── DeviceSession ────────────────────────────────────────────────────────────

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Data-channel notifications processed.
    pub chunks: u64,
    pub bytes_received: u64,
    pub images_saved: usize,
}

pub struct DeviceSession<T, S> {
    transport: Arc<T>,
    sink: S,
    bindings: RoleBindings,
    sequencer: CommandSequencer,
    reassembler: FrameReassembler,
    sampler: ThroughputSampler,
    events: mpsc::Sender<CamEvent>,
    summary: SessionSummary,
}

impl<T: Transport, S: ImageSink> DeviceSession<T, S> {
    /// Bind the transport's characteristics to roles.
    ///
    /// Missing roles are logged and the session runs without them, unless
    /// `config.strict_roles` is set, in which case this fails with
    /// [`CamError::Discovery`].
    pub fn new(
        transport: Arc<T>,
        sink: S,
        config: &SessionConfig,
        events: mpsc::Sender<CamEvent>,
    ) -> Result<Self> {
        let bindings = RoleBindings::bind(&transport.characteristics(), &config.uuids);
        let missing = bindings.missing();
        if !missing.is_empty() {
            let names = missing
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            if config.strict_roles {
                return Err(CamError::Discovery(format!(
                    "missing characteristic(s): {names}"
                )));
            }
            warn!("missing characteristic(s): {names}; continuing in degraded mode");
        }

        Ok(Self {
            transport,
            sink,
            bindings,
            sequencer: CommandSequencer::new(config.capture_period),
            reassembler: FrameReassembler::new(config.length_policy),
            sampler: ThroughputSampler::new(config.throughput_window),
            events,
            summary: SessionSummary::default(),
        })
    }

    pub fn bindings(&self) -> RoleBindings {
        self.bindings
    }

    /// Run until the notification stream ends or `shutdown` resolves.
    ///
    /// Returns the session counters, or the [`CamError::FileWrite`] that
    /// ended it. [`CamEvent::Disconnected`] is always the last event sent.
    pub async fn run<F>(mut self, shutdown: F) -> Result<SessionSummary>
    where
        F: Future<Output = ()> + Send,
    {
        // Open the stream before subscribing so no early notification is lost.
        let mut notifications = match self.transport.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("could not get notification stream: {e}");
                let _ = self.events.send(CamEvent::Disconnected).await;
                return Err(e);
            }
        };
        let capture_timer = self.bind_roles().await;

        tokio::pin!(shutdown);
        let outcome = loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("session shutdown requested");
                    break Ok(());
                }
                next = notifications.next() => match next {
                    Some(notification) => {
                        if let Err(e) = self.dispatch(notification).await {
                            error!("{e}");
                            break Err(e);
                        }
                    }
                    None => {
                        info!("notification stream ended – device disconnected.");
                        break Ok(());
                    }
                },
            }
        };

        drop(capture_timer);
        info!(
            "session ended: {} image(s) saved, {} byte(s) in {} chunk(s)",
            self.summary.images_saved, self.summary.bytes_received, self.summary.chunks
        );
        let _ = self.events.send(CamEvent::Disconnected).await;
        outcome.map(|()| self.summary)
    }

    /// Set up every bound role. Notifications are enabled before the first
    /// capture is triggered.
    async fn bind_roles(&mut self) -> Option<CaptureTimer> {
        if let Some(uuid) = self.bindings.data {
            self.subscribe(CharacteristicRole::Data, uuid).await;
        }
        if let Some(uuid) = self.bindings.image_info {
            self.subscribe(CharacteristicRole::ImageInfo, uuid).await;
        }
        if let Some(uuid) = self.bindings.capture_interval {
            self.read_capture_interval(uuid).await;
        }
        self.bindings.command.map(|uuid| {
            self.sequencer
                .start(CommandWriter::new(Arc::clone(&self.transport), uuid))
        })
    }

    async fn subscribe(&self, role: CharacteristicRole, uuid: Uuid) {
        match self.transport.subscribe(uuid).await {
            Ok(()) => info!("{uuid}: notification enabled ({role})"),
            Err(e) => warn!("subscribe error: {e}; continuing without {role} notifications"),
        }
    }

    async fn read_capture_interval(&self, uuid: Uuid) {
        match self.transport.read(uuid).await {
            Ok(data) => match parse_capture_interval(&data) {
                Some(minutes) => {
                    info!("captureIntervalMinutes {minutes}");
                    self.emit(CamEvent::CaptureInterval(minutes));
                }
                None => warn!("{uuid}: capture interval read returned no data"),
            },
            Err(e) => warn!("{e}"),
        }
    }

    async fn dispatch(&mut self, notification: Notification) -> Result<()> {
        match self.bindings.role_of(notification.uuid) {
            Some(CharacteristicRole::Data) => self.on_data(&notification.value).await,
            Some(CharacteristicRole::ImageInfo) => {
                self.on_image_info(&notification.value);
                Ok(())
            }
            _ => {
                debug!(
                    "unhandled notification from {} ({} bytes)",
                    notification.uuid,
                    notification.value.len()
                );
                Ok(())
            }
        }
    }

    async fn on_data(&mut self, chunk: &[u8]) -> Result<()> {
        self.summary.chunks += 1;
        self.summary.bytes_received += chunk.len() as u64;
        let n = self.summary.chunks;
        if n <= 3 || n % 500 == 0 {
            debug!("data chunk #{n} len={}", chunk.len());
        }

        if let Some(image) = self.reassembler.on_chunk(chunk) {
            let len = image.len();
            let path = self.sink.save(image).await?;
            info!("save image to {} ({len} bytes)", path.display());
            self.summary.images_saved += 1;
            self.emit(CamEvent::ImageSaved(SavedImage {
                path,
                len,
                expected_len: self.reassembler.expected_length(),
            }));
        }

        let outcome = self.sampler.on_chunk(chunk.len(), Instant::now());
        if let Some(bytes) = outcome.closed_bucket {
            self.emit(CamEvent::BucketSample(bytes));
        }
        if let Some(report) = outcome.report {
            info!(
                "throughput {} bytes / second ({} samples)",
                report.bytes_per_sec, report.samples
            );
            self.emit(CamEvent::Throughput(report));
        }
        Ok(())
    }

    fn on_image_info(&mut self, data: &[u8]) {
        debug!("image info {data:02x?}");
        match parse_image_info(data) {
            ImageInfo::Length(len) => {
                info!("image size {len} bytes");
                self.reassembler.set_expected_length(len);
                self.emit(CamEvent::ImageLength(len));
            }
            ImageInfo::Unrecognized { .. } => warn!("unknown image info {data:02x?}"),
        }
    }

    /// Never blocks the data path: a full or closed channel drops the event.
    fn emit(&self, event: CamEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("event dropped: {e}");
        }
    }
}

// ── spawn_session / SessionHandle ────────────────────────────────────────────

/// Control surface of a session running in its own task.
pub struct SessionHandle<T> {
    transport: Arc<T>,
    command: Option<Uuid>,
    shutdown: Arc<Notify>,
    task: JoinHandle<Result<SessionSummary>>,
}

/// Bind roles, spawn the session task and return its event receiver.
///
/// The first event is always [`CamEvent::Connected`] carrying `device_name`.
pub fn spawn_session<T: Transport, S: ImageSink + Sync>(
    transport: Arc<T>,
    sink: S,
    config: &SessionConfig,
    device_name: &str,
) -> Result<(mpsc::Receiver<CamEvent>, SessionHandle<T>)> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let session = DeviceSession::new(Arc::clone(&transport), sink, config, tx.clone())?;
    let command = session.bindings().command;
    let _ = tx.try_send(CamEvent::Connected(device_name.to_owned()));

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    let task = tokio::spawn(session.run(async move { signal.notified().await }));

    Ok((
        rx,
        SessionHandle {
            transport,
            command,
            shutdown,
            task,
        },
    ))
}

impl<T: Transport> SessionHandle<T> {
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Write an arbitrary command to the command characteristic.
    pub async fn send(&self, command: Command) -> Result<()> {
        let uuid = self
            .command
            .ok_or_else(|| CamError::Discovery("command characteristic not bound".into()))?;
        CommandWriter::new(Arc::clone(&self.transport), uuid)
            .send(command)
            .await
    }

    pub async fn stop_streaming(&self) -> Result<()> {
        self.send(Command::StopStreaming).await
    }

    /// Ask the session to stop. Idempotent; safe before the task has started.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// The signal [`SessionHandle::shutdown`] fires, for disconnect watchers.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session task and return its result.
    pub async fn join(self) -> Result<SessionSummary> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(CamError::Connection(format!("session task cancelled: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        CAPTURE_INTERVAL_CHARACTERISTIC, COMMAND_CHARACTERISTIC, DATA_CHARACTERISTIC,
        IMAGE_INFO_CHARACTERISTIC,
    };

    #[test]
    fn binds_every_known_role_and_ignores_the_rest() {
        let other = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
        let discovered = [
            other,
            IMAGE_INFO_CHARACTERISTIC,
            COMMAND_CHARACTERISTIC,
            CAPTURE_INTERVAL_CHARACTERISTIC,
            DATA_CHARACTERISTIC,
        ];
        let bindings = RoleBindings::bind(&discovered, &GattUuids::default());
        assert!(bindings.is_complete());
        assert_eq!(bindings.command, Some(COMMAND_CHARACTERISTIC));
        assert_eq!(bindings.data, Some(DATA_CHARACTERISTIC));
        assert_eq!(bindings.role_of(other), None);
        assert_eq!(
            bindings.role_of(IMAGE_INFO_CHARACTERISTIC),
            Some(CharacteristicRole::ImageInfo)
        );
    }

    #[test]
    fn reports_missing_roles() {
        let bindings = RoleBindings::bind(&[DATA_CHARACTERISTIC], &GattUuids::default());
        assert!(!bindings.is_complete());
        assert_eq!(
            bindings.missing(),
            vec![
                CharacteristicRole::Command,
                CharacteristicRole::ImageInfo,
                CharacteristicRole::CaptureInterval,
            ]
        );
    }

    #[test]
    fn duplicate_match_keeps_the_first() {
        let bindings = RoleBindings::bind(
            &[DATA_CHARACTERISTIC, DATA_CHARACTERISTIC],
            &GattUuids::default(),
        );
        assert_eq!(bindings.data, Some(DATA_CHARACTERISTIC));
        assert_eq!(bindings.missing().len(), 3);
    }

    #[test]
    fn binding_follows_custom_uuids() {
        let uuids = GattUuids {
            data: Uuid::from_u128(0xfeed),
            ..GattUuids::default()
        };
        let bindings = RoleBindings::bind(&[DATA_CHARACTERISTIC, Uuid::from_u128(0xfeed)], &uuids);
        assert_eq!(bindings.data, Some(Uuid::from_u128(0xfeed)));
    }
}
