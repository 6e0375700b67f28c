//! The seam between the camera session and the BLE stack.
//!
//! [`Transport`] is the smallest surface the session needs from a connected,
//! discovered peripheral: write, subscribe, read, and one ordered stream of
//! notifications. [`BtleTransport`] implements it on top of `btleplug`;
//! [`crate::sim::SimulatedCamera`] implements it in memory.

use std::collections::BTreeSet;
use std::future::Future;

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::{BoxStream, StreamExt};
use uuid::Uuid;

use crate::error::{CamError, Result};

/// One value pushed by a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// Notifications from every subscribed characteristic, in arrival order.
pub type NotificationStream = BoxStream<'static, Notification>;

/// A connected peripheral whose characteristics have been discovered.
///
/// Futures are `Send` so sessions can run on the multi-threaded runtime.
pub trait Transport: Send + Sync + 'static {
    /// Identifiers of all characteristics discovered on the camera service.
    fn characteristics(&self) -> Vec<Uuid>;

    fn write(
        &self,
        characteristic: Uuid,
        bytes: &[u8],
        write_type: WriteType,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Enable notifications for `characteristic`.
    fn subscribe(&self, characteristic: Uuid) -> impl Future<Output = Result<()>> + Send;

    fn read(&self, characteristic: Uuid) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Open the notification stream. It ends when the link goes down.
    fn notifications(&self) -> impl Future<Output = Result<NotificationStream>> + Send;
}

// ── btleplug ─────────────────────────────────────────────────────────────────

/// [`Transport`] over a connected `btleplug` peripheral.
#[derive(Clone)]
pub struct BtleTransport {
    peripheral: Peripheral,
    chars: BTreeSet<Characteristic>,
}

impl BtleTransport {
    /// `chars` should already be narrowed to the camera service.
    pub fn new(peripheral: Peripheral, chars: BTreeSet<Characteristic>) -> Self {
        Self { peripheral, chars }
    }

    fn find(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.chars
            .iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| CamError::Discovery(format!("characteristic {uuid} not found")))
    }
}

impl Transport for BtleTransport {
    fn characteristics(&self) -> Vec<Uuid> {
        self.chars.iter().map(|c| c.uuid).collect()
    }

    async fn write(&self, characteristic: Uuid, bytes: &[u8], write_type: WriteType) -> Result<()> {
        let c = self.find(characteristic)?;
        self.peripheral
            .write(c, bytes, write_type)
            .await
            .map_err(|e| match write_type {
                WriteType::WithResponse => CamError::WriteConfirm {
                    uuid: characteristic,
                    reason: e.to_string(),
                },
                WriteType::WithoutResponse => CamError::Write {
                    uuid: characteristic,
                    reason: e.to_string(),
                },
            })
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let c = self.find(characteristic)?;
        self.peripheral
            .subscribe(c)
            .await
            .map_err(|e| CamError::Subscribe {
                uuid: characteristic,
                reason: e.to_string(),
            })
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let c = self.find(characteristic)?;
        self.peripheral.read(c).await.map_err(|e| CamError::Read {
            uuid: characteristic,
            reason: e.to_string(),
        })
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| CamError::Connection(format!("notification stream unavailable: {e}")))?;
        Ok(stream
            .map(|n| Notification {
                uuid: n.uuid,
                value: n.value,
            })
            .boxed())
    }
}
