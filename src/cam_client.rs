//! BLE discovery and connection for the camera.
//!
//! [`CamClient`] finds the camera by its advertised service (or name prefix),
//! connects, discovers the camera service and hands the peripheral to a
//! [`crate::session`] running in its own task. [`CamHandle`] controls the
//! result. [`open_link`] gives the binaries a single entry point over real
//! and simulated hardware.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::CamClientConfig;
use crate::error::{CamError, Result};
use crate::protocol::Command;
use crate::session::{spawn_session, SessionConfig, SessionHandle, SessionSummary};
use crate::sim::{SimConfig, SimulatedCamera};
use crate::sink::FsImageSink;
use crate::transport::BtleTransport;
use crate::types::CamEvent;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const SCAN_POLL: Duration = Duration::from_millis(250);

// ── CamDevice ────────────────────────────────────────────────────────────────

/// A camera discovered during a BLE scan.
///
/// Returned by [`CamClient::scan_all`]; pass to [`CamClient::connect_to`].
#[derive(Clone, Debug)]
pub struct CamDevice {
    /// Advertised name, `"Unknown"` if the device has none.
    pub name: String,
    /// Platform BLE identifier.
    /// • macOS / Windows: a UUID string
    /// • Linux: a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    pub id: String,
    pub(crate) peripheral: Peripheral,
    pub(crate) adapter: Adapter,
}

// ── adapter ──────────────────────────────────────────────────────────────────

/// The first Bluetooth adapter, ready to scan.
async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|e| CamError::Connection(format!("BLE manager unavailable: {e}")))?;
    let adapter = manager
        .adapters()
        .await
        .map_err(|e| CamError::Connection(format!("cannot list adapters: {e}")))?
        .into_iter()
        .next()
        .ok_or(CamError::NoAdapter)?;

    // CoreBluetooth ignores scan requests until the manager reports PoweredOn.
    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => {
                    info!("macOS: adapter is PoweredOn");
                    break;
                }
                Ok(state) if tokio::time::Instant::now() >= deadline => {
                    warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                    break;
                }
                Ok(state) => debug!("macOS: adapter state = {state:?}, waiting…"),
                Err(e) => {
                    warn!("macOS: adapter_state() error: {e}");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    Ok(adapter)
}

// ── CamClient ────────────────────────────────────────────────────────────────

pub struct CamClient {
    config: CamClientConfig,
}

impl CamClient {
    pub fn new(config: CamClientConfig) -> Self {
        Self { config }
    }

    fn scan_filter(&self) -> ScanFilter {
        // A name-prefix match has to see devices that do not advertise the service.
        if self.config.name_prefix.is_some() {
            ScanFilter::default()
        } else {
            ScanFilter {
                services: vec![self.config.uuids.service],
            }
        }
    }

    /// Name of `peripheral` if it looks like our camera.
    async fn matches(&self, peripheral: &Peripheral) -> Option<String> {
        let props = peripheral.properties().await.ok().flatten()?;
        let by_service = props.services.contains(&self.config.uuids.service);
        let by_name = match (&self.config.name_prefix, &props.local_name) {
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            _ => false,
        };
        (by_service || by_name).then(|| props.local_name.unwrap_or_else(|| "Unknown".into()))
    }

    /// Scan for the full timeout and return every camera seen.
    pub async fn scan_all(&self) -> Result<Vec<CamDevice>> {
        let adapter = default_adapter().await?;
        info!("scan_all: scanning for {} s …", self.config.scan_timeout_secs);
        adapter
            .start_scan(self.scan_filter())
            .await
            .map_err(|e| CamError::Connection(format!("start_scan failed: {e}")))?;
        tokio::time::sleep(Duration::from_secs(self.config.scan_timeout_secs)).await;
        adapter.stop_scan().await.ok();

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| CamError::Connection(e.to_string()))?;
        let mut found = vec![];
        for p in peripherals {
            if let Some(name) = self.matches(&p).await {
                let id = p.id().to_string();
                info!("scan_all: found {name}  id={id}");
                found.push(CamDevice {
                    name,
                    id,
                    peripheral: p,
                    adapter: adapter.clone(),
                });
            }
        }
        info!("scan_all: {} device(s) found", found.len());
        Ok(found)
    }

    /// Connect to a device returned by [`CamClient::scan_all`].
    pub async fn connect_to(
        &self,
        device: CamDevice,
    ) -> Result<(mpsc::Receiver<CamEvent>, CamHandle)> {
        self.setup_peripheral(device.peripheral, device.name, device.adapter)
            .await
    }

    /// Scan until the first camera appears, then connect to it.
    ///
    /// With `device_id` set, scan for the full timeout and connect to that
    /// device only.
    pub async fn connect(&self) -> Result<(mpsc::Receiver<CamEvent>, CamHandle)> {
        if let Some(wanted) = &self.config.device_id {
            let devices = self.scan_all().await?;
            let device = pick_device(devices, wanted).ok_or_else(|| {
                CamError::Connection(format!("device {wanted} not found during scan"))
            })?;
            info!("Found device: {} ({})", device.name, device.id);
            return self.connect_to(device).await;
        }

        let adapter = default_adapter().await?;
        info!(
            "Scanning for the camera (timeout: {} s) …",
            self.config.scan_timeout_secs
        );
        adapter
            .start_scan(self.scan_filter())
            .await
            .map_err(|e| CamError::Connection(format!("start_scan failed: {e}")))?;
        let found = self.find_first(&adapter).await;
        // Some stacks refuse to connect while scanning.
        adapter.stop_scan().await.ok();
        let (peripheral, name) = found?;
        info!("Found device: {name}");
        self.setup_peripheral(peripheral, name, adapter).await
    }

    async fn find_first(&self, adapter: &Adapter) -> Result<(Peripheral, String)> {
        let timeout_secs = self.config.scan_timeout_secs;
        tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            loop {
                for p in adapter.peripherals().await.unwrap_or_default() {
                    if let Some(name) = self.matches(&p).await {
                        return (p, name);
                    }
                }
                tokio::time::sleep(SCAN_POLL).await;
            }
        })
        .await
        .map_err(|_| {
            CamError::Connection(format!(
                "timed out scanning for the camera after {timeout_secs} s"
            ))
        })
    }

    async fn setup_peripheral(
        &self,
        peripheral: Peripheral,
        device_name: String,
        adapter: Adapter,
    ) -> Result<(mpsc::Receiver<CamEvent>, CamHandle)> {
        // BlueZ's Device1.Connect can block forever on a stale device.
        tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| {
                CamError::Connection(format!(
                    "connect() timed out after {} s",
                    CONNECT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| CamError::Connection(e.to_string()))?;

        match self.bind_session(&peripheral, &device_name).await {
            Ok((rx, session)) => {
                let watcher = spawn_disconnect_watcher(adapter, &peripheral, &session);
                Ok((
                    rx,
                    CamHandle {
                        session,
                        peripheral,
                        watcher,
                    },
                ))
            }
            Err(e) => {
                peripheral.disconnect().await.ok();
                Err(e)
            }
        }
    }

    async fn bind_session(
        &self,
        peripheral: &Peripheral,
        device_name: &str,
    ) -> Result<(mpsc::Receiver<CamEvent>, SessionHandle<BtleTransport>)> {
        // BlueZ reports the connection before its GATT cache is populated.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| {
                CamError::Discovery(format!(
                    "discover_services() timed out after {} s",
                    DISCOVERY_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| CamError::Discovery(e.to_string()))?;

        let service = self.config.uuids.service;
        if !peripheral.services().iter().any(|s| s.uuid == service) {
            return Err(CamError::Discovery(format!("service {service} not found")));
        }
        let chars: BTreeSet<Characteristic> = peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.service_uuid == service)
            .collect();
        info!(
            "Connected and services discovered: {device_name} ({} characteristic(s))",
            chars.len()
        );

        let sink = FsImageSink::create(&self.config.output_dir).await?;
        let transport = Arc::new(BtleTransport::new(peripheral.clone(), chars));
        spawn_session(transport, sink, &SessionConfig::from(&self.config), device_name)
    }
}

/// The scanned device whose platform id is `wanted`, ignoring case.
fn pick_device(devices: Vec<CamDevice>, wanted: &str) -> Option<CamDevice> {
    devices.into_iter().find(|d| same_device_id(&d.id, wanted))
}

/// Platform ids compare case-insensitively: BlueZ prints MAC addresses in
/// upper case, users often type them in lower case.
pub fn same_device_id(id: &str, wanted: &str) -> bool {
    id.trim().eq_ignore_ascii_case(wanted.trim())
}

/// Stop the session as soon as the adapter reports the link down, which is
/// usually faster than waiting for the notification stream to close.
fn spawn_disconnect_watcher(
    adapter: Adapter,
    peripheral: &Peripheral,
    session: &SessionHandle<BtleTransport>,
) -> JoinHandle<()> {
    let id = peripheral.id();
    let signal = session.shutdown_signal();
    tokio::spawn(async move {
        match adapter.events().await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(gone) = event {
                        if gone == id {
                            info!("Disconnect watcher: device {gone:?} disconnected.");
                            signal.notify_one();
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("Disconnect watcher: could not subscribe to adapter events: {e}"),
        }
    })
}

// ── CamHandle ────────────────────────────────────────────────────────────────

/// A live camera connection.
pub struct CamHandle {
    session: SessionHandle<BtleTransport>,
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

impl CamHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.session.send(command).await
    }

    pub async fn stop_streaming(&self) -> Result<()> {
        self.session.stop_streaming().await
    }

    /// Stop the session and drop the link.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.shutdown();
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| CamError::Connection(format!("disconnect failed: {e}")))
    }

    /// Wait for the session to end.
    pub async fn join(self) -> Result<SessionSummary> {
        let summary = self.session.join().await;
        self.watcher.abort();
        summary
    }
}

// ── CamLink ──────────────────────────────────────────────────────────────────

/// A connection the binaries can drive without caring whether a real camera
/// is on the other end.
pub enum CamLink {
    Ble(CamHandle),
    Simulated(SessionHandle<SimulatedCamera>),
}

impl CamLink {
    pub async fn send(&self, command: Command) -> Result<()> {
        match self {
            CamLink::Ble(handle) => handle.send(command).await,
            CamLink::Simulated(session) => session.send(command).await,
        }
    }

    pub async fn stop_streaming(&self) -> Result<()> {
        self.send(Command::StopStreaming).await
    }

    /// End the session and release the link.
    pub async fn close(&self) -> Result<()> {
        match self {
            CamLink::Ble(handle) => handle.disconnect().await,
            CamLink::Simulated(session) => {
                session.shutdown();
                session.transport().disconnect();
                Ok(())
            }
        }
    }

    pub async fn join(self) -> Result<SessionSummary> {
        match self {
            CamLink::Ble(handle) => handle.join().await,
            CamLink::Simulated(session) => session.join().await,
        }
    }
}

/// Connect to the camera, or start a simulated one when `simulate` is given.
pub async fn open_link(
    config: &CamClientConfig,
    simulate: Option<&SimConfig>,
) -> Result<(mpsc::Receiver<CamEvent>, CamLink)> {
    match simulate {
        Some(sim) => {
            info!("starting simulated camera {}", sim.name);
            let sink = FsImageSink::create(&config.output_dir).await?;
            let camera = Arc::new(SimulatedCamera::new(config.uuids, sim.clone()));
            let (rx, session) =
                spawn_session(camera, sink, &SessionConfig::from(config), &sim.name)?;
            Ok((rx, CamLink::Simulated(session)))
        }
        None => {
            let (rx, handle) = CamClient::new(config.clone()).connect().await?;
            Ok((rx, CamLink::Ble(handle)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_match_regardless_of_case() {
        assert!(same_device_id("AA:BB:CC:DD:EE:FF", "aa:bb:cc:dd:ee:ff"));
        assert!(same_device_id(
            "5c0f3b2e-1d4a-4c8e-9a57-0e7b2f6d1a90",
            " 5C0F3B2E-1D4A-4C8E-9A57-0E7B2F6D1A90 "
        ));
        assert!(!same_device_id("AA:BB:CC:DD:EE:FF", "AA:BB:CC:DD:EE:00"));
    }
}
