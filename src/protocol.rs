//! GATT UUIDs, timing constants and the command byte protocol of the camera.
//!
//! The default UUIDs live in a Nordic-UART-style vendor namespace
//! `6e40XXXX-b5a3-f393-e0a9-e50e24dcca9e`. Devices flashed with different
//! identifiers are supported through [`crate::config::GattUuids`].

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{CamError, Result};

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service advertised by the camera; used as the scan filter.
pub const CAM_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

// ── Characteristics ──────────────────────────────────────────────────────────

/// Command channel ("rx" from the device's point of view). Write without response.
pub const COMMAND_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Image data channel ("tx" from the device's point of view). Notify only.
///
/// Each notification is one chunk of the JPEG currently being transmitted;
/// chunk size is bounded by the negotiated ATT MTU.
pub const DATA_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Image metadata channel. Notified once per capture, before the data arrives
/// (in the normal case). See [`crate::parse::parse_image_info`].
pub const IMAGE_INFO_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e400004_b5a3_f393_e0a9_e50e24dcca9e);

/// Capture interval configured on the device, one byte in minutes. Read only.
pub const CAPTURE_INTERVAL_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e400005_b5a3_f393_e0a9_e50e24dcca9e);

/// Low 96 bits of the Bluetooth Base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`.
const BLUETOOTH_BASE_UUID_LOW: u128 = 0x0000_1000_8000_00805f9b34fb;

// ── Timing ───────────────────────────────────────────────────────────────────

/// Period of the recurring [`Command::StartSingleCapture`] trigger.
///
/// Fixed regardless of the device's own capture interval characteristic.
pub const CAPTURE_PERIOD: Duration = Duration::from_secs(60);

/// Length of one throughput bucket.
pub const THROUGHPUT_BUCKET: Duration = Duration::from_secs(1);

/// Length of the throughput reporting window.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

// ── ImageInfo framing ────────────────────────────────────────────────────────

/// ImageInfo tag announcing that a little-endian `u32` image length follows.
pub const IMAGE_INFO_LENGTH_TAG: u8 = 0x01;

// ── Commands ─────────────────────────────────────────────────────────────────

/// Radio PHY selector carried by [`Command::SetPhy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phy {
    /// LE 1M, the default after connection.
    OneMbps,
    /// LE 2M, roughly doubles the achievable image throughput.
    TwoMbps,
}

impl Phy {
    fn selector(self) -> u8 {
        match self {
            Phy::OneMbps => 0x00,
            Phy::TwoMbps => 0x01,
        }
    }
}

/// Commands understood by the camera's command characteristic.
///
/// | Command | Bytes |
/// |---|---|
/// | `StartSingleCapture` | `01` |
/// | `StartStreaming` | `02` |
/// | `StopStreaming` | `03` |
/// | `SetPhy(OneMbps)` | `05 00` |
/// | `SetPhy(TwoMbps)` | `05 01` |
/// | `GetBleParams` | `06` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    StartSingleCapture,
    StartStreaming,
    StopStreaming,
    SetPhy(Phy),
    GetBleParams,
}

impl Command {
    /// Bring-up sequence written once the command characteristic is bound.
    pub const STARTUP: [Command; 4] = [
        Command::SetPhy(Phy::TwoMbps),
        Command::StartStreaming,
        Command::GetBleParams,
        Command::StartSingleCapture,
    ];

    /// First byte on the wire.
    pub fn opcode(self) -> u8 {
        match self {
            Command::StartSingleCapture => 0x01,
            Command::StartStreaming => 0x02,
            Command::StopStreaming => 0x03,
            Command::SetPhy(_) => 0x05,
            Command::GetBleParams => 0x06,
        }
    }

    /// Encode the command for a write to the command characteristic.
    ///
    /// ```
    /// # use blecam_rs::protocol::{Command, Phy};
    /// assert_eq!(Command::SetPhy(Phy::TwoMbps).encode(), vec![0x05, 0x01]);
    /// assert_eq!(Command::StartSingleCapture.encode(), vec![0x01]);
    /// ```
    pub fn encode(self) -> Vec<u8> {
        match self {
            Command::SetPhy(phy) => vec![self.opcode(), phy.selector()],
            _ => vec![self.opcode()],
        }
    }

    /// Decode a command written to the command characteristic.
    ///
    /// Returns `None` for unknown opcodes, a `SetPhy` without its selector
    /// byte, or trailing bytes after a complete command.
    pub fn decode(bytes: &[u8]) -> Option<Command> {
        match bytes {
            [0x01] => Some(Command::StartSingleCapture),
            [0x02] => Some(Command::StartStreaming),
            [0x03] => Some(Command::StopStreaming),
            [0x05, 0x00] => Some(Command::SetPhy(Phy::OneMbps)),
            [0x05, 0x01] => Some(Command::SetPhy(Phy::TwoMbps)),
            [0x06] => Some(Command::GetBleParams),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::StartSingleCapture => f.write_str("REC"),
            Command::StartStreaming => f.write_str("start streaming"),
            Command::StopStreaming => f.write_str("stop streaming"),
            Command::SetPhy(Phy::OneMbps) => f.write_str("use 1Mbps PHY"),
            Command::SetPhy(Phy::TwoMbps) => f.write_str("use 2Mbps PHY"),
            Command::GetBleParams => f.write_str("get BLE params"),
        }
    }
}

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Parse a GATT identifier, ignoring case and separators.
///
/// Accepts the canonical hyphenated form, the bare 32-digit form used by
/// some BLE stacks, and 16/32-bit short forms which are expanded against the
/// Bluetooth Base UUID. `-`, `:`, `_`, braces and whitespace are separators.
///
/// ```
/// # use blecam_rs::protocol::{parse_uuid_loose, COMMAND_CHARACTERISTIC};
/// let a = parse_uuid_loose("6E400002-B5A3-F393-E0A9-E50E24DCCA9E").unwrap();
/// let b = parse_uuid_loose("6e400002b5a3f393e0a9e50e24dcca9e").unwrap();
/// assert_eq!(a, COMMAND_CHARACTERISTIC);
/// assert_eq!(a, b);
/// ```
pub fn parse_uuid_loose(s: &str) -> Result<Uuid> {
    let hex: String = s
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | '_' | '{' | '}') && !c.is_whitespace())
        .collect();

    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CamError::Config(format!("invalid GATT identifier {s:?}")));
    }

    match hex.len() {
        4 | 8 => {
            let short = u32::from_str_radix(&hex, 16)
                .map_err(|e| CamError::Config(format!("invalid GATT identifier {s:?}: {e}")))?;
            Ok(Uuid::from_u128(((short as u128) << 96) | BLUETOOTH_BASE_UUID_LOW))
        }
        32 => {
            let full = u128::from_str_radix(&hex, 16)
                .map_err(|e| CamError::Config(format!("invalid GATT identifier {s:?}: {e}")))?;
            Ok(Uuid::from_u128(full))
        }
        n => Err(CamError::Config(format!(
            "invalid GATT identifier {s:?}: {n} hex digits, expected 4, 8 or 32"
        ))),
    }
}
