//! Runtime configuration: GATT identifiers, output location, timing and
//! recovery policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{CamError, Result};
use crate::protocol::{
    parse_uuid_loose, CAM_SERVICE_UUID, CAPTURE_INTERVAL_CHARACTERISTIC, CAPTURE_PERIOD,
    COMMAND_CHARACTERISTIC, DATA_CHARACTERISTIC, IMAGE_INFO_CHARACTERISTIC, THROUGHPUT_WINDOW,
};
use crate::reassembly::LengthPolicy;
use crate::types::CharacteristicRole;

// ── GattUuids ────────────────────────────────────────────────────────────────

/// Service and characteristic identifiers of the camera.
///
/// Loadable from a JSON file with the keys used by the camera firmware
/// project:
///
/// ```json
/// {
///   "service": "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
///   "rx": "6e400002-b5a3-f393-e0a9-e50e24dcca9e",
///   "tx": "6e400003-b5a3-f393-e0a9-e50e24dcca9e",
///   "imgInfo": "6e400004-b5a3-f393-e0a9-e50e24dcca9e",
///   "captureIntervalMinutes": "6e400005-b5a3-f393-e0a9-e50e24dcca9e"
/// }
/// ```
///
/// `rx` and `tx` are named from the device's side: the host writes commands
/// to `rx` and receives image data from `tx`. Values are parsed with
/// [`parse_uuid_loose`], so case and separators do not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattUuids {
    pub service: Uuid,
    pub command: Uuid,
    pub data: Uuid,
    pub image_info: Uuid,
    pub capture_interval: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UuidFile {
    service: String,
    rx: String,
    tx: String,
    img_info: String,
    capture_interval_minutes: String,
}

impl Default for GattUuids {
    fn default() -> Self {
        Self {
            service: CAM_SERVICE_UUID,
            command: COMMAND_CHARACTERISTIC,
            data: DATA_CHARACTERISTIC,
            image_info: IMAGE_INFO_CHARACTERISTIC,
            capture_interval: CAPTURE_INTERVAL_CHARACTERISTIC,
        }
    }
}

impl GattUuids {
    /// Parse the JSON document described above.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: UuidFile = serde_json::from_str(json)
            .map_err(|e| CamError::Config(format!("invalid UUID file: {e}")))?;
        Ok(Self {
            service: parse_uuid_loose(&file.service)?,
            command: parse_uuid_loose(&file.rx)?,
            data: parse_uuid_loose(&file.tx)?,
            image_info: parse_uuid_loose(&file.img_info)?,
            capture_interval: parse_uuid_loose(&file.capture_interval_minutes)?,
        })
    }

    /// Read and parse a UUID file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CamError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Identifier bound to `role`.
    pub fn uuid_for(&self, role: CharacteristicRole) -> Uuid {
        match role {
            CharacteristicRole::Command => self.command,
            CharacteristicRole::Data => self.data,
            CharacteristicRole::ImageInfo => self.image_info,
            CharacteristicRole::CaptureInterval => self.capture_interval,
        }
    }

    /// Role of a discovered characteristic, if it is one of ours.
    pub fn role_of(&self, uuid: Uuid) -> Option<CharacteristicRole> {
        CharacteristicRole::ALL
            .into_iter()
            .find(|&role| self.uuid_for(role) == uuid)
    }
}

// ── ReconnectPolicy ──────────────────────────────────────────────────────────

/// How the supervisor reacts to a failed connection attempt or a lost link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive attempts allowed after a failure. `0` disables reconnecting.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n × retry_delay`.
    pub retry_delay: Duration,
    /// A lost link resets the failure count only if the session saved an
    /// image or stayed up at least this long. Default: 30 s.
    pub stable_after: Duration,
}

impl ReconnectPolicy {
    /// No reconnects at all: one attempt, then give up.
    pub const NEVER: ReconnectPolicy = ReconnectPolicy {
        max_retries: 0,
        retry_delay: Duration::ZERO,
        stable_after: Duration::ZERO,
    };

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            stable_after: Duration::from_secs(30),
        }
    }
}

// ── CamClientConfig ──────────────────────────────────────────────────────────

/// Configuration for [`crate::cam_client::CamClient`] and the session it runs.
#[derive(Debug, Clone)]
pub struct CamClientConfig {
    /// BLE scan duration in seconds before giving up. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Also accept devices whose advertised name starts with this string,
    /// for stacks that do not report advertised services. Default: `None`.
    pub name_prefix: Option<String>,
    /// Connect only to the device with this platform id, as printed by
    /// [`crate::cam_client::CamClient::scan_all`]. Default: `None`.
    pub device_id: Option<String>,
    /// GATT identifiers of the camera.
    pub uuids: GattUuids,
    /// Directory receiving one file per image. Created if missing.
    /// Default: `output`.
    pub output_dir: PathBuf,
    /// Period of the recurring capture trigger. Default: 60 s.
    pub capture_period: Duration,
    /// Throughput reporting window. Default: 60 s.
    pub throughput_window: Duration,
    /// Flush rule while no image length has been announced.
    pub length_policy: LengthPolicy,
    /// Refuse to start a session unless all four roles are bound.
    /// Default: `false` (run degraded and warn).
    pub strict_roles: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for CamClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 15,
            name_prefix: None,
            device_id: None,
            uuids: GattUuids::default(),
            output_dir: PathBuf::from("output"),
            capture_period: CAPTURE_PERIOD,
            throughput_window: THROUGHPUT_WINDOW,
            length_policy: LengthPolicy::default(),
            strict_roles: false,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_file_uses_device_side_names() {
        let json = r#"{
            "service": "0000fe00-0000-1000-8000-00805f9b34fb",
            "rx": "0000FE01-0000-1000-8000-00805F9B34FB",
            "tx": "0000fe020000100080000080 5f9b34fb",
            "imgInfo": "fe03",
            "captureIntervalMinutes": "0000fe04"
        }"#;
        let uuids = GattUuids::from_json_str(json).unwrap();
        let short = |n: u32| {
            Uuid::from_u128(((n as u128) << 96) | 0x0000_1000_8000_00805f9b34fb)
        };
        assert_eq!(uuids.service, short(0xfe00));
        assert_eq!(uuids.command, short(0xfe01));
        assert_eq!(uuids.data, short(0xfe02));
        assert_eq!(uuids.image_info, short(0xfe03));
        assert_eq!(uuids.capture_interval, short(0xfe04));
    }

    #[test]
    fn readme_uuid_file_lists_the_defaults() {
        let readme = include_str!("../README.md");
        let json = readme
            .split("```json")
            .nth(1)
            .and_then(|rest| rest.split("```").next())
            .expect("README has a json block");
        assert_eq!(GattUuids::from_json_str(json).unwrap(), GattUuids::default());
    }

    #[test]
    fn uuid_file_missing_key_is_a_config_error() {
        let err = GattUuids::from_json_str(r#"{ "service": "fe00" }"#).unwrap_err();
        assert!(matches!(err, CamError::Config(_)), "{err}");
    }

    #[test]
    fn role_lookup() {
        let uuids = GattUuids::default();
        assert_eq!(uuids.role_of(DATA_CHARACTERISTIC), Some(CharacteristicRole::Data));
        assert_eq!(
            uuids.role_of(IMAGE_INFO_CHARACTERISTIC),
            Some(CharacteristicRole::ImageInfo)
        );
        assert_eq!(uuids.role_of(uuids.service), None);
        for role in CharacteristicRole::ALL {
            assert_eq!(uuids.role_of(uuids.uuid_for(role)), Some(role));
        }
    }

    #[test]
    fn reconnect_delay_grows_linearly() {
        let policy = ReconnectPolicy {
            max_retries: 5,
            retry_delay: Duration::from_millis(500),
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
        assert_eq!(ReconnectPolicy::NEVER.delay_for(4), Duration::ZERO);
    }
}
