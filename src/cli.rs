//! Command-line options shared by the `blecam` and `blecam-tui` binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::config::{CamClientConfig, GattUuids, ReconnectPolicy};
use crate::error::Result;
use crate::reassembly::LengthPolicy;
use crate::sim::SimConfig;

#[derive(Args, Debug, Clone)]
pub struct CamArgs {
    /// Directory receiving one file per image
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// JSON file with the service and characteristic UUIDs
    /// (keys: service, rx, tx, imgInfo, captureIntervalMinutes)
    #[arg(long, value_name = "FILE")]
    pub uuids: Option<PathBuf>,

    /// Also accept devices whose advertised name starts with this prefix
    #[arg(long, value_name = "PREFIX")]
    pub name: Option<String>,

    /// Connect to this device id (see --list) instead of the first match
    #[arg(long, value_name = "ID", conflicts_with = "simulate")]
    pub device: Option<String>,

    /// Scan for the full timeout, print every camera found and exit
    #[arg(long, conflicts_with = "simulate")]
    pub list: bool,

    /// Seconds to scan before giving up
    #[arg(long, default_value_t = 15, value_name = "SECS")]
    pub scan_timeout: u64,

    /// Keep buffering until the announced image length is reached
    #[arg(long)]
    pub await_length: bool,

    /// Refuse to run unless all four characteristics are found
    #[arg(long)]
    pub strict_roles: bool,

    /// Reconnect attempts after a failure (0 disables reconnecting)
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base reconnect delay in seconds; attempt n waits n times this
    #[arg(long, default_value_t = 2, value_name = "SECS")]
    pub retry_delay: u64,

    /// Run against a simulated camera instead of Bluetooth
    #[arg(long)]
    pub simulate: bool,

    /// Image size served by the simulated camera
    #[arg(long, default_value_t = 24_000, value_name = "BYTES", requires = "simulate")]
    pub sim_image_len: usize,
}

impl CamArgs {
    pub fn client_config(&self) -> Result<CamClientConfig> {
        let uuids = match &self.uuids {
            Some(path) => GattUuids::from_file(path)?,
            None => GattUuids::default(),
        };
        Ok(CamClientConfig {
            scan_timeout_secs: self.scan_timeout,
            name_prefix: self.name.clone(),
            device_id: self.device.clone(),
            uuids,
            output_dir: self.output.clone(),
            length_policy: if self.await_length {
                LengthPolicy::AwaitDeclaredLength
            } else {
                LengthPolicy::FlushOnReach
            },
            strict_roles: self.strict_roles,
            reconnect: ReconnectPolicy {
                max_retries: self.max_retries,
                retry_delay: Duration::from_secs(self.retry_delay),
                ..ReconnectPolicy::default()
            },
            ..CamClientConfig::default()
        })
    }

    /// `Some` when `--simulate` was given.
    pub fn sim_config(&self) -> Option<SimConfig> {
        self.simulate.then(|| SimConfig {
            image_len: self.sim_image_len,
            ..SimConfig::default()
        })
    }
}
