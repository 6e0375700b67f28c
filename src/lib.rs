//! # blecam-rs
//!
//! Async Rust receiver for BLE streaming cameras: it connects to the camera,
//! drives its capture protocol, reassembles each streamed JPEG into a file
//! and measures the data rate of the link.
//!
//! ## What happens after connecting
//!
//! 1. The four characteristics of the camera service are bound to roles
//!    (command, data, image info, capture interval). Missing roles degrade
//!    the session unless `strict_roles` is set.
//! 2. Data and image-info notifications are enabled and the capture interval
//!    is read once.
//! 3. The command sequence `2M PHY → start streaming → get BLE params →
//!    capture` is written, then one capture is triggered every 60 s.
//! 4. Each image is reassembled from data chunks, using the length announced
//!    on the image-info channel, and saved as `<output>/<epoch millis>`.
//! 5. Data rate is sampled in one-second buckets and reported once a minute.
//!
//! ## Quick start
//!
//! ```no_run
//! use blecam_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CamClient::new(CamClientConfig::default());
//!     let (mut rx, handle) = client.connect().await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             CamEvent::ImageSaved(img) => println!("{} bytes → {}", img.len, img.path.display()),
//!             CamEvent::Throughput(t) => println!("{} B/s", t.bytes_per_sec),
//!             CamEvent::Disconnected => break,
//!             _ => {}
//!         }
//!     }
//!     handle.join().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`cam_client`] | BLE scanning, connecting, [`cam_client::CamHandle`] and [`cam_client::CamLink`] |
//! | [`session`] | Role binding and the single-task notification loop |
//! | [`sequencer`] | Startup command sequence and the recurring capture trigger |
//! | [`reassembly`] | Chunk-to-image frame reassembly |
//! | [`throughput`] | Bucketed data-rate sampling |
//! | [`sink`] | Image persistence |
//! | [`transport`] | The [`transport::Transport`] seam and its `btleplug` implementation |
//! | [`sim`] | An in-memory camera implementing [`transport::Transport`] |
//! | [`supervisor`] | Reconnect policy and the per-attempt event loop |
//! | [`config`] | UUID file loading and runtime configuration |
//! | [`protocol`] | GATT UUIDs, timing constants and command encoding |
//! | [`parse`] | ImageInfo and capture interval decoders |
//! | [`types`] | Event and data types |
//! | [`error`] | [`error::CamError`] |
//! | [`cli`] | Command-line options shared by the binaries |

pub mod cam_client;
pub mod cli;
pub mod config;
pub mod error;
pub mod parse;
pub mod protocol;
pub mod reassembly;
pub mod sequencer;
pub mod session;
pub mod sim;
pub mod sink;
pub mod supervisor;
pub mod throughput;
pub mod transport;
pub mod types;

// ── Prelude ──────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::cam_client::{open_link, CamClient, CamDevice, CamHandle, CamLink};
    pub use crate::config::{CamClientConfig, GattUuids, ReconnectPolicy};
    pub use crate::error::{CamError, Result};
    pub use crate::protocol::{Command, Phy};
    pub use crate::reassembly::LengthPolicy;
    pub use crate::session::{spawn_session, SessionConfig, SessionHandle, SessionSummary};
    pub use crate::sim::{SimConfig, SimulatedCamera};
    pub use crate::supervisor::{drive_link, supervise, AttemptOutcome};
    pub use crate::types::{CamEvent, CharacteristicRole, SavedImage, ThroughputReport};
}
