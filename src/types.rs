use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Semantic purpose of one of the camera's GATT characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicRole {
    /// Host → device command channel ([`crate::protocol::Command`]).
    Command,
    /// Device → host image chunks.
    Data,
    /// Device → host image metadata ([`crate::parse::ImageInfo`]).
    ImageInfo,
    /// Device capture interval in minutes, read once.
    CaptureInterval,
}

impl CharacteristicRole {
    /// All roles in binding order.
    pub const ALL: [CharacteristicRole; 4] = [
        CharacteristicRole::Command,
        CharacteristicRole::Data,
        CharacteristicRole::ImageInfo,
        CharacteristicRole::CaptureInterval,
    ];
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CharacteristicRole::Command => "command",
            CharacteristicRole::Data => "data",
            CharacteristicRole::ImageInfo => "image info",
            CharacteristicRole::CaptureInterval => "capture interval",
        })
    }
}

/// An image that was reassembled and written by the image sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    /// Where the sink stored the bytes.
    pub path: PathBuf,
    /// Number of bytes written. Equal to the cumulative chunk length at the
    /// flushing chunk, which can exceed `expected_len`.
    pub len: usize,
    /// Length announced by the most recent ImageInfo notification (`0` if
    /// none arrived yet).
    pub expected_len: u32,
}

/// Average data rate over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputReport {
    /// Mean of the per-bucket byte counts, rounded to the nearest integer.
    pub bytes_per_sec: u64,
    /// Number of buckets the mean was taken over.
    pub samples: usize,
    /// Time between the first chunk of the window and the reporting chunk.
    pub window: Duration,
}

/// All events emitted by a running camera session.
///
/// Consumers receive these through the `mpsc::Receiver` returned by
/// [`crate::cam_client::CamClient::connect`] or
/// [`crate::session::spawn_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CamEvent {
    /// Characteristics are bound and the session task is running.
    /// Carries the advertised device name.
    Connected(String),
    /// Capture interval configured on the device, in minutes.
    CaptureInterval(u8),
    /// An ImageInfo notification announced the length of the next image.
    ImageLength(u32),
    /// A complete image was written to disk.
    ImageSaved(SavedImage),
    /// A one-second throughput bucket closed with this many bytes.
    BucketSample(u64),
    /// A throughput reporting window closed.
    Throughput(ThroughputReport),
    /// The session ended: link lost, stream closed, or shutdown requested.
    ///
    /// Always the last event of a session.
    Disconnected,
}
