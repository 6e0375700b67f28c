//! Error taxonomy shared by every layer of the receiver.
//!
//! Only [`CamError::FileWrite`] is fatal: losing image data ends the process.
//! Subscribe and write failures degrade the session but never end it, and
//! connection / discovery failures end the current connection attempt only.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the transport, the session and the image sink.
#[derive(Error, Debug)]
pub enum CamError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("subscribe to {uuid} failed: {reason}")]
    Subscribe { uuid: Uuid, reason: String },

    #[error("write to {uuid} failed: {reason}")]
    Write { uuid: Uuid, reason: String },

    /// A write-with-response whose acknowledgement never arrived or failed.
    #[error("write to {uuid} was not confirmed: {reason}")]
    WriteConfirm { uuid: Uuid, reason: String },

    /// A characteristic read failed. Handled like a subscribe failure.
    #[error("read from {uuid} failed: {reason}")]
    Read { uuid: Uuid, reason: String },

    #[error("failed to write image {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl CamError {
    /// `true` for errors that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CamError::FileWrite { .. })
    }

    /// `true` for errors that end a connection attempt and may be retried by
    /// the reconnect supervisor.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CamError::NoAdapter | CamError::Connection(_) | CamError::Discovery(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_write_is_the_only_fatal_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let fatal = CamError::FileWrite {
            path: PathBuf::from("output/1700000000000"),
            source: io,
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());

        let uuid = Uuid::nil();
        for err in [
            CamError::Connection("timeout".into()),
            CamError::Discovery("no service".into()),
            CamError::Subscribe { uuid, reason: "gatt".into() },
            CamError::Write { uuid, reason: "gatt".into() },
            CamError::Read { uuid, reason: "gatt".into() },
        ] {
            assert!(!err.is_fatal(), "{err} must not be fatal");
        }
    }

    #[test]
    fn characteristic_failures_do_not_end_the_attempt() {
        let uuid = Uuid::nil();
        for err in [
            CamError::Subscribe { uuid, reason: "gatt".into() },
            CamError::Write { uuid, reason: "gatt".into() },
            CamError::WriteConfirm { uuid, reason: "gatt".into() },
            CamError::Read { uuid, reason: "gatt".into() },
            CamError::Config("bad uuid".into()),
        ] {
            assert!(!err.is_retryable(), "{err} must not be retried");
        }
        assert!(CamError::NoAdapter.is_retryable());
    }

    #[test]
    fn display_names_the_characteristic() {
        let uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
        let err = CamError::Write { uuid, reason: "not connected".into() };
        assert_eq!(
            err.to_string(),
            "write to 6e400002-b5a3-f393-e0a9-e50e24dcca9e failed: not connected"
        );
    }
}
