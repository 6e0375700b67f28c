//! Where completed images go.

use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;

use crate::error::{CamError, Result};

/// Persists one reassembled image and reports where it went.
///
/// A failure is fatal to the session.
pub trait ImageSink: Send + 'static {
    fn save(&mut self, image: Vec<u8>) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Milliseconds since the Unix epoch, `0` if the clock is before the epoch.
pub fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Writes each image to `<dir>/<epoch millis>`, raw bytes, no header.
///
/// Two images flushed within the same millisecond get `-1`, `-2`, … suffixes
/// rather than overwriting each other.
#[derive(Debug, Clone)]
pub struct FsImageSink {
    dir: PathBuf,
}

impl FsImageSink {
    /// Create the output directory if needed.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CamError::FileWrite {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    async fn write_new(&self, stem: &str, image: &[u8]) -> Result<PathBuf> {
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                stem.to_owned()
            } else {
                format!("{stem}-{suffix}")
            };
            let path = self.dir.join(name);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    suffix += 1;
                    continue;
                }
                Err(source) => return Err(CamError::FileWrite { path, source }),
            };
            let written = async {
                file.write_all(image).await?;
                file.flush().await
            }
            .await;
            return match written {
                Ok(()) => Ok(path),
                Err(source) => Err(CamError::FileWrite { path, source }),
            };
        }
    }
}

impl ImageSink for FsImageSink {
    async fn save(&mut self, image: Vec<u8>) -> Result<PathBuf> {
        let stem = epoch_millis().to_string();
        self.write_new(&stem, &image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_the_directory_and_names_files_by_epoch_millis() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("output");
        let mut sink = FsImageSink::create(&dir).await.unwrap();

        let before = epoch_millis();
        let path = sink.save(vec![0xFF, 0xD8, 0xFF, 0xD9]).await.unwrap();
        let after = epoch_millis();

        assert_eq!(path.parent(), Some(dir.as_path()));
        let stamp: u128 = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split('-').next())
            .and_then(|n| n.parse().ok())
            .expect("file name starts with a millisecond timestamp");
        assert!(before <= stamp && stamp <= after);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn never_overwrites_an_existing_image() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FsImageSink::create(tmp.path()).await.unwrap();

        let first = sink.write_new("1700000000000", b"first").await.unwrap();
        let second = sink.write_new("1700000000000", b"second").await.unwrap();
        let third = sink.write_new("1700000000000", b"third").await.unwrap();

        assert_eq!(first.file_name().unwrap(), "1700000000000");
        assert_eq!(second.file_name().unwrap(), "1700000000000-1");
        assert_eq!(third.file_name().unwrap(), "1700000000000-2");
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
    }

    #[tokio::test]
    async fn unwritable_directory_is_a_file_write_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = FsImageSink::create(blocker.join("output")).await.unwrap_err();
        assert!(err.is_fatal(), "{err}");
    }
}
