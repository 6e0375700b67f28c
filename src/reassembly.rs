//! Turns the unbounded stream of data-channel chunks into complete images.
//!
//! The camera announces each image's byte length on the ImageInfo
//! characteristic, then streams the JPEG in MTU-sized notifications. The
//! reassembler appends every chunk to the current buffer and hands the buffer
//! back once its length reaches the announced length.
//!
//! Two details are easy to get wrong:
//!
//! * The announced length is sticky. A flush empties the buffer but keeps
//!   the length, so a camera that announces once and then sends several
//!   equally-sized images still gets them split correctly.
//! * With no length announced yet, the expected length is `0`. Under
//!   [`LengthPolicy::FlushOnReach`] every non-empty chunk then completes an
//!   "image" on its own. That is what the receiver has always done when data
//!   overtakes metadata; [`LengthPolicy::AwaitDeclaredLength`] accumulates
//!   instead.

use log::{debug, warn};

/// What to do with chunks while the expected length is still `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LengthPolicy {
    /// Flush whenever `buffered >= expected`, including `expected == 0`.
    #[default]
    FlushOnReach,
    /// Treat `expected == 0` as unknown: keep accumulating until a nonzero
    /// length is announced, then flush as soon as it is reached.
    AwaitDeclaredLength,
}

/// In-progress image buffer plus the most recently announced length.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    policy: LengthPolicy,
    expected_len: u32,
    buffer: Vec<u8>,
}

impl FrameReassembler {
    pub fn new(policy: LengthPolicy) -> Self {
        Self {
            policy,
            expected_len: 0,
            buffer: Vec::new(),
        }
    }

    pub fn policy(&self) -> LengthPolicy {
        self.policy
    }

    /// Length announced by the last ImageInfo notification, `0` if none.
    pub fn expected_length(&self) -> u32 {
        self.expected_len
    }

    /// Bytes accumulated for the image in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Replace the expected length. Never flushes and never clears the buffer;
    /// the next chunk is checked against the new value.
    pub fn set_expected_length(&mut self, len: u32) {
        if !self.buffer.is_empty() {
            debug!(
                "image length changed {} → {len} with {} byte(s) buffered",
                self.expected_len,
                self.buffer.len()
            );
        }
        self.expected_len = len;
    }

    /// Append one chunk. Returns the complete image when this chunk reaches
    /// the expected length.
    ///
    /// The returned buffer is not clamped: if the crossing chunk overshoots,
    /// the image is longer than announced.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        if !self.is_complete() {
            return None;
        }
        let image = std::mem::take(&mut self.buffer);
        if self.expected_len > 0 && image.len() > self.expected_len as usize {
            warn!(
                "image overshoots announced length: {} > {} bytes",
                image.len(),
                self.expected_len
            );
        }
        Some(image)
    }

    fn is_complete(&self) -> bool {
        // An empty buffer is never an image, even against a zero length.
        if self.buffer.is_empty() {
            return false;
        }
        let reached = self.buffer.len() >= self.expected_len as usize;
        match self.policy {
            LengthPolicy::FlushOnReach => reached,
            LengthPolicy::AwaitDeclaredLength => self.expected_len > 0 && reached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announced(len: u32) -> FrameReassembler {
        let mut r = FrameReassembler::new(LengthPolicy::FlushOnReach);
        r.set_expected_length(len);
        r
    }

    #[test]
    fn flushes_exactly_once_at_the_crossing_chunk() {
        let mut r = announced(10);
        assert_eq!(r.on_chunk(&[1; 4]), None);
        assert_eq!(r.on_chunk(&[2; 4]), None);
        let image = r.on_chunk(&[3; 2]).expect("third chunk completes the image");
        assert_eq!(image.len(), 10);
        assert_eq!(&image[..4], &[1; 4]);
        assert_eq!(&image[8..], &[3; 2]);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn overshoot_is_not_clamped() {
        let mut r = announced(10);
        assert_eq!(r.on_chunk(&[0; 6]), None);
        let image = r.on_chunk(&[0; 6]).unwrap();
        assert_eq!(image.len(), 12);
    }

    #[test]
    fn length_survives_a_flush() {
        let mut r = announced(3);
        assert!(r.on_chunk(&[1, 2, 3]).is_some());
        assert_eq!(r.expected_length(), 3);
        assert_eq!(r.on_chunk(&[4, 5]), None);
        assert_eq!(r.buffered(), 2);
        assert_eq!(r.on_chunk(&[6]), Some(vec![4, 5, 6]));
    }

    #[test]
    fn new_length_applies_to_the_buffer_in_progress() {
        let mut r = announced(100);
        assert_eq!(r.on_chunk(&[0; 8]), None);
        r.set_expected_length(4);
        assert_eq!(r.buffered(), 8, "changing the length never flushes by itself");
        assert_eq!(r.on_chunk(&[0; 1]).map(|i| i.len()), Some(9));
    }

    #[test]
    fn unknown_length_flushes_every_chunk_by_default() {
        let mut r = FrameReassembler::default();
        assert_eq!(r.policy(), LengthPolicy::FlushOnReach);
        assert_eq!(r.on_chunk(&[7, 7]), Some(vec![7, 7]));
        assert_eq!(r.on_chunk(&[8]), Some(vec![8]));
    }

    #[test]
    fn unknown_length_accumulates_when_awaiting_declared_length() {
        let mut r = FrameReassembler::new(LengthPolicy::AwaitDeclaredLength);
        assert_eq!(r.on_chunk(&[1; 5]), None);
        assert_eq!(r.on_chunk(&[2; 5]), None);
        assert_eq!(r.buffered(), 10);

        r.set_expected_length(12);
        assert_eq!(r.on_chunk(&[3; 1]), None);
        assert_eq!(r.on_chunk(&[4; 1]).map(|i| i.len()), Some(12));
    }

    #[test]
    fn empty_chunks_never_flush() {
        for policy in [LengthPolicy::FlushOnReach, LengthPolicy::AwaitDeclaredLength] {
            let mut r = FrameReassembler::new(policy);
            assert_eq!(r.on_chunk(&[]), None, "{policy:?}");
            assert_eq!(r.buffered(), 0);
        }
    }
}
