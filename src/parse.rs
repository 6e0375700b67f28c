//! Decoders for the camera's metadata characteristics.
//!
//! Pure functions, no I/O. Image data itself is opaque and needs no decoding;
//! see [`crate::reassembly`].

use crate::protocol::IMAGE_INFO_LENGTH_TAG;

/// A decoded ImageInfo notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageInfo {
    /// Tag `0x01`: byte length of the image about to be transmitted.
    Length(u32),
    /// Anything else. `tag` is `None` for an empty payload.
    ///
    /// Also produced for a length tag whose payload is shorter than the four
    /// length bytes it announces.
    Unrecognized { tag: Option<u8> },
}

/// Decode an ImageInfo notification.
///
/// Wire layout:
/// ```text
/// byte 0     : tag (0x01 = length follows)
/// bytes 1..5 : image length, u32 little-endian
/// ```
/// Bytes after the length are ignored.
///
/// ```
/// # use blecam_rs::parse::{parse_image_info, ImageInfo};
/// assert_eq!(parse_image_info(&[0x01, 0x0A, 0x00, 0x00, 0x00]), ImageInfo::Length(10));
/// assert_eq!(parse_image_info(&[0x02, 0x0A]), ImageInfo::Unrecognized { tag: Some(2) });
/// ```
pub fn parse_image_info(data: &[u8]) -> ImageInfo {
    match data {
        [IMAGE_INFO_LENGTH_TAG, b0, b1, b2, b3, ..] => {
            ImageInfo::Length(u32::from_le_bytes([*b0, *b1, *b2, *b3]))
        }
        [tag, ..] => ImageInfo::Unrecognized { tag: Some(*tag) },
        [] => ImageInfo::Unrecognized { tag: None },
    }
}

/// Decode the capture interval characteristic: one byte, minutes.
///
/// Returns `None` for an empty read.
pub fn parse_capture_interval(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_is_little_endian() {
        assert_eq!(
            parse_image_info(&[0x01, 0x78, 0x56, 0x34, 0x12]),
            ImageInfo::Length(0x1234_5678)
        );
        assert_eq!(
            parse_image_info(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF]),
            ImageInfo::Length(u32::MAX)
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        assert_eq!(
            parse_image_info(&[0x01, 0x10, 0x27, 0x00, 0x00, 0xAA, 0xBB]),
            ImageInfo::Length(10_000)
        );
    }

    #[test]
    fn truncated_length_is_unrecognized() {
        assert_eq!(
            parse_image_info(&[0x01, 0x10, 0x27]),
            ImageInfo::Unrecognized { tag: Some(0x01) }
        );
        assert_eq!(parse_image_info(&[0x01]), ImageInfo::Unrecognized { tag: Some(0x01) });
    }

    #[test]
    fn other_tags_and_empty_payloads() {
        assert_eq!(
            parse_image_info(&[0x00, 0x0A, 0x00, 0x00, 0x00]),
            ImageInfo::Unrecognized { tag: Some(0x00) }
        );
        assert_eq!(parse_image_info(&[]), ImageInfo::Unrecognized { tag: None });
    }

    #[test]
    fn capture_interval_reads_first_byte() {
        assert_eq!(parse_capture_interval(&[5]), Some(5));
        assert_eq!(parse_capture_interval(&[1, 2, 3]), Some(1));
        assert_eq!(parse_capture_interval(&[]), None);
    }
}
