//! Captured frames.
//!
//! - `StreamKind`: which of the two cameras a frame came from.
//! - `Frame`: one timestamped RGB sample. Frames are immutable after capture
//!   and are moved, never cloned, from the source to exactly one worker.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// The two camera streams. The pipeline shape is fixed to these two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Optical,
    Thermal,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Optical, StreamKind::Thermal];

    /// Filename suffix used for evidence images of this stream.
    pub fn suffix(self) -> &'static str {
        match self {
            StreamKind::Optical => "_o",
            StreamKind::Thermal => "_t",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Optical => "optical",
            StreamKind::Thermal => "thermal",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded RGB8 frame.
///
/// Not `Clone`: ownership passes from the acquisition loop to
/// the hand-off slot and then to the worker that drains it, or the frame is
/// dropped.
pub struct Frame {
    stream: StreamKind,
    captured_at: SystemTime,
    width: u32,
    height: u32,
    /// Packed RGB, `width * height * 3` bytes.
    pixels: Vec<u8>,
}

impl Frame {
    /// Build a frame from packed RGB pixels. Returns `None` when the buffer
    /// length does not match the dimensions.
    pub fn new(stream: StreamKind, width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        Self::captured(stream, SystemTime::now(), width, height, pixels)
    }

    pub fn captured(
        stream: StreamKind,
        captured_at: SystemTime,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        if pixels.len() != expected {
            return None;
        }
        Some(Self {
            stream,
            captured_at,
            width,
            height,
            pixels,
        })
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Capture time in whole seconds since the Unix epoch.
    pub fn unix_seconds(&self) -> u64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy of the pixels as an `image` buffer, for encoding or annotation.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length was checked in `captured`, so `from_raw` cannot fail here;
        // fall back to a blank canvas rather than panic.
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("stream", &self.stream)
            .field("captured_at", &self.captured_at)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(StreamKind::Optical, 4, 4, vec![0u8; 10]).is_none());
        assert!(Frame::new(StreamKind::Optical, 4, 4, vec![0u8; 48]).is_some());
    }

    #[test]
    fn unix_seconds_truncates() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_900);
        let frame = Frame::captured(StreamKind::Thermal, at, 1, 1, vec![1, 2, 3]).unwrap();
        assert_eq!(frame.unix_seconds(), 1_700_000_000);
        assert_eq!(frame.stream().suffix(), "_t");
    }

    #[test]
    fn rgb_image_matches_pixels() {
        let frame = Frame::new(StreamKind::Optical, 2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let img = frame.to_rgb_image();
        assert_eq!(img.get_pixel(1, 0).0, [4, 5, 6]);
    }
}
