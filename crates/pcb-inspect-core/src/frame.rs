use image::{GrayImage, RgbImage};
use std::time::SystemTime;

/// Errors raised for malformed pixel buffers handed to the core.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid {channels}-channel buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer {
        channels: usize,
        expected: usize,
        got: usize,
    },

    #[error("invalid frame dimensions (width={width}, height={height})")]
    InvalidDimensions { width: u32, height: u32 },
}

/// One captured camera frame: an owned RGB buffer plus its capture time.
///
/// Frames are immutable once built. Every processing step produces a new
/// frame instead of editing pixels in place.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: SystemTime,
}

impl Frame {
    /// Wrap an image captured "now".
    pub fn new(image: RgbImage) -> Self {
        Self::with_timestamp(image, SystemTime::now())
    }

    pub fn with_timestamp(image: RgbImage, captured_at: SystemTime) -> Self {
        Self { image, captured_at }
    }

    /// Build a frame from a tightly packed row-major RGB8 buffer.
    pub fn from_rgb_slice(width: u32, height: u32, pixels: &[u8]) -> Result<Self, FrameError> {
        let expected = checked_len(width, height, 3)?;
        if pixels.len() != expected {
            return Err(FrameError::InvalidBuffer {
                channels: 3,
                expected,
                got: pixels.len(),
            });
        }
        RgbImage::from_raw(width, height, pixels.to_vec())
            .map(Self::new)
            .ok_or(FrameError::InvalidDimensions { width, height })
    }

    /// Build a frame from a single-channel buffer; intensity is replicated
    /// into all three channels.
    pub fn from_gray_slice(width: u32, height: u32, pixels: &[u8]) -> Result<Self, FrameError> {
        let expected = checked_len(width, height, 1)?;
        if pixels.len() != expected {
            return Err(FrameError::InvalidBuffer {
                channels: 1,
                expected,
                got: pixels.len(),
            });
        }
        let gray = GrayImage::from_raw(width, height, pixels.to_vec())
            .ok_or(FrameError::InvalidDimensions { width, height })?;
        Ok(Self::from_gray(&gray))
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        let rgb = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
            let v = gray.get_pixel(x, y)[0];
            image::Rgb([v, v, v])
        });
        Self::new(rgb)
    }

    #[inline]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    #[inline]
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    pub fn size(&self) -> FrameSize {
        FrameSize {
            width: self.image.width(),
            height: self.image.height(),
        }
    }

    /// Single-channel intensity view of the frame.
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Derive a new frame that keeps this frame's capture time.
    pub fn derive(&self, image: RgbImage) -> Self {
        Self::with_timestamp(image, self.captured_at)
    }
}

/// Pixel dimensions of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

fn checked_len(width: u32, height: u32, channels: usize) -> Result<usize, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::InvalidDimensions { width, height });
    }
    let w = usize::try_from(width).ok();
    let h = usize::try_from(height).ok();
    let Some((w, h)) = w.zip(h) else {
        return Err(FrameError::InvalidDimensions { width, height });
    };
    w.checked_mul(h)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(FrameError::InvalidDimensions { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_rgb_buffer() {
        let err = Frame::from_rgb_slice(4, 4, &[0u8; 47]).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidBuffer {
                channels: 3,
                expected: 48,
                got: 47
            }
        );
    }

    #[test]
    fn rejects_empty_dimensions() {
        let err = Frame::from_gray_slice(0, 10, &[]).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidDimensions {
                width: 0,
                height: 10
            }
        );
    }

    #[test]
    fn gray_frames_round_trip_intensity() {
        let pixels: Vec<u8> = (0..12).map(|v| v * 20).collect();
        let frame = Frame::from_gray_slice(4, 3, &pixels).expect("frame");
        assert_eq!(frame.size(), FrameSize { width: 4, height: 3 });
        assert_eq!(frame.to_gray().as_raw(), &pixels);
    }
}
