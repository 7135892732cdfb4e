//! Captured frames and the batches they travel in.
//!
//! - `RawImage`: decoded RGB pixels as handed over by a capture device.
//! - `Frame`: a labelled image owned by exactly one batch. Pixels are zeroized on drop.
//! - `FrameBatch`: the frames captured during one active window, capped at `buffer_limit`.
//!
//! Releasing a batch consumes it, so a frame can only ever be released once.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use zeroize::Zeroize;

/// JPEG quality used when handing frames to the detector and the object store.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Decoded RGB8 pixels straight from a capture device.
#[derive(Debug, Default)]
pub struct RawImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// An image with no pixels or a zero dimension counts as an empty read.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() || self.width == 0 || self.height == 0
    }
}

/// One captured frame plus its `{stream}_{timestamp}` label.
///
/// Not `Clone`: a frame belongs to a single batch until that batch is released.
pub struct Frame {
    label: String,
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(label: impl Into<String>, image: RawImage) -> Self {
        Self {
            label: label.into(),
            pixels: image.pixels,
            width: image.width,
            height: image.height,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Encode the frame as JPEG, the transport encoding of the detector and the store.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let expected = (self.width as usize) * (self.height as usize) * 3;
        if self.pixels.len() != expected {
            return Err(anyhow!(
                "frame {} has {} bytes, expected {} for {}x{} RGB",
                self.label,
                self.pixels.len(),
                expected,
                self.width,
                self.height
            ));
        }
        let mut out = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .with_context(|| format!("encode frame {} as jpeg", self.label))?;
        Ok(out)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.pixels.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("label", &self.label)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Ordered frames from one contiguous active window.
#[derive(Debug, Default)]
pub struct FrameBatch {
    frames: Vec<Frame>,
}

impl FrameBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
        }
    }

    /// Append a frame unless the batch already holds `limit` frames.
    ///
    /// A rejected frame is handed back to the caller.
    pub fn try_push(&mut self, frame: Frame, limit: usize) -> std::result::Result<(), Frame> {
        if self.frames.len() >= limit {
            return Err(frame);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Release every frame in the batch. Returns how many frames were released.
    pub fn release(self) -> usize {
        let count = self.frames.len();
        drop(self);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_image(width: u32, height: u32, value: u8) -> RawImage {
        RawImage::new(vec![value; (width * height * 3) as usize], width, height)
    }

    #[test]
    fn empty_raw_image_is_detected() {
        assert!(RawImage::default().is_empty());
        assert!(RawImage::new(vec![1, 2, 3], 0, 1).is_empty());
        assert!(!solid_image(2, 2, 7).is_empty());
    }

    #[test]
    fn frame_encodes_to_jpeg() -> Result<()> {
        let frame = Frame::new("garage_2024-01-01_00:00:00", solid_image(16, 8, 128));
        let jpeg = frame.encode_jpeg(DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn frame_with_truncated_pixels_fails_to_encode() {
        let frame = Frame::new("broken", RawImage::new(vec![0; 10], 16, 8));
        let err = frame.encode_jpeg(DEFAULT_JPEG_QUALITY).unwrap_err();
        assert!(err.to_string().contains("expected 384"));
    }

    #[test]
    fn batch_rejects_frames_past_limit() {
        let mut batch = FrameBatch::new();
        for i in 0..3 {
            assert!(batch
                .try_push(Frame::new(format!("f{i}"), solid_image(1, 1, 0)), 3)
                .is_ok());
        }
        let rejected = batch
            .try_push(Frame::new("f3", solid_image(1, 1, 0)), 3)
            .unwrap_err();
        assert_eq!(rejected.label(), "f3");
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.get(0).map(Frame::label), Some("f0"));
    }

    #[test]
    fn release_reports_frame_count() {
        let mut batch = FrameBatch::with_capacity(2);
        batch
            .try_push(Frame::new("a", solid_image(1, 1, 0)), 2)
            .unwrap();
        batch
            .try_push(Frame::new("b", solid_image(1, 1, 0)), 2)
            .unwrap();
        assert_eq!(batch.release(), 2);
        assert_eq!(FrameBatch::new().release(), 0);
    }
}
