//! Captured camera frames.
//!
//! A `Frame` is one RGB image grabbed from the camera. Frames are cheap to
//! clone (upload workers take their own copy) and carry their native
//! resolution. A frame with zero width or height means the source has not
//! decoded dimensions yet and must be skipped by the capture loop.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// One RGB frame at the source's native resolution.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wrap raw packed RGB bytes. Fails if `data` does not match the
    /// dimensions (width * height * 3 bytes).
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let image = RgbImage::from_raw(width, height, data)
            .with_context(|| format!("rgb buffer does not match {}x{}", width, height))?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Placeholder frame for a source that has not produced dimensions yet.
    pub fn empty() -> Self {
        Self {
            image: RgbImage::new(0, 0),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Whether the source has decoded dimensions yet.
    pub fn has_dimensions(&self) -> bool {
        self.image.width() > 0 && self.image.height() > 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Encode the frame as JPEG at its native resolution.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality)
            .encode_image(&self.image)
            .context("encode frame as jpeg")?;
        Ok(buf)
    }
}
