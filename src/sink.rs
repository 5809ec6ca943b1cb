//! Overlay publication.
//!
//! The browser original draws the composited canvas onto a visible element.
//! Here each rendered canvas goes through an `OverlaySink`: either held in
//! memory for polling, or written as a JPEG that an external viewer can
//! watch. A failed upload never reaches the sink, so the previously
//! published canvas stays visible until the next successful tick.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait OverlaySink: Send + Sync {
    fn publish(&self, canvas: &RgbImage) -> Result<()>;
}

/// Holds the latest composited canvas behind a mutex.
#[derive(Default)]
pub struct MemorySink {
    latest: Mutex<Option<RgbImage>>,
    publishes: Mutex<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently published canvas, if any.
    pub fn latest(&self) -> Option<RgbImage> {
        self.latest.lock().ok()?.clone()
    }

    /// How many canvases have been published so far.
    pub fn publish_count(&self) -> u64 {
        self.publishes.lock().map(|count| *count).unwrap_or(0)
    }
}

impl OverlaySink for MemorySink {
    fn publish(&self, canvas: &RgbImage) -> Result<()> {
        let mut latest = self
            .latest
            .lock()
            .map_err(|_| anyhow::anyhow!("sink mutex poisoned"))?;
        *latest = Some(canvas.clone());
        if let Ok(mut count) = self.publishes.lock() {
            *count += 1;
        }
        Ok(())
    }
}

/// Writes the latest canvas as a JPEG, overwriting in place.
pub struct FileSink {
    path: PathBuf,
    quality: u8,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            path: path.into(),
            quality,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverlaySink for FileSink {
    fn publish(&self, canvas: &RgbImage) -> Result<()> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode_image(canvas)
            .context("encode overlay canvas")?;

        // Write-then-rename so a watcher never reads a half-written file.
        let tmp = self.path.with_extension("jpg.tmp");
        fs::write(&tmp, &buf).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}
