//! Camera acquisition.
//!
//! This module provides `CameraSource`, which owns the one camera the viewer
//! uses for its whole lifetime:
//!
//! - Enumerates video input devices and deterministically selects one
//!   (the second enumerated device when more than one exists, else the first).
//! - Opens a temporary handle purely to confirm access, releases it, then
//!   opens the final stream against the selected device.
//! - Produces `Frame` instances on demand.
//!
//! Real V4L2 devices sit behind the `camera-v4l2` feature. A synthetic
//! backend for `stub://` devices is always compiled and generates
//! deterministic frames; the `stub0://` variant reports zero dimensions for
//! its first few grabs, modeling a source that has not decoded dimensions yet.
//!
//! Acquisition failure (no device, permission denied) is an error the caller
//! logs; there is no retry and no user-facing error surface.

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Number of zero-dimension grabs a `stub0://` source produces before
/// delivering real frames.
const STUB_WARMUP_GRABS: u64 = 3;

/// Configuration for the camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device selector: "auto" (enumerate and pick), an explicit device path
    /// (e.g. "/dev/video1"), or "stub://name" / "stub0://name".
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://front".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Deterministic device selection: prefer the second enumerated device when
/// more than one exists, else the first.
pub fn select_device(candidates: &[String]) -> Option<&str> {
    if candidates.len() > 1 {
        candidates.get(1).map(String::as_str)
    } else {
        candidates.first().map(String::as_str)
    }
}

/// The viewer's single camera.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if let Some(name) = config.device.strip_prefix("stub0://") {
            let name = name.to_string();
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(
                    name,
                    config,
                    STUB_WARMUP_GRABS,
                )),
            });
        }
        if let Some(name) = config.device.strip_prefix("stub://") {
            let name = name.to_string();
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(name, config, 0)),
            });
        }

        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)?),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            Err(anyhow!(
                "device '{}' requires the camera-v4l2 feature; only stub:// sources are available",
                config.device
            ))
        }
    }

    /// Select and open the camera. For real devices this enumerates nodes,
    /// picks one, probes it for access, releases the probe handle, then opens
    /// the final stream. Synthetic sources are always connected.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.connect(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.connect(),
        }
    }

    /// Grab the current frame.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.next_frame(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.next_frame(),
        }
    }
}

/// Anything the capture loop can grab frames from.
///
/// `CameraSource` is the production implementation; tests substitute fixed
/// or failing grabbers.
pub trait FrameGrabber: Send {
    fn next_frame(&mut self) -> Result<Frame>;
}

impl FrameGrabber for CameraSource {
    fn next_frame(&mut self) -> Result<Frame> {
        CameraSource::next_frame(self)
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub:// and stub0://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    name: String,
    config: CameraConfig,
    grab_count: u64,
    warmup_grabs: u64,
}

impl SyntheticCamera {
    fn new(name: String, config: CameraConfig, warmup_grabs: u64) -> Self {
        Self {
            name,
            config,
            grab_count: 0,
            warmup_grabs,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "CameraSource: connected to stub camera '{}' ({}x{})",
            self.name,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.grab_count += 1;
        if self.grab_count <= self.warmup_grabs {
            return Ok(Frame::empty());
        }

        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            // Mix grab count and position so consecutive frames differ.
            *pixel = ((i as u64 + self.grab_count) % 256) as u8;
        }

        Frame::from_rgb(pixels, self.config.width, self.config.height)
    }
}

// ----------------------------------------------------------------------------
// V4L2 device camera
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
use device::DeviceCamera;

#[cfg(feature = "camera-v4l2")]
mod device {
    use super::*;
    use anyhow::Context;
    use ouroboros::self_referencing;

    pub(super) struct DeviceCamera {
        config: CameraConfig,
        state: Option<DeviceCameraState>,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct DeviceCameraState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceCamera {
        pub(super) fn new(config: CameraConfig) -> Result<Self> {
            Ok(Self {
                active_width: config.width,
                active_height: config.height,
                config,
                state: None,
            })
        }

        pub(super) fn connect(&mut self) -> Result<()> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let path = if self.config.device == "auto" {
                let candidates = enumerate_video_devices();
                let Some(path) = select_device(&candidates) else {
                    return Err(anyhow!("no video input devices found"));
                };
                log::info!(
                    "CameraSource: selected {} out of {} device(s)",
                    path,
                    candidates.len()
                );
                path.to_string()
            } else {
                self.config.device.clone()
            };

            // Temporary handle to confirm access, released before the final
            // stream is opened.
            let probe = v4l::Device::with_path(&path)
                .with_context(|| format!("probe camera device {}", path))?;
            drop(probe);

            let mut device = v4l::Device::with_path(&path)
                .with_context(|| format!("open camera device {}", path))?;
            let mut format = device.format().context("read camera format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!("CameraSource: failed to set format on {}: {}", path, err);
                    device
                        .format()
                        .context("read camera format after set failure")?
                }
            };

            self.active_width = format.width;
            self.active_height = format.height;

            let state = DeviceCameraStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| anyhow::Error::new(err).context("create camera stream"))
                },
            }
            .try_build()?;
            self.state = Some(state);

            log::info!(
                "CameraSource: connected to {} ({}x{})",
                path,
                self.active_width,
                self.active_height
            );
            Ok(())
        }

        pub(super) fn next_frame(&mut self) -> Result<Frame> {
            use v4l::io::traits::CaptureStream;

            let state = self.state.as_mut().context("camera not connected")?;
            let (buf, _meta) = state
                .with_mut(|fields| fields.stream.next())
                .map_err(|err| anyhow::Error::new(err).context("capture camera frame"))?;

            Frame::from_rgb(buf.to_vec(), self.active_width, self.active_height)
        }
    }

    fn enumerate_video_devices() -> Vec<String> {
        let mut devices: Vec<String> = v4l::context::enum_devices()
            .iter()
            .map(|node| node.path().display().to_string())
            .collect();
        devices.sort();
        devices
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(device: &str) -> CameraConfig {
        CameraConfig {
            device: device.to_string(),
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn prefers_second_device_when_more_than_one() {
        let candidates = vec!["/dev/video0".to_string(), "/dev/video1".to_string()];
        assert_eq!(select_device(&candidates), Some("/dev/video1"));
    }

    #[test]
    fn falls_back_to_first_device_when_only_one() {
        let candidates = vec!["/dev/video0".to_string()];
        assert_eq!(select_device(&candidates), Some("/dev/video0"));
    }

    #[test]
    fn selects_nothing_when_no_devices() {
        assert_eq!(select_device(&[]), None);
    }

    #[test]
    fn stub_camera_produces_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config("stub://test"))?;
        source.connect()?;

        let frame = source.next_frame()?;
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert!(frame.has_dimensions());
        Ok(())
    }

    #[test]
    fn stub_camera_frames_differ_between_grabs() -> Result<()> {
        let mut source = CameraSource::new(stub_config("stub://test"))?;
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_ne!(first.image().as_raw(), second.image().as_raw());
        Ok(())
    }

    #[test]
    fn warmup_stub_starts_with_zero_dimensions() -> Result<()> {
        let mut source = CameraSource::new(stub_config("stub0://test"))?;
        source.connect()?;

        for _ in 0..STUB_WARMUP_GRABS {
            assert!(!source.next_frame()?.has_dimensions());
        }
        assert!(source.next_frame()?.has_dimensions());
        Ok(())
    }
}
