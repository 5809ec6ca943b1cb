//! Remote-detection overlay viewer.
//!
//! Captures live camera frames, periodically submits them to a remote
//! object-detection service, and composites the returned bounding boxes and
//! labels over the frame.
//!
//! # Module Structure
//!
//! - `camera`: device enumeration, selection, and frame grabbing
//! - `capture`: the fixed-interval capture loop (start/stop controller)
//! - `detect`: detection types and the HTTP detector client
//! - `overlay`: stateless frame + detections compositor
//! - `sink`: where composited canvases go (memory or file)
//! - `config`: daemon configuration (file, env, defaults)
//!
//! Control flow: the camera is acquired once at startup, the capture loop is
//! toggled by the operator, and each tick's detections feed the overlay.
//! Errors degrade to "no overlay drawn": camera failure leaves the system
//! inert, a failed request skips that frame's detections.

pub mod camera;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod overlay;
pub mod sink;

pub use camera::{select_device, CameraConfig, CameraSource, FrameGrabber};
pub use capture::{CaptureConfig, CaptureLoop};
pub use config::ViewerConfig;
pub use detect::{BoundingBox, Detection, DetectorClient, FrameDetector};
pub use frame::Frame;
pub use sink::{FileSink, MemorySink, OverlaySink};
