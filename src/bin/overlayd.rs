//! overlayd - remote-detection overlay viewer daemon
//!
//! This daemon:
//! 1. Acquires one camera (enumerate, select, probe, open)
//! 2. Ticks every 200ms, submitting the current frame as JPEG to the
//!    remote detection service
//! 3. Composites returned bounding boxes and labels over the frame
//! 4. Publishes the composited canvas (to a file, or held in memory)
//!
//! Camera acquisition failure is logged and the daemon exits inert;
//! detection never runs. Per-tick transport failures are logged and the
//! loop keeps ticking.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use overlay_viewer::{
    camera::CameraConfig, CaptureConfig, CaptureLoop, CameraSource, DetectorClient, FileSink,
    MemorySink, OverlaySink, ViewerConfig,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Remote-detection overlay viewer daemon")]
struct Cli {
    /// Detection service endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Camera device: "auto", a device path, or stub://name
    #[arg(long)]
    camera: Option<String>,

    /// Capture period in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Write the latest overlay canvas as JPEG to this path
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut cfg = ViewerConfig::load()?;
    if let Some(endpoint) = cli.endpoint {
        cfg.endpoint = endpoint;
    }
    if let Some(device) = cli.camera {
        cfg.camera.device = device;
    }
    if let Some(millis) = cli.interval_ms {
        cfg.interval = Duration::from_millis(millis);
    }
    if let Some(output) = cli.output {
        cfg.output = Some(output);
    }
    cfg.validate()?;

    // Camera acquisition runs once at startup. Failure leaves the system
    // inert: log only, no detection ever runs.
    let camera_config = CameraConfig {
        device: cfg.camera.device.clone(),
        width: cfg.camera.width,
        height: cfg.camera.height,
    };
    let mut camera = match CameraSource::new(camera_config).and_then(|mut camera| {
        camera.connect()?;
        Ok(camera)
    }) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("camera acquisition failed: {:#}", err);
            return Ok(());
        }
    };

    // Warm the pipeline so the first tick has a current frame to read.
    if let Err(err) = camera.next_frame() {
        log::warn!("initial frame grab failed: {:#}", err);
    }

    let detector = Arc::new(DetectorClient::new(&cfg.endpoint)?);
    log::info!("detector endpoint: {}", detector.endpoint());

    let sink: Arc<dyn OverlaySink> = match &cfg.output {
        Some(path) => {
            log::info!("publishing overlay canvas to {}", path.display());
            Arc::new(FileSink::new(path.clone(), cfg.jpeg_quality))
        }
        None => {
            log::info!("no output path configured; overlay canvas kept in memory");
            Arc::new(MemorySink::new())
        }
    };

    let mut capture = CaptureLoop::new(
        Box::new(camera),
        detector,
        sink,
        CaptureConfig {
            interval: cfg.interval,
            jpeg_quality: cfg.jpeg_quality,
        },
    );
    capture.start();
    log::info!(
        "overlayd running (camera={}, period={}ms)",
        cfg.camera.device,
        cfg.interval.as_millis()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install ctrl-c handler")?;
    rx.recv().ok();

    capture.stop();
    Ok(())
}
