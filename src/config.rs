use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/predict/";
const DEFAULT_CAMERA_DEVICE: &str = "stub://front";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_INTERVAL_MS: u64 = 200;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct ViewerConfigFile {
    endpoint: Option<String>,
    interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    camera: Option<CameraConfigFile>,
    output: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub endpoint: String,
    pub camera: CameraSettings,
    pub interval: Duration,
    pub jpeg_quality: u8,
    /// Where to write the composited overlay JPEG; `None` keeps it in memory.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl ViewerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAYD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ViewerConfigFile) -> Self {
        let endpoint = file
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        Self {
            endpoint,
            camera,
            interval: Duration::from_millis(file.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            output: file.output,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("OVERLAYD_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.endpoint = endpoint;
            }
        }
        if let Ok(device) = std::env::var("OVERLAYD_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(interval) = std::env::var("OVERLAYD_INTERVAL_MS") {
            let millis: u64 = interval
                .parse()
                .map_err(|_| anyhow!("OVERLAYD_INTERVAL_MS must be an integer number of milliseconds"))?;
            self.interval = Duration::from_millis(millis);
        }
        if let Ok(output) = std::env::var("OVERLAYD_OUTPUT") {
            if !output.trim().is_empty() {
                self.output = Some(PathBuf::from(output));
            }
        }
        Ok(())
    }

    /// Re-check after any late overrides (CLI flags).
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.endpoint)
            .map_err(|e| anyhow!("invalid endpoint {}: {}", self.endpoint, e))?;
        if self.interval.as_millis() == 0 {
            return Err(anyhow!("capture interval must be greater than zero"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("jpeg quality must be in 1..=100"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ViewerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
