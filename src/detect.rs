//! Remote detector client.
//!
//! The detection service is an external collaborator: HTTP POST to a fixed
//! endpoint, multipart form body with one field named `file` carrying a
//! JPEG-encoded frame as `frame.jpg`. The response is JSON:
//! `{ "results": [ { "class", "confidence", "box": {x1,y1,x2,y2} }, ... ] }`.
//!
//! There is no retry and no backoff. A failed request is logged by the
//! caller and that frame's detections are simply skipped.

use anyhow::{Context, Result};
use rand::RngCore;
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use url::Url;

/// Multipart field name and filename, fixed by the service contract.
const FORM_FIELD: &str = "file";
const FORM_FILENAME: &str = "frame.jpg";

const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounding box in pixel coordinates of the source frame.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One recognized object instance. Produced by the remote service per
/// request, drawn once, then discarded.
#[derive(Clone, Debug, Deserialize)]
pub struct Detection {
    /// Class label (person, car, ...).
    #[serde(rename = "class")]
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Box corners in source-frame pixels.
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    results: Vec<Detection>,
}

/// Parse the service's JSON response body.
pub fn parse_detect_response(payload: &[u8]) -> Result<Vec<Detection>> {
    let response: DetectResponse =
        serde_json::from_slice(payload).context("parse detector response")?;
    Ok(response.results)
}

/// Anything a frame can be submitted to for detection.
///
/// `DetectorClient` is the production implementation; tests substitute
/// counting or failing detectors.
pub trait FrameDetector: Send + Sync {
    fn detect(&self, jpeg: &[u8]) -> Result<Vec<Detection>>;
}

/// HTTP client for the remote detection service.
pub struct DetectorClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl DetectorClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        Url::parse(endpoint).with_context(|| format!("invalid detector endpoint {}", endpoint))?;
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build();
        Ok(Self {
            endpoint: endpoint.to_string(),
            agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submit one JPEG frame and return the service's detections.
    pub fn submit(&self, jpeg: &[u8]) -> Result<Vec<Detection>> {
        let boundary = multipart_boundary();
        let body = build_multipart_body(&boundary, jpeg);

        let response = self
            .agent
            .post(&self.endpoint)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)
            .with_context(|| format!("post frame to {}", self.endpoint))?;

        let mut payload = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut payload)
            .context("read detector response")?;
        parse_detect_response(&payload)
    }
}

impl FrameDetector for DetectorClient {
    fn detect(&self, jpeg: &[u8]) -> Result<Vec<Detection>> {
        self.submit(jpeg)
    }
}

fn multipart_boundary() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("----overlay-viewer-{:016x}", u64::from_le_bytes(bytes))
}

/// Assemble a multipart/form-data body with the single frame field.
pub(crate) fn build_multipart_body(boundary: &str, jpeg: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(jpeg.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            FORM_FIELD, FORM_FILENAME
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    body.extend_from_slice(jpeg);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
