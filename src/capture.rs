//! Fixed-interval capture loop.
//!
//! `CaptureLoop` is the two-state (idle/running) controller around the tick
//! cycle: grab the current frame, encode it as JPEG, submit it to the remote
//! detector, and publish the composited overlay. All loop state (ticker
//! handle, stop flag, sequence counters) lives in this owned object.
//!
//! - `start` is an idempotent restart: a running ticker is cancelled first.
//! - `stop` cancels the ticker and is a no-op when idle. In-flight requests
//!   are not cancelled.
//! - A tick whose frame has zero width or height skips without a network
//!   call. A failed request is logged and the loop keeps ticking.
//!
//! Ticks do not wait for the previous tick's request: each submission runs
//! on its own worker, so responses may arrive out of order. Every tick
//! carries a sequence number and a response older than the last applied one
//! is discarded rather than overwriting a newer overlay.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::camera::FrameGrabber;
use crate::detect::FrameDetector;
use crate::frame::Frame;
use crate::overlay;
use crate::sink::OverlaySink;

/// Fixed capture period of the original design.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Tick period.
    pub interval: Duration,
    /// JPEG quality for submitted frames.
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Start/stop controller for the capture cycle.
pub struct CaptureLoop {
    camera: Arc<Mutex<Box<dyn FrameGrabber>>>,
    shared: Arc<TickShared>,
    interval: Duration,
    ticker: Option<Ticker>,
}

struct Ticker {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// State shared between the ticker thread and its submission workers.
struct TickShared {
    detector: Arc<dyn FrameDetector>,
    sink: Arc<dyn OverlaySink>,
    jpeg_quality: u8,
    next_seq: AtomicU64,
    /// Sequence of the last response applied to the sink. Workers hold this
    /// lock across the publish so claim and publish are one step.
    applied_seq: Mutex<u64>,
    active_tickers: AtomicUsize,
}

impl CaptureLoop {
    pub fn new(
        camera: Box<dyn FrameGrabber>,
        detector: Arc<dyn FrameDetector>,
        sink: Arc<dyn OverlaySink>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            camera: Arc::new(Mutex::new(camera)),
            shared: Arc::new(TickShared {
                detector,
                sink,
                jpeg_quality: config.jpeg_quality,
                next_seq: AtomicU64::new(0),
                applied_seq: Mutex::new(0),
                active_tickers: AtomicUsize::new(0),
            }),
            interval: config.interval,
            ticker: None,
        }
    }

    /// Begin ticking at the fixed period. If a ticker is already running it
    /// is cancelled first, so a double start leaves exactly one ticker.
    pub fn start(&mut self) {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let camera = Arc::clone(&self.camera);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            shared.active_tickers.fetch_add(1, Ordering::SeqCst);
            while !stop_flag.load(Ordering::SeqCst) {
                tick(&camera, &shared);
                thread::sleep(interval);
            }
            shared.active_tickers.fetch_sub(1, Ordering::SeqCst);
        });

        self.ticker = Some(Ticker { stop, handle });
        log::info!("capture loop started ({}ms period)", self.interval.as_millis());
    }

    /// Cancel the ticker. No-op when idle; never cancels in-flight requests.
    pub fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        ticker.stop.store(true, Ordering::SeqCst);
        if ticker.handle.join().is_err() {
            log::warn!("capture ticker panicked");
        }
        log::info!("capture loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Number of live ticker threads (0 or 1 by construction).
    pub fn active_tickers(&self) -> usize {
        self.shared.active_tickers.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One capture tick: grab the current frame and hand it to a worker.
fn tick(camera: &Arc<Mutex<Box<dyn FrameGrabber>>>, shared: &Arc<TickShared>) {
    let frame = {
        let Ok(mut camera) = camera.lock() else {
            return;
        };
        camera.next_frame()
    };
    let frame = match frame {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("frame capture failed: {:#}", err);
            return;
        }
    };
    if !frame.has_dimensions() {
        log::debug!("skipping tick: source has no decoded dimensions yet");
        return;
    }

    let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let shared = Arc::clone(shared);
    // The worker is detached on purpose: stop() cancels the ticker only.
    thread::spawn(move || submit_frame(&shared, frame, seq));
}

/// Encode, submit, and (if still fresh) render and publish one frame.
fn submit_frame(shared: &TickShared, frame: Frame, seq: u64) {
    let jpeg = match frame.encode_jpeg(shared.jpeg_quality) {
        Ok(jpeg) => jpeg,
        Err(err) => {
            log::warn!("jpeg encode failed: {:#}", err);
            return;
        }
    };

    match shared.detector.detect(&jpeg) {
        Ok(detections) => {
            let canvas = overlay::render(&frame, &detections);
            // Claim and publish under one lock; a stalled older worker can
            // never land its canvas after a newer sequence has applied.
            let Ok(mut applied) = shared.applied_seq.lock() else {
                return;
            };
            if seq <= *applied {
                log::debug!("discarding stale detection response (seq {})", seq);
                return;
            }
            *applied = seq;
            match shared.sink.publish(&canvas) {
                Ok(()) => log::debug!("seq {}: applied {} detection(s)", seq, detections.len()),
                Err(err) => log::warn!("overlay publish failed: {:#}", err),
            }
        }
        Err(err) => log::warn!("detection request failed: {:#}", err),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use crate::sink::MemorySink;
    use anyhow::{anyhow, Result};

    struct StaticGrabber {
        frame: Frame,
    }

    impl FrameGrabber for StaticGrabber {
        fn next_frame(&mut self) -> Result<Frame> {
            Ok(self.frame.clone())
        }
    }

    struct CountingDetector {
        calls: AtomicU64,
        detections: Vec<Detection>,
    }

    impl CountingDetector {
        fn new(detections: Vec<Detection>) -> Self {
            Self {
                calls: AtomicU64::new(0),
                detections,
            }
        }
    }

    impl FrameDetector for CountingDetector {
        fn detect(&self, _jpeg: &[u8]) -> Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }
    }

    /// Succeeds on the first call, fails afterwards.
    struct FlakyDetector {
        calls: AtomicU64,
    }

    impl FrameDetector for FlakyDetector {
        fn detect(&self, _jpeg: &[u8]) -> Result<Vec<Detection>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![person()])
            } else {
                Err(anyhow!("connection refused"))
            }
        }
    }

    fn person() -> Detection {
        Detection {
            label: "person".to_string(),
            confidence: 0.9,
            bbox: BoundingBox {
                x1: 2.0,
                y1: 2.0,
                x2: 20.0,
                y2: 20.0,
            },
        }
    }

    fn test_frame() -> Frame {
        Frame::from_rgb(vec![0u8; 32 * 32 * 3], 32, 32).expect("frame")
    }

    fn shared_with(detector: Arc<dyn FrameDetector>, sink: Arc<dyn OverlaySink>) -> TickShared {
        TickShared {
            detector,
            sink,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            next_seq: AtomicU64::new(0),
            applied_seq: Mutex::new(0),
            active_tickers: AtomicUsize::new(0),
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            interval: Duration::from_millis(10),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    #[test]
    fn double_start_leaves_exactly_one_ticker() {
        let detector = Arc::new(CountingDetector::new(vec![]));
        let mut capture = CaptureLoop::new(
            Box::new(StaticGrabber { frame: test_frame() }),
            detector,
            Arc::new(MemorySink::new()),
            fast_config(),
        );

        capture.start();
        capture.start();
        thread::sleep(Duration::from_millis(50));

        assert!(capture.is_running());
        assert_eq!(capture.active_tickers(), 1);

        capture.stop();
        assert_eq!(capture.active_tickers(), 0);
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let detector = Arc::new(CountingDetector::new(vec![]));
        let mut capture = CaptureLoop::new(
            Box::new(StaticGrabber { frame: test_frame() }),
            detector,
            Arc::new(MemorySink::new()),
            fast_config(),
        );

        assert!(!capture.is_running());
        capture.stop();
        capture.stop();
        assert!(!capture.is_running());
    }

    #[test]
    fn zero_dimension_frames_produce_no_network_call() {
        let detector = Arc::new(CountingDetector::new(vec![]));
        let mut capture = CaptureLoop::new(
            Box::new(StaticGrabber {
                frame: Frame::empty(),
            }),
            Arc::clone(&detector) as Arc<dyn FrameDetector>,
            Arc::new(MemorySink::new()),
            fast_config(),
        );

        capture.start();
        thread::sleep(Duration::from_millis(60));
        capture.stop();

        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn successful_ticks_publish_overlays() {
        let detector = Arc::new(CountingDetector::new(vec![person()]));
        let sink = Arc::new(MemorySink::new());
        let mut capture = CaptureLoop::new(
            Box::new(StaticGrabber { frame: test_frame() }),
            Arc::clone(&detector) as Arc<dyn FrameDetector>,
            Arc::clone(&sink) as Arc<dyn OverlaySink>,
            fast_config(),
        );

        capture.start();
        // Workers run detached; poll instead of assuming they finished.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.publish_count() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        capture.stop();

        assert!(detector.calls.load(Ordering::SeqCst) > 0);
        let canvas = sink.latest().expect("published overlay");
        assert_eq!(canvas.dimensions(), (32, 32));
        assert_eq!(canvas.get_pixel(2, 2).0, [0, 255, 0]);
    }

    #[test]
    fn failed_upload_leaves_previous_overlay_unchanged() {
        let sink = Arc::new(MemorySink::new());
        let shared = shared_with(
            Arc::new(FlakyDetector {
                calls: AtomicU64::new(0),
            }),
            Arc::clone(&sink) as Arc<dyn OverlaySink>,
        );

        submit_frame(&shared, test_frame(), 1);
        assert_eq!(sink.publish_count(), 1);
        let before = sink.latest().expect("first overlay");

        submit_frame(&shared, test_frame(), 2);
        assert_eq!(sink.publish_count(), 1);
        assert_eq!(sink.latest().expect("overlay").as_raw(), before.as_raw());
    }

    #[test]
    fn stale_responses_are_discarded() {
        let sink = Arc::new(MemorySink::new());
        let shared = shared_with(
            Arc::new(CountingDetector::new(vec![person()])),
            Arc::clone(&sink) as Arc<dyn OverlaySink>,
        );

        // Response for tick 2 lands first; tick 1's late response must not
        // overwrite it.
        submit_frame(&shared, test_frame(), 2);
        submit_frame(&shared, test_frame(), 1);

        assert_eq!(sink.publish_count(), 1);
    }

    /// Stalls the first publish until released, so tests can hold an older
    /// worker inside the apply step while a newer response races past it.
    struct StallFirstSink {
        inner: MemorySink,
        first: AtomicBool,
        entered: std::sync::Barrier,
        release: std::sync::Barrier,
    }

    impl StallFirstSink {
        fn new() -> Self {
            Self {
                inner: MemorySink::new(),
                first: AtomicBool::new(false),
                entered: std::sync::Barrier::new(2),
                release: std::sync::Barrier::new(2),
            }
        }
    }

    impl OverlaySink for StallFirstSink {
        fn publish(&self, canvas: &image::RgbImage) -> Result<()> {
            if !self.first.swap(true, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.publish(canvas)
        }
    }

    fn gray_frame(fill: u8) -> Frame {
        Frame::from_rgb(vec![fill; 16 * 16 * 3], 16, 16).expect("frame")
    }

    #[test]
    fn stalled_older_response_cannot_overwrite_newer_overlay() {
        let sink = Arc::new(StallFirstSink::new());
        let shared = Arc::new(shared_with(
            Arc::new(CountingDetector::new(vec![])),
            Arc::clone(&sink) as Arc<dyn OverlaySink>,
        ));

        // Older response: enters the apply step first and stalls mid-publish.
        let older = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || submit_frame(&shared, gray_frame(10), 1))
        };
        sink.entered.wait();

        // Newer response races in while the older worker is stalled.
        let newer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || submit_frame(&shared, gray_frame(200), 2))
        };
        thread::sleep(Duration::from_millis(50));
        sink.release.wait();

        older.join().expect("older worker");
        newer.join().expect("newer worker");

        // The newer canvas must win regardless of how the workers interleave.
        let canvas = sink.inner.latest().expect("published canvas");
        assert_eq!(canvas.get_pixel(0, 0).0, [200, 200, 200]);
        assert_eq!(sink.inner.publish_count(), 2);
    }
}
