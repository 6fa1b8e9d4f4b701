//! Hand tracking
//!
//! Runs hand-landmark inference against the live frame feed on a fixed
//! wall-clock cadence, decoupled from render and camera timing, and
//! publishes the latest result as an immutable snapshot. The detector is
//! consumed as a black box behind the [`HandDetector`] trait; the bundled
//! ONNX implementation lives in [`onnx`].

pub mod mapper;
pub mod onnx;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::camera::{CameraFrame, FrameFeed};

/// Landmarks per detected hand (MediaPipe hand topology)
pub const LANDMARKS_PER_HAND: usize = 21;

/// Landmark index of the wrist
pub const WRIST: usize = 0;

/// Detection cadence. Faster than typical camera delivery on purpose; the
/// per-cycle readiness checks make the extra ticks cheap no-ops.
pub const DETECTION_INTERVAL: Duration = Duration::from_millis(16);

/// A single tracked point, normalized image coordinates
///
/// `x` and `y` are in `[0, 1]` with the origin at the top-left of the source
/// frame; `z` is relative depth.
#[derive(Clone, Copy, Debug, Default)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Left/right classification of a detected hand
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// One detected hand
#[derive(Clone, Debug)]
pub struct Hand {
    /// 21 landmarks, index 0 = wrist
    pub landmarks: [LandmarkPoint; LANDMARKS_PER_HAND],
    pub handedness: Handedness,
    pub confidence: f32,
}

impl Default for Hand {
    fn default() -> Self {
        Self {
            landmarks: [LandmarkPoint::default(); LANDMARKS_PER_HAND],
            handedness: Handedness::Right,
            confidence: 0.0,
        }
    }
}

/// Result of one detection cycle. Immutable once published.
#[derive(Clone, Debug, Default)]
pub struct HandDetectionResult {
    /// Detected hands, possibly empty
    pub hands: Vec<Hand>,
}

impl HandDetectionResult {
    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }
}

/// Errors from the hand detector
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("hand landmark model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("unexpected model output: {0}")]
    Output(String),
}

/// Black-box hand landmark detector.
///
/// `detect` takes the latest decoded frame and a timestamp and returns the
/// hands found in it. Implementations need not be re-entrant: the tracker
/// guarantees calls are serialized.
pub trait HandDetector: Send {
    fn detect(
        &mut self,
        frame: &CameraFrame,
        timestamp_ms: f64,
    ) -> Result<HandDetectionResult, DetectorError>;
}

/// Hand tracker
///
/// Owns the detector and a worker thread that runs one detection cycle per
/// tick. Cycles that find the feed not ready are silent no-ops; detector
/// faults are logged and do not stop the loop. Results are published
/// wholesale as `Arc` snapshots, so readers always observe a complete result.
pub struct HandTracker {
    latest: Arc<Mutex<Arc<HandDetectionResult>>>,
    /// Bumped once per published result
    generation: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl HandTracker {
    /// Start tracking against the given feed.
    pub fn start(
        feed: Arc<dyn FrameFeed>,
        detector: Box<dyn HandDetector>,
    ) -> Result<Self, std::io::Error> {
        let latest = Arc::new(Mutex::new(Arc::new(HandDetectionResult::default())));
        let generation = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let latest_clone = latest.clone();
        let generation_clone = generation.clone();
        let running_clone = running.clone();

        let thread_handle = std::thread::Builder::new()
            .name("hand-tracker".to_string())
            .spawn(move || {
                Self::worker_loop(feed, detector, latest_clone, generation_clone, running_clone);
            })?;

        Ok(Self {
            latest,
            generation,
            running,
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }

    /// Worker loop: one detection cycle per tick, never overlapping.
    ///
    /// A single thread consumes the tick channel, so cycles serialize by
    /// construction; the channel holds at most one pending tick, so a slow
    /// inference coalesces the ticks it missed instead of queueing them.
    fn worker_loop(
        feed: Arc<dyn FrameFeed>,
        mut detector: Box<dyn HandDetector>,
        latest: Arc<Mutex<Arc<HandDetectionResult>>>,
        generation: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
    ) {
        log::info!("Hand tracker started");
        let started = Instant::now();
        let ticker = crossbeam_channel::tick(DETECTION_INTERVAL);

        while running.load(Ordering::Acquire) {
            // Bounded wait so stop() stays prompt
            match ticker.recv_timeout(DETECTION_INTERVAL) {
                Ok(_) => {}
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
            if !running.load(Ordering::Acquire) {
                break;
            }

            Self::run_cycle(&*feed, &mut *detector, &started, &latest, &generation);
        }

        // Detector dropped here, releasing the model session
        log::info!("Hand tracker stopped");
    }

    /// One detection cycle. Transient not-ready states skip silently.
    fn run_cycle(
        feed: &dyn FrameFeed,
        detector: &mut dyn HandDetector,
        started: &Instant,
        latest: &Mutex<Arc<HandDetectionResult>>,
        generation: &AtomicU64,
    ) {
        if !feed.is_active() {
            return;
        }
        let Some((width, height)) = feed.dimensions() else {
            return;
        };
        if width == 0 || height == 0 {
            return;
        }
        let Some(frame) = feed.latest_frame() else {
            return;
        };

        let timestamp_ms = started.elapsed().as_secs_f64() * 1000.0;
        match detector.detect(&frame, timestamp_ms) {
            Ok(result) => {
                *latest.lock() = Arc::new(result);
                generation.fetch_add(1, Ordering::Release);
            }
            Err(e) => {
                // Non-fatal: skip this cycle, keep the loop alive
                log::warn!("Hand detection failed: {}", e);
            }
        }
    }

    /// The most recently published result. Always a complete snapshot.
    pub fn latest_result(&self) -> Arc<HandDetectionResult> {
        self.latest.lock().clone()
    }

    /// Monotonic counter of published results
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether the worker is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the worker and release the detector. Safe to call more than once.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HandTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Frame feed stub with switchable readiness
    struct StubFeed {
        active: AtomicBool,
        frame: Mutex<Option<CameraFrame>>,
    }

    impl StubFeed {
        fn ready(width: u32, height: u32) -> Self {
            Self {
                active: AtomicBool::new(true),
                frame: Mutex::new(Some(CameraFrame {
                    data: vec![0; (width * height * 4) as usize],
                    width,
                    height,
                    frame_number: 1,
                    timestamp: Instant::now(),
                })),
            }
        }

        fn not_ready() -> Self {
            Self {
                active: AtomicBool::new(true),
                frame: Mutex::new(None),
            }
        }
    }

    impl FrameFeed for StubFeed {
        fn is_active(&self) -> bool {
            self.active.load(Ordering::Acquire)
        }
        fn dimensions(&self) -> Option<(u32, u32)> {
            self.frame.lock().as_ref().map(|f| (f.width, f.height))
        }
        fn latest_frame(&self) -> Option<CameraFrame> {
            self.frame.lock().clone()
        }
    }

    /// Shared instrumentation for the stub detector
    #[derive(Default)]
    struct DetectorProbe {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        dropped: AtomicBool,
    }

    struct StubDetector {
        probe: Arc<DetectorProbe>,
        hands: usize,
        /// Cycles that fail before detection starts succeeding
        fail_first: usize,
        delay: Duration,
    }

    impl StubDetector {
        fn new(probe: Arc<DetectorProbe>, hands: usize) -> Self {
            Self {
                probe,
                hands,
                fail_first: 0,
                delay: Duration::ZERO,
            }
        }
    }

    impl HandDetector for StubDetector {
        fn detect(
            &mut self,
            _frame: &CameraFrame,
            _timestamp_ms: f64,
        ) -> Result<HandDetectionResult, DetectorError> {
            let call = self.probe.calls.fetch_add(1, Ordering::SeqCst);
            let concurrent = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);

            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call < self.fail_first {
                return Err(DetectorError::Output("stub failure".to_string()));
            }
            Ok(HandDetectionResult {
                hands: vec![Hand::default(); self.hands],
            })
        }
    }

    impl Drop for StubDetector {
        fn drop(&mut self) {
            self.probe.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_publishes_results_when_feed_is_ready() {
        let probe = Arc::new(DetectorProbe::default());
        let feed = Arc::new(StubFeed::ready(640, 480));
        let tracker =
            HandTracker::start(feed, Box::new(StubDetector::new(probe.clone(), 1))).unwrap();

        assert!(wait_for(|| tracker.generation() > 0));
        assert_eq!(tracker.latest_result().hands.len(), 1);
        tracker.stop();
    }

    #[test]
    fn test_not_ready_feed_is_a_silent_noop() {
        let probe = Arc::new(DetectorProbe::default());
        let feed = Arc::new(StubFeed::not_ready());
        let tracker =
            HandTracker::start(feed, Box::new(StubDetector::new(probe.clone(), 1))).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.generation(), 0);
        assert!(tracker.latest_result().is_empty());
        assert!(tracker.is_running());
        tracker.stop();
    }

    #[test]
    fn test_detector_fault_keeps_tracker_alive() {
        let probe = Arc::new(DetectorProbe::default());
        let mut detector = StubDetector::new(probe.clone(), 1);
        detector.fail_first = 3;
        let feed = Arc::new(StubFeed::ready(640, 480));
        let tracker = HandTracker::start(feed, Box::new(detector)).unwrap();

        // Early cycles fail; later cycles still publish
        assert!(wait_for(|| tracker.generation() > 0));
        assert!(probe.calls.load(Ordering::SeqCst) > 3);
        assert!(tracker.is_running());
        tracker.stop();
    }

    #[test]
    fn test_slow_cycles_never_overlap() {
        let probe = Arc::new(DetectorProbe::default());
        let mut detector = StubDetector::new(probe.clone(), 0);
        // Each cycle spans several tick periods
        detector.delay = Duration::from_millis(60);
        let feed = Arc::new(StubFeed::ready(640, 480));
        let tracker = HandTracker::start(feed, Box::new(detector)).unwrap();

        assert!(wait_for(|| probe.calls.load(Ordering::SeqCst) >= 3));
        tracker.stop();
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_detector() {
        let probe = Arc::new(DetectorProbe::default());
        let feed = Arc::new(StubFeed::ready(640, 480));
        let tracker =
            HandTracker::start(feed, Box::new(StubDetector::new(probe.clone(), 1))).unwrap();

        tracker.stop();
        assert!(!tracker.is_running());
        assert!(probe.dropped.load(Ordering::SeqCst));

        // Second stop: no-op, no double-release fault
        tracker.stop();
        assert!(!tracker.is_running());
    }

    #[test]
    fn test_snapshot_is_replaced_wholesale() {
        let probe = Arc::new(DetectorProbe::default());
        let feed = Arc::new(StubFeed::ready(640, 480));
        let tracker =
            HandTracker::start(feed, Box::new(StubDetector::new(probe.clone(), 2))).unwrap();

        assert!(wait_for(|| tracker.generation() > 0));
        let before = tracker.latest_result();
        assert_eq!(before.hands.len(), 2);
        tracker.stop();

        // A snapshot taken earlier stays intact after later publishes
        assert_eq!(before.hands.len(), 2);
    }
}
