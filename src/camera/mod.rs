//! Camera capture module
//!
//! Provides cross-platform camera capture using the nokhwa crate.
//! Frames are captured on a background thread; the latest decoded RGBA
//! frame is published for the render thread and the gesture tracker to
//! sample at their own pace.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use thiserror::Error;

/// Errors raised while acquiring the camera.
///
/// These are recoverable from the caller's point of view: the pipeline stays
/// uninitialized and the user may retry with another device.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("failed to open camera {index}: {source}")]
    Open {
        index: u32,
        source: nokhwa::NokhwaError,
    },
    #[error("failed to start camera stream: {0}")]
    Stream(nokhwa::NokhwaError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
    #[error("capture thread exited before the camera was ready")]
    ThreadExited,
}

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Monotonic frame number
    pub frame_number: u64,
    /// Capture timestamp
    pub timestamp: Instant,
}

/// Read side of a live frame source.
///
/// The capture device writes frames; everything else (render loop, gesture
/// tracker, tests) reads through this trait. `dimensions` reports the
/// intrinsic decoded resolution and is `None` until at least one frame has
/// been decoded, which doubles as the "can produce a frame" readiness signal.
pub trait FrameFeed: Send + Sync {
    /// Whether the source is still delivering frames.
    fn is_active(&self) -> bool;
    /// Intrinsic pixel dimensions of the decoded stream, once known.
    fn dimensions(&self) -> Option<(u32, u32)>;
    /// The most recent decoded frame, if any.
    fn latest_frame(&self) -> Option<CameraFrame>;
}

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Camera capture interface
///
/// Owns the capture thread. Shared behind an `Arc` so the tracker can poll
/// `latest_frame` independently of the render loop.
pub struct CameraCapture {
    /// Latest captured frames - triple buffered
    frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
    /// Write counter; the slot of the newest complete frame is (count - 1) % 3
    writes: Arc<AtomicU64>,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle, taken on stop
    thread_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Total decoded frames
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        let mut cameras = Vec::new();

        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(camera_list) => {
                for (idx, info) in camera_list.iter().enumerate() {
                    cameras.push(CameraInfo {
                        index: idx as u32,
                        name: info.human_name().to_string(),
                    });
                }
            }
            Err(e) => {
                log::warn!("Failed to enumerate cameras: {:?}", e);
            }
        }

        cameras
    }

    /// Open a camera and start capturing.
    ///
    /// The device is opened on the capture thread (some backends are not
    /// Send), but acquisition failures - permission denied, device missing,
    /// stream refused - are reported back to the caller before this returns.
    pub fn open(camera_index: u32) -> Result<Self, CameraError> {
        let frames: [Arc<Mutex<Option<CameraFrame>>>; 3] = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let writes = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), CameraError>>(1);

        let frames_clone = frames.clone();
        let writes_clone = writes.clone();
        let running_clone = running.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                let mut camera = match Self::open_device(camera_index) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = camera.open_stream() {
                    let _ = ready_tx.send(Err(CameraError::Stream(e)));
                    return;
                }

                log::info!(
                    "Camera opened: {} ({}x{})",
                    camera.info().human_name(),
                    camera.resolution().width(),
                    camera.resolution().height()
                );
                let _ = ready_tx.send(Ok(()));

                Self::capture_loop(
                    camera,
                    frames_clone,
                    writes_clone,
                    running_clone,
                    frame_count_clone,
                );
            })
            .map_err(CameraError::Spawn)?;

        let capture = Self {
            frames,
            writes,
            running,
            thread_handle: Mutex::new(Some(thread_handle)),
            frame_count,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(capture),
            Ok(Err(e)) => {
                capture.stop();
                Err(e)
            }
            Err(_) => {
                capture.stop();
                Err(CameraError::ThreadExited)
            }
        }
    }

    /// Open the device, walking down from the highest supported resolution.
    fn open_device(camera_index: u32) -> Result<Camera, CameraError> {
        let index = CameraIndex::Index(camera_index);

        let requested =
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);

        match Camera::new(index.clone(), requested) {
            Ok(c) => Ok(c),
            Err(e) => {
                log::warn!("Failed to open camera with highest resolution: {:?}", e);

                let requested2 = RequestedFormat::new::<RgbAFormat>(
                    RequestedFormatType::HighestResolution(nokhwa::utils::Resolution::new(
                        640, 480,
                    )),
                );

                match Camera::new(index.clone(), requested2) {
                    Ok(c) => Ok(c),
                    Err(e2) => {
                        log::warn!("Failed with HighestResolution: {:?}", e2);

                        // Last resort: let the backend pick the format
                        let requested3 =
                            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
                        Camera::new(index, requested3).map_err(|source| CameraError::Open {
                            index: camera_index,
                            source,
                        })
                    }
                }
            }
        }
    }

    /// Camera capture loop, runs until `running` is cleared
    fn capture_loop(
        mut camera: Camera,
        frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
        writes: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);
                        let write_idx = writes.load(Ordering::Relaxed);

                        let camera_frame = CameraFrame {
                            width: frame.resolution().width(),
                            height: frame.resolution().height(),
                            data: image.into_raw(),
                            frame_number: frame_num,
                            timestamp: Instant::now(),
                        };

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(camera_frame);

                        // Publish after the slot is fully written
                        writes.store(write_idx.wrapping_add(1), Ordering::Release);
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop camera stream: {:?}", e);
        }
        log::info!("Camera capture thread stopped");
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing. Safe to call more than once.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl FrameFeed for CameraCapture {
    fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.latest_frame().map(|f| (f.width, f.height))
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        let writes = self.writes.load(Ordering::Acquire);
        if writes == 0 {
            return None;
        }
        let slot = ((writes - 1) % 3) as usize;
        self.frames[slot].lock().clone()
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
