// THEORY:
// The `pipeline` module is the top-level API of the scanner. It wires the
// three execution contexts together and hands the caller a small set of
// entry points that mirror what a camera screen can do:
//
//   - deliver a camera frame          -> frame-delivery context
//   - touch the overlay, press reset  -> presentation context
//   - press capture, dismiss result   -> presentation context
//   - read what should be on screen   -> presentation context (snapshot)
//
// The detector, the camera and (optionally) the tracker are injected. Every
// tuned constant lives in `ScannerConfig`.

use crate::core_modules::capture::{Camera, CaptureCoordinator};
use crate::core_modules::dispatch::{FrameBuffer, FrameDispatchLoop};
use crate::core_modules::error::ScannerError;
use crate::core_modules::mode::ModeController;
use crate::core_modules::overlay::OverlayModel;
use crate::core_modules::presentation::{PresentationHandle, Screen};
use crate::core_modules::scanner::{DetectionSource, Detector, RectangleScanner};
use crate::core_modules::tracker::{QuadTracker, TrackingCapability};
use crate::core_modules::transform::{CoordinateTransform, CropRectangle, Viewport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

// Re-export key data structures for the public API.
pub use crate::core_modules::geometry::{CoordinateSpace, Point, Quadrilateral, Rect};
pub use crate::core_modules::mode::{Mode, Transition};
pub use crate::core_modules::overlay::Observation;
pub use crate::core_modules::transform::SensorDimensions;

/// Frames waiting for the dispatch loop. Late frames beyond this are dropped.
const FRAME_QUEUE_DEPTH: usize = 2;

/// Tunable behaviour of the scanner. The geometric factors are hand-tuned
/// against a real document detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Logical size of the overlay, in points.
    pub viewport: Viewport,
    /// How far the top and bottom edges are pulled inward, in normalized units.
    pub shrink_factor: f64,
    /// Crop margin as a fraction of the (display-oriented) sensor size.
    pub margin_factor: f64,
    /// Crop origin moves left by this many horizontal margins.
    pub crop_origin_h_factor: f64,
    /// Crop origin moves down by this many vertical margins.
    pub crop_origin_v_factor: f64,
    /// Crop width grows by this many horizontal margins.
    pub crop_width_growth: f64,
    /// Crop height shrinks by this many vertical margins.
    pub crop_height_shrink: f64,
    /// Detector results past this count are ignored.
    pub max_observations: usize,
    /// Detections allowed to run at once. Frames arriving while all are busy skip detection.
    pub max_in_flight_detections: usize,
    /// Reject captures whose crop rectangle is older than this. Off when `None`.
    pub max_crop_age_ms: Option<u64>,
    /// Largest centroid jump, in normalized units, the tracker still accepts as the same page.
    pub tracking_distance_threshold: f64,
    /// Frames without a match before the tracker reports the target lost.
    pub tracking_max_frames_lost: u32,
    pub scanning_message: String,
    pub acquired_message: String,
    pub reset_message: String,
    pub lost_message: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            shrink_factor: 0.05,
            margin_factor: 0.035,
            crop_origin_h_factor: 1.3,
            crop_origin_v_factor: 0.5,
            crop_width_growth: 2.0,
            crop_height_shrink: 2.0,
            max_observations: 10,
            max_in_flight_detections: 1,
            max_crop_age_ms: None,
            tracking_distance_threshold: 0.25,
            tracking_max_frames_lost: 5,
            scanning_message: "Scanning...".to_string(),
            acquired_message: "Target acquired".to_string(),
            reset_message: "Scanning".to_string(),
            lost_message: "Target lost".to_string(),
        }
    }
}

impl ScannerConfig {
    /// Parses a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ScannerError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A copy of what the rendering surface should currently show.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenSnapshot {
    pub mode: Mode,
    pub message: String,
    /// DisplayNormalized quadrilaterals.
    pub quads: Vec<Quadrilateral>,
    pub reset_visible: bool,
    pub crop: Option<CropRectangle>,
    pub sensor: Option<SensorDimensions>,
    pub captured_visible: bool,
    pub captured_size: Option<(u32, u32)>,
    pub preview_frame_id: Option<u64>,
}

impl ScreenSnapshot {
    fn of(screen: &Screen) -> Self {
        Self {
            mode: screen.mode.mode(),
            message: screen.overlay.message().to_string(),
            quads: screen.overlay.quads().to_vec(),
            reset_visible: screen.mode.reset_visible(),
            crop: screen.capture.crop_rectangle(),
            sensor: screen.capture.sensor_dimensions(),
            captured_visible: screen.capture.captured_visible(),
            captured_size: screen.capture.captured_image().map(|img| img.dimensions()),
            preview_frame_id: screen.preview.as_ref().map(|f| f.frame_id),
        }
    }
}

/// The running scanner.
pub struct ScannerPipeline {
    presenter: PresentationHandle,
    frames_tx: mpsc::Sender<FrameBuffer>,
    dispatch_task: JoinHandle<()>,
    presentation_task: JoinHandle<Screen>,
}

impl ScannerPipeline {
    /// Starts the scanner with the built-in `QuadTracker`.
    pub fn start(
        config: ScannerConfig,
        detector: Arc<dyn Detector>,
        camera: Arc<dyn Camera>,
    ) -> Self {
        let tracker_config = config.clone();
        Self::start_with_tracker(config, detector, camera, move |source| {
            Box::new(QuadTracker::new(source, &tracker_config)) as Box<dyn TrackingCapability>
        })
    }

    /// Starts the scanner with a caller-supplied tracking capability.
    pub fn start_with_tracker<F>(
        config: ScannerConfig,
        detector: Arc<dyn Detector>,
        camera: Arc<dyn Camera>,
        make_tracker: F,
    ) -> Self
    where
        F: FnOnce(DetectionSource) -> Box<dyn TrackingCapability>,
    {
        let mode =
            ModeController::new(config.acquired_message.clone(), config.reset_message.clone());
        let mode_rx = mode.subscribe();
        let mut overlay = OverlayModel::new(config.viewport);
        overlay.set_message(config.scanning_message.clone());
        let capture = CaptureCoordinator::new(camera, &config);
        if let Some(sensor) = capture.sensor_dimensions() {
            info!(width = sensor.width, height = sensor.height, "camera format selected");
        }

        let screen = Screen::new(overlay, mode, capture, CoordinateTransform::new(&config));
        let (presenter, presentation_task) = PresentationHandle::spawn(screen);

        let source =
            DetectionSource::new(detector, presenter.clone(), config.max_in_flight_detections);
        let scanner = RectangleScanner::new(source.clone(), &config);
        let tracker = make_tracker(source);
        let dispatch = FrameDispatchLoop::new(scanner, tracker, mode_rx, presenter.clone());

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let dispatch_task = tokio::spawn(dispatch.run(frames_rx));

        Self {
            presenter,
            frames_tx,
            dispatch_task,
            presentation_task,
        }
    }

    /// Hands a frame to the dispatch loop without waiting. Returns `false` if it was dropped
    /// because the loop is still busy with earlier frames.
    pub fn deliver_frame(&self, frame: FrameBuffer) -> bool {
        match self.frames_tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                debug!(frame_id = frame.frame_id, "dropping late frame");
                false
            }
            Err(TrySendError::Closed(frame)) => {
                debug!(frame_id = frame.frame_id, "dispatch loop closed, frame dropped");
                false
            }
        }
    }

    /// A sender for a camera thread that prefers to own its end of the queue.
    pub fn frame_sender(&self) -> mpsc::Sender<FrameBuffer> {
        self.frames_tx.clone()
    }

    pub fn presenter(&self) -> &PresentationHandle {
        &self.presenter
    }

    /// A touch on the overlay, given in `space`.
    pub fn touch(&self, point: Point, space: CoordinateSpace) -> Result<(), ScannerError> {
        self.presenter.invoke(move |screen, _| {
            screen.touch(point, space);
        })
    }

    /// A touch in overlay points, as the touch surface reports it.
    pub fn touch_raw(&self, x: f64, y: f64) -> Result<(), ScannerError> {
        self.touch(Point::new(x, y), CoordinateSpace::DisplayPixel)
    }

    pub fn reset(&self) -> Result<(), ScannerError> {
        self.presenter.invoke(|screen, _| {
            screen.reset();
        })
    }

    pub fn capture(&self) -> Result<(), ScannerError> {
        self.presenter.invoke(|screen, presenter| {
            screen.capture.capture_image(presenter);
        })
    }

    pub fn dismiss_captured_image(&self) -> Result<(), ScannerError> {
        self.presenter.invoke(|screen, _| screen.capture.dismiss_captured_image())
    }

    pub async fn snapshot(&self) -> Result<ScreenSnapshot, ScannerError> {
        self.presenter.query(|screen, _| ScreenSnapshot::of(screen)).await
    }

    /// Stops frame intake and returns the final screen once all in-flight work has landed.
    pub async fn shutdown(self) -> Result<Screen, ScannerError> {
        let Self {
            presenter,
            frames_tx,
            dispatch_task,
            presentation_task,
        } = self;
        drop(frames_tx);
        let _ = dispatch_task.await;
        drop(presenter);
        presentation_task.await.map_err(|_| ScannerError::PresentationClosed)
    }
}
