// THEORY:
// The `FrameDispatchLoop` sits on the camera's frame-delivery context. For each
// frame it does three cheap, synchronous things and then returns to wait for
// the next one:
//
// 1.  **Mode Check**: It looks at the mode published by the `ModeController`.
//     If the controller has just entered Tracking, the acquired observation is
//     handed to the tracking capability before this frame is forwarded.
// 2.  **Forward**: The frame goes to exactly one capability: the scanner in
//     Scanning mode, the tracker in Tracking mode. Both start their detection
//     asynchronously and return at once.
// 3.  **Preview**: The frame is posted to the presentation context as the new
//     preview thumbnail.
//
// Nothing here awaits a detection result. A slow detector means frames skip
// detection (they still reach the preview), never that work backs up.

use crate::core_modules::error::ScannerError;
use crate::core_modules::mode::{Mode, ModeState};
use crate::core_modules::presentation::PresentationHandle;
use crate::core_modules::scanner::RectangleScanner;
use crate::core_modules::tracker::TrackingCapability;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One RGBA camera frame.
#[derive(Clone)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_id: u64,
    pub timestamp: Instant,
}

impl FrameBuffer {
    pub fn from_rgba(image: RgbaImage, frame_id: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            frame_id,
            timestamp: Instant::now(),
        }
    }

    /// An all-black frame.
    pub fn blank(frame_id: u64, width: u32, height: u32) -> Self {
        Self::from_rgba(RgbaImage::new(width, height), frame_id)
    }

    /// The frame as an image, or `None` if the buffer does not match its dimensions.
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("frame_id", &self.frame_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub struct FrameDispatchLoop {
    scanner: RectangleScanner,
    tracker: Box<dyn TrackingCapability>,
    mode_rx: watch::Receiver<ModeState>,
    presenter: PresentationHandle,
    mode: Mode,
}

impl FrameDispatchLoop {
    pub fn new(
        scanner: RectangleScanner,
        tracker: Box<dyn TrackingCapability>,
        mode_rx: watch::Receiver<ModeState>,
        presenter: PresentationHandle,
    ) -> Self {
        Self {
            scanner,
            tracker,
            mode_rx,
            presenter,
            mode: Mode::Scanning,
        }
    }

    /// The mode the last frame was dispatched under.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn sync_mode(&mut self) {
        if !self.mode_rx.has_changed().unwrap_or(false) {
            return;
        }
        let state = self.mode_rx.borrow_and_update().clone();
        if let (Mode::Tracking, Some(target)) = (state.mode, state.target.as_ref()) {
            self.tracker.acquire(target);
        }
        info!(mode = ?state.mode, "frame routing changed");
        self.mode = state.mode;
    }

    /// Routes one frame. Returns the handle of the detection it started, if any.
    pub fn dispatch(&mut self, frame: FrameBuffer) -> Result<Option<JoinHandle<()>>, ScannerError> {
        self.sync_mode();

        let frame = Arc::new(frame);
        debug!(frame_id = frame.frame_id, mode = ?self.mode, "dispatching frame");
        let work = match self.mode {
            Mode::Scanning => self.scanner.on_frame_captured(Arc::clone(&frame)),
            Mode::Tracking => self.tracker.on_frame_captured(Arc::clone(&frame)),
        };

        self.presenter.invoke(move |screen, _| screen.preview = Some(frame))?;
        Ok(work)
    }

    /// Consumes frames until the camera side closes the channel or the presentation
    /// context shuts down.
    pub async fn run(mut self, mut frames: mpsc::Receiver<FrameBuffer>) {
        while let Some(frame) = frames.recv().await {
            if let Err(error) = self.dispatch(frame) {
                info!(%error, "frame dispatch stopped");
                break;
            }
        }
        debug!("frame dispatch loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::geometry::{CoordinateSpace, Point};
    use crate::core_modules::overlay::Observation;
    use crate::core_modules::scanner::DetectionSource;
    use crate::core_modules::scanner::tests::{ScriptedDetector, page_at, spawn_screen};
    use crate::pipeline::ScannerConfig;
    use std::sync::Mutex;

    /// Records what it was given instead of tracking anything.
    #[derive(Default)]
    struct RecordingTracker {
        acquired: Arc<Mutex<Vec<Observation>>>,
        frames: Arc<Mutex<Vec<u64>>>,
    }

    impl TrackingCapability for RecordingTracker {
        fn acquire(&mut self, observation: &Observation) {
            self.acquired.lock().unwrap().push(observation.clone());
        }

        fn on_frame_captured(&mut self, frame: Arc<FrameBuffer>) -> Option<JoinHandle<()>> {
            self.frames.lock().unwrap().push(frame.frame_id);
            None
        }
    }

    async fn dispatcher(
        presenter: &PresentationHandle,
        tracker: RecordingTracker,
    ) -> FrameDispatchLoop {
        let config = ScannerConfig::default();
        let detector = Arc::new(ScriptedDetector::new(vec![Ok(vec![page_at(0.3, 0.3)])]));
        let source =
            DetectionSource::new(detector, presenter.clone(), config.max_in_flight_detections);
        let scanner = RectangleScanner::new(source, &config);
        let mode_rx = presenter
            .query(|s, _| s.mode.subscribe())
            .await
            .expect("subscribe");
        FrameDispatchLoop::new(scanner, Box::new(tracker), mode_rx, presenter.clone())
    }

    #[test]
    fn frame_buffer_round_trips_through_image() {
        let frame = FrameBuffer::blank(7, 3, 2);
        assert_eq!(frame.data.len(), 3 * 2 * 4);
        let image = frame.to_rgba_image().expect("image");
        assert_eq!(image.dimensions(), (3, 2));

        let broken = FrameBuffer {
            data: vec![0; 5],
            ..frame
        };
        assert!(broken.to_rgba_image().is_none());
    }

    #[tokio::test]
    async fn scanning_frames_go_to_scanner_and_preview() {
        let (presenter, _actor) = spawn_screen(None);
        let tracker = RecordingTracker::default();
        let frames = Arc::clone(&tracker.frames);
        let mut d = dispatcher(&presenter, tracker).await;

        let work = d.dispatch(FrameBuffer::blank(1, 4, 4)).expect("dispatch");
        work.expect("scanner work").await.expect("join");

        let (quads, preview) = presenter
            .query(|s, _| (s.overlay.quads().len(), s.preview.as_ref().map(|f| f.frame_id)))
            .await
            .expect("query");
        assert_eq!(quads, 1);
        assert_eq!(preview, Some(1));
        assert!(frames.lock().unwrap().is_empty());
        assert_eq!(d.mode(), Mode::Scanning);
    }

    #[tokio::test]
    async fn acquisition_switches_routing_and_calls_acquire_once() {
        let (presenter, _actor) = spawn_screen(None);
        let tracker = RecordingTracker::default();
        let acquired = Arc::clone(&tracker.acquired);
        let frames = Arc::clone(&tracker.frames);
        let mut d = dispatcher(&presenter, tracker).await;

        d.dispatch(FrameBuffer::blank(1, 4, 4))
            .expect("dispatch")
            .expect("scanner work")
            .await
            .expect("join");

        // page_at(0.3, 0.3) spans detector y 0.3..0.7, display y 0.3..0.7 after the flip.
        presenter
            .query(|s, _| s.touch(Point::new(0.5, 0.5), CoordinateSpace::DisplayNormalized))
            .await
            .expect("touch");

        for id in 2..5 {
            assert!(d.dispatch(FrameBuffer::blank(id, 4, 4)).expect("dispatch").is_none());
        }

        assert_eq!(d.mode(), Mode::Tracking);
        assert_eq!(acquired.lock().unwrap().len(), 1);
        assert_eq!(*frames.lock().unwrap(), vec![2, 3, 4]);

        presenter.query(|s, _| s.reset()).await.expect("reset");
        let work = d.dispatch(FrameBuffer::blank(5, 4, 4)).expect("dispatch");
        assert!(work.is_some());
        assert_eq!(d.mode(), Mode::Scanning);
        assert_eq!(frames.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let (presenter, _actor) = spawn_screen(None);
        let tracker = RecordingTracker::default();
        let d = dispatcher(&presenter, tracker).await;
        let (tx, rx) = mpsc::channel(4);

        let task = tokio::spawn(d.run(rx));
        for id in 0..3 {
            tx.send(FrameBuffer::blank(id, 4, 4)).await.expect("send");
        }
        drop(tx);
        task.await.expect("dispatch loop");

        let preview = presenter
            .query(|s, _| s.preview.as_ref().map(|f| f.frame_id))
            .await
            .expect("query");
        assert_eq!(preview, Some(2));
    }
}
