// THEORY:
// The `RectangleScanner` is the Scanning capability: while no target has been
// picked, every frame goes through it. It does not detect anything itself; it
// hands the frame to a `Detector` and arranges for the result to be applied
// on the presentation context when it arrives.
//
// Frame intake is synchronous and cheap (post a status message, start the
// detection). Everything after that is asynchronous. The number of detections
// in flight is capped; a frame that arrives while the detector is saturated is
// skipped rather than queued. Detections are never cancelled and carry no
// sequence number, so if two complete out of order the later completion
// overwrites the earlier one.

use crate::core_modules::dispatch::FrameBuffer;
use crate::core_modules::error::DetectionError;
use crate::core_modules::overlay::Observation;
use crate::core_modules::presentation::PresentationHandle;
use crate::pipeline::ScannerConfig;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// The quadrilateral detection collaborator.
pub trait Detector: Send + Sync {
    /// Finds document-like quadrilaterals in one frame, in DetectorNormalized space.
    fn detect(
        &self,
        frame: Arc<FrameBuffer>,
    ) -> BoxFuture<'static, Result<Vec<Observation>, DetectionError>>;
}

/// A detector paired with the presentation context its results are applied on.
///
/// Clones share one in-flight budget, so the scanner and the tracker together
/// never run more than `max_in_flight` detections.
#[derive(Clone)]
pub struct DetectionSource {
    detector: Arc<dyn Detector>,
    presenter: PresentationHandle,
    in_flight: Arc<Semaphore>,
}

impl DetectionSource {
    pub fn new(
        detector: Arc<dyn Detector>,
        presenter: PresentationHandle,
        max_in_flight: usize,
    ) -> Self {
        Self {
            detector,
            presenter,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn presenter(&self) -> &PresentationHandle {
        &self.presenter
    }

    /// Starts a detection on `frame`. Observations go to `on_observations`,
    /// failures straight to the overlay message.
    ///
    /// Returns `None` without touching the detector when the in-flight budget is used up.
    pub fn spawn<F>(&self, frame: Arc<FrameBuffer>, on_observations: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Vec<Observation>, &PresentationHandle) + Send + 'static,
    {
        let frame_id = frame.frame_id;
        let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            debug!(frame_id, "detector busy, frame skipped");
            return None;
        };

        let detection = self.detector.detect(frame);
        let presenter = self.presenter.clone();
        Some(tokio::spawn(async move {
            let result = detection.await;
            drop(permit);
            match result {
                Ok(observations) => {
                    debug!(frame_id, count = observations.len(), "detection complete");
                    on_observations(observations, &presenter);
                }
                Err(error) => {
                    if presenter
                        .invoke(move |screen, _| screen.apply_detection_error(&error))
                        .is_err()
                    {
                        debug!(frame_id, "detection failed after presentation shut down");
                    }
                }
            }
        }))
    }
}

pub struct RectangleScanner {
    source: DetectionSource,
    max_observations: usize,
    scanning_message: String,
}

impl RectangleScanner {
    pub fn new(source: DetectionSource, config: &ScannerConfig) -> Self {
        Self {
            source,
            max_observations: config.max_observations,
            scanning_message: config.scanning_message.clone(),
        }
    }

    /// Posts the scanning status and starts a detection on `frame`. Never waits for the result.
    /// Returns `None` when the frame was skipped because the detector is saturated.
    pub fn on_frame_captured(&self, frame: Arc<FrameBuffer>) -> Option<JoinHandle<()>> {
        let message = self.scanning_message.clone();
        if self
            .source
            .presenter()
            .invoke(move |screen, _| screen.overlay.set_message(message))
            .is_err()
        {
            debug!(frame_id = frame.frame_id, "presentation closed, status not posted");
        }

        let max_observations = self.max_observations;
        self.source.spawn(frame, move |mut observations, presenter: &PresentationHandle| {
            observations.truncate(max_observations);
            if presenter
                .invoke(move |screen, _| screen.apply_observations(observations))
                .is_err()
            {
                debug!("detection finished after presentation shut down");
            }
        })
    }
}
