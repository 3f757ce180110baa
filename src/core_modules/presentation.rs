// THEORY:
// The presentation context is the one place where UI-visible state lives and
// changes. It is an actor: a single tokio task owns the `Screen` and applies
// closures sent to it over an unbounded channel, one at a time, in the order
// they were sent.
//
// Key architectural principles:
// 1.  **Single Writer**: The overlay, the mode controller, the crop rectangle
//     and the captured image are all fields of `Screen`. Only the actor task
//     touches them, so no locks are needed anywhere.
// 2.  **Never Block the Producer**: `invoke` pushes onto an unbounded channel
//     and returns immediately. The camera thread and the detection tasks fire
//     their updates and move on.
// 3.  **Last Writer Wins**: Updates are applied in arrival order. A detection
//     that finishes late simply overwrites whatever an earlier one wrote.
// 4.  **Self Scheduling**: A closure receives a handle back to the actor so it
//     can start asynchronous work (a photo capture) whose completion is again
//     dispatched here. The actor keeps only a weak sender, so dropping every
//     external handle shuts it down once the queue is drained.

use crate::core_modules::capture::CaptureCoordinator;
use crate::core_modules::dispatch::FrameBuffer;
use crate::core_modules::error::{CaptureError, DetectionError, ScannerError};
use crate::core_modules::geometry::{CoordinateSpace, Point};
use crate::core_modules::mode::{ModeController, Transition};
use crate::core_modules::overlay::{Observation, OverlayModel};
use crate::core_modules::transform::CoordinateTransform;
use image::DynamicImage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type UiTask = Box<dyn FnOnce(&mut Screen, &PresentationHandle) + Send>;

/// Everything the rendering surface can see.
pub struct Screen {
    pub overlay: OverlayModel,
    pub mode: ModeController,
    pub capture: CaptureCoordinator,
    /// The most recent camera frame, for the preview thumbnail.
    pub preview: Option<Arc<FrameBuffer>>,
    transform: CoordinateTransform,
}

impl Screen {
    pub fn new(
        overlay: OverlayModel,
        mode: ModeController,
        capture: CaptureCoordinator,
        transform: CoordinateTransform,
    ) -> Self {
        Self {
            overlay,
            mode,
            capture,
            preview: None,
            transform,
        }
    }

    /// Replaces the overlay contents with one detection's results.
    ///
    /// Every observation is drawn. Each one with a computable crop rectangle
    /// overwrites the stored one, so the last in iteration order wins. No
    /// observations means the overlay is emptied and the crop is left alone.
    pub fn apply_observations(&mut self, observations: Vec<Observation>) {
        self.overlay.clear();
        let sensor = self.capture.sensor_dimensions();
        for observation in observations {
            let projection = self.transform.project(&observation.quad, sensor);
            self.overlay.add_quad(projection.display);
            if let Some(crop) = projection.crop {
                self.capture.set_crop_rectangle(crop);
            }
            self.overlay.add_observation(observation);
        }
    }

    pub fn apply_detection_error(&mut self, error: &DetectionError) {
        warn!(%error, "detection failed");
        self.overlay.set_message(error.to_string());
    }

    /// Finishes a photo capture: the processed image on success, a status message on failure.
    pub fn apply_capture(&mut self, photo: Result<DynamicImage, CaptureError>) {
        if let Err(error) = self.capture.complete_capture(photo) {
            warn!(%error, "capture failed");
            self.overlay.set_message(error.to_string());
        }
    }

    pub fn touch(&mut self, point: Point, space: CoordinateSpace) -> Transition {
        self.mode.on_touch(&mut self.overlay, point, space)
    }

    pub fn reset(&mut self) -> Transition {
        self.mode.reset(&mut self.overlay)
    }
}

/// Cloneable entry point into the presentation actor.
#[derive(Clone)]
pub struct PresentationHandle {
    tx: mpsc::UnboundedSender<UiTask>,
}

impl PresentationHandle {
    /// Starts the actor. The join handle yields the final `Screen` once every handle is dropped.
    pub fn spawn(screen: Screen) -> (Self, JoinHandle<Screen>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<UiTask>();
        let weak = tx.downgrade();

        let actor = tokio::spawn(async move {
            let mut screen = screen;
            while let Some(task) = rx.recv().await {
                // Updates queued before the last handle went away still land. Work they
                // try to schedule from here on is refused with `PresentationClosed`.
                let handle = match weak.upgrade() {
                    Some(tx) => PresentationHandle { tx },
                    None => {
                        debug!("presentation handles dropped, draining queued update");
                        PresentationHandle::closed()
                    }
                };
                task(&mut screen, &handle);
            }
            screen
        });

        (Self { tx }, actor)
    }

    /// A handle whose actor is gone. Every `invoke` on it fails.
    fn closed() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Queues `f` to run on the presentation context and returns immediately.
    pub fn invoke<F>(&self, f: F) -> Result<(), ScannerError>
    where
        F: FnOnce(&mut Screen, &PresentationHandle) + Send + 'static,
    {
        self.tx
            .send(Box::new(f))
            .map_err(|_| ScannerError::PresentationClosed)
    }

    /// Runs `f` on the presentation context and waits for its result.
    /// Everything queued before it has been applied by the time it runs.
    pub async fn query<R, F>(&self, f: F) -> Result<R, ScannerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Screen, &PresentationHandle) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.invoke(move |screen, handle| {
            let _ = reply_tx.send(f(screen, handle));
        })?;
        reply_rx.await.map_err(|_| ScannerError::PresentationClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::capture::tests::FakeCamera;
    use crate::core_modules::geometry::Quadrilateral;
    use crate::core_modules::transform::SensorDimensions;
    use crate::pipeline::ScannerConfig;

    fn screen(sensor: Option<SensorDimensions>) -> Screen {
        let config = ScannerConfig::default();
        let camera = Arc::new(FakeCamera::new(sensor, 64, 32));
        Screen::new(
            OverlayModel::new(config.viewport),
            ModeController::new(config.acquired_message.clone(), config.reset_message.clone()),
            CaptureCoordinator::new(camera, &config),
            CoordinateTransform::new(&config),
        )
    }

    fn page(x0: f64) -> Observation {
        Observation::new(Quadrilateral::new(
            Point::new(x0, 0.3),
            Point::new(x0 + 0.5, 0.3),
            Point::new(x0 + 0.5, 0.7),
            Point::new(x0, 0.7),
        ))
    }

    #[test]
    fn observations_replace_overlay_and_crop() {
        let mut s = screen(Some(SensorDimensions::new(1080, 1920)));
        s.apply_observations(vec![page(0.1)]);
        let first = s.capture.crop_rectangle().expect("crop");

        s.apply_observations(vec![page(0.2), page(0.3)]);
        assert_eq!(s.overlay.quads().len(), 2);
        assert_eq!(s.overlay.observations().len(), 2);
        let last = s.capture.crop_rectangle().expect("crop");
        assert_ne!(first, last);
        // Top-left x of the last page: 0.3 * 1920 minus the 1.3 * 67.2 margin.
        assert!((last.x - (0.3 * 1920.0 - 1.3 * 67.2)).abs() < 1e-6);
    }

    #[test]
    fn empty_detection_keeps_previous_crop() {
        let mut s = screen(Some(SensorDimensions::new(1080, 1920)));
        s.apply_observations(vec![page(0.1)]);
        let before = s.capture.crop_rectangle();

        s.apply_observations(Vec::new());

        assert!(s.overlay.quads().is_empty());
        assert_eq!(s.capture.crop_rectangle(), before);
    }

    #[test]
    fn unknown_sensor_draws_but_skips_crop() {
        let mut s = screen(None);
        s.apply_observations(vec![page(0.1)]);
        assert_eq!(s.overlay.quads().len(), 1);
        assert!(s.capture.crop_rectangle().is_none());
    }

    #[test]
    fn detection_error_becomes_message() {
        let mut s = screen(None);
        s.apply_detection_error(&DetectionError::Failed("vision offline".into()));
        assert_eq!(s.overlay.message(), "detector failed: vision offline");
    }

    #[tokio::test]
    async fn updates_apply_in_order() {
        let (handle, actor) = PresentationHandle::spawn(screen(None));
        for i in 0..5 {
            handle
                .invoke(move |s, _| s.overlay.set_message(format!("update {i}")))
                .expect("invoke");
        }
        let message = handle
            .query(|s, _| s.overlay.message().to_string())
            .await
            .expect("query");
        assert_eq!(message, "update 4");

        drop(handle);
        let final_screen = actor.await.expect("actor");
        assert_eq!(final_screen.overlay.message(), "update 4");
    }

    #[tokio::test]
    async fn queued_updates_survive_last_handle_drop() {
        let (handle, actor) = PresentationHandle::spawn(screen(None));
        handle
            .invoke(|s, presenter| {
                let refused = presenter
                    .invoke(|s, _| s.overlay.set_message("late"))
                    .is_err();
                s.overlay.set_message(if refused { "refused" } else { "accepted" });
            })
            .expect("invoke");
        handle
            .invoke(|s, _| s.apply_observations(vec![page(0.1)]))
            .expect("invoke");
        drop(handle);

        let final_screen = actor.await.expect("actor");
        assert_eq!(final_screen.overlay.quads().len(), 1);
        assert_eq!(final_screen.overlay.message(), "refused");
    }
}
