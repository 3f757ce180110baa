// THEORY:
// The `tracker` module defines what the Tracking capability must do once the
// user has picked a page, and ships one implementation of it.
//
// The contract is small: `acquire` receives the observation the user touched,
// and `on_frame_captured` receives every frame while the scanner is in
// Tracking mode. How the target is followed is up to the implementation.
//
// `QuadTracker` follows the target the simple way:
// 1.  **Detection**: Each frame still goes through the detector.
// 2.  **Prediction**: The target's next centroid is its last centroid plus its
//     velocity (difference of the last two centroids).
// 3.  **Matching**: The detected quadrilateral whose centroid is nearest the
//     prediction, within a distance threshold, is the target in this frame.
//     Only that one is published to the overlay and the crop rectangle.
// 4.  **Loss**: After too many frames without a match the overlay is cleared
//     and the user is told. The mode does not change; only the reset control
//     leaves Tracking. A lost target stops running the detector until the next
//     `acquire`.

use crate::core_modules::dispatch::FrameBuffer;
use crate::core_modules::geometry::Point;
use crate::core_modules::overlay::Observation;
use crate::core_modules::presentation::PresentationHandle;
use crate::core_modules::scanner::DetectionSource;
use crate::pipeline::ScannerConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const POSITION_HISTORY_SIZE: usize = 10;

/// The Tracking capability contract.
pub trait TrackingCapability: Send {
    /// Starts following `observation`, replacing any previous target.
    fn acquire(&mut self, observation: &Observation);

    /// Feeds one frame. Returns the handle of any asynchronous work started.
    fn on_frame_captured(&mut self, frame: Arc<FrameBuffer>) -> Option<JoinHandle<()>>;
}

/// The state of the one object being followed.
#[derive(Debug, Clone)]
pub struct TrackedQuad {
    /// The most recent observation matched to the target.
    pub latest: Observation,
    /// Recent centroids in DetectorNormalized space.
    pub position_history: VecDeque<Point>,
    /// Centroid displacement per matched frame.
    pub velocity: (f64, f64),
    /// Number of frames the target has been matched in.
    pub age: u32,
    /// Consecutive frames without a match.
    pub frames_since_seen: u32,
}

impl TrackedQuad {
    /// True once the target has gone unmatched for more than `max_frames_lost` frames.
    pub fn is_lost(&self, max_frames_lost: u32) -> bool {
        self.frames_since_seen > max_frames_lost
    }

    fn new(observation: Observation) -> Self {
        let mut position_history = VecDeque::with_capacity(POSITION_HISTORY_SIZE);
        position_history.push_back(observation.quad.centroid());
        Self {
            latest: observation,
            position_history,
            velocity: (0.0, 0.0),
            age: 1,
            frames_since_seen: 0,
        }
    }

    fn update(&mut self, observation: Observation) {
        let centroid = observation.quad.centroid();
        self.latest = observation;
        self.position_history.push_back(centroid);
        if self.position_history.len() > POSITION_HISTORY_SIZE {
            self.position_history.pop_front();
        }

        let mut recent = self.position_history.iter().rev();
        if let (Some(new_pos), Some(old_pos)) = (recent.next(), recent.next()) {
            self.velocity = (new_pos.x - old_pos.x, new_pos.y - old_pos.y);
        }

        self.age += 1;
        self.frames_since_seen = 0;
    }

    pub fn predict_next_position(&self) -> Point {
        let current = self.latest.quad.centroid();
        Point::new(current.x + self.velocity.0, current.y + self.velocity.1)
    }

    /// Index of the observation nearest the predicted position, if within `max_distance`.
    fn best_match(&self, observations: &[Observation], max_distance: f64) -> Option<usize> {
        let predicted = self.predict_next_position();
        let mut best_dist = max_distance;
        let mut best_index = None;
        for (i, o) in observations.iter().enumerate() {
            let c = o.quad.centroid();
            let dist = ((predicted.x - c.x).powi(2) + (predicted.y - c.y).powi(2)).sqrt();
            if dist < best_dist {
                best_dist = dist;
                best_index = Some(i);
            }
        }
        best_index
    }
}

/// What one frame's detection did to the track.
#[derive(Debug, Clone, PartialEq)]
enum TrackStep {
    Matched(Observation),
    Missed,
    Lost,
}

/// Follows one acquired quadrilateral by predicted-centroid nearest neighbour.
pub struct QuadTracker {
    source: DetectionSource,
    track: Arc<Mutex<Option<TrackedQuad>>>,
    distance_threshold: f64,
    max_frames_lost: u32,
    lost_message: String,
}

impl QuadTracker {
    pub fn new(source: DetectionSource, config: &ScannerConfig) -> Self {
        Self {
            source,
            track: Arc::new(Mutex::new(None)),
            distance_threshold: config.tracking_distance_threshold,
            max_frames_lost: config.tracking_max_frames_lost,
            lost_message: config.lost_message.clone(),
        }
    }

    /// A copy of the current track, for inspection.
    pub fn track(&self) -> Option<TrackedQuad> {
        self.track.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn step(
        track: &Mutex<Option<TrackedQuad>>,
        observations: &[Observation],
        distance_threshold: f64,
        max_frames_lost: u32,
    ) -> Option<TrackStep> {
        let mut guard = track.lock().unwrap_or_else(PoisonError::into_inner);
        let tracked = guard.as_mut()?;
        match tracked.best_match(observations, distance_threshold) {
            Some(i) => {
                tracked.update(observations[i].clone());
                Some(TrackStep::Matched(observations[i].clone()))
            }
            None => {
                tracked.frames_since_seen = tracked.frames_since_seen.saturating_add(1);
                if tracked.frames_since_seen == max_frames_lost.saturating_add(1) {
                    Some(TrackStep::Lost)
                } else {
                    Some(TrackStep::Missed)
                }
            }
        }
    }
}

impl TrackingCapability for QuadTracker {
    fn acquire(&mut self, observation: &Observation) {
        info!(confidence = observation.confidence, "tracking acquired target");
        let mut track = self.track.lock().unwrap_or_else(PoisonError::into_inner);
        *track = Some(TrackedQuad::new(observation.clone()));
    }

    fn on_frame_captured(&mut self, frame: Arc<FrameBuffer>) -> Option<JoinHandle<()>> {
        let following = self
            .track
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_lost(self.max_frames_lost));
        if !following {
            return None;
        }

        let track = Arc::clone(&self.track);
        let distance_threshold = self.distance_threshold;
        let max_frames_lost = self.max_frames_lost;
        let lost_message = self.lost_message.clone();
        self.source.spawn(frame, move |observations, presenter: &PresentationHandle| {
            let Some(step) =
                Self::step(&track, &observations, distance_threshold, max_frames_lost)
            else {
                return;
            };
            let applied = match step {
                TrackStep::Matched(target) => {
                    presenter.invoke(move |screen, _| screen.apply_observations(vec![target]))
                }
                TrackStep::Missed => Ok(()),
                TrackStep::Lost => {
                    info!("tracking target lost");
                    presenter.invoke(move |screen, _| {
                        screen.overlay.clear();
                        screen.overlay.set_message(lost_message);
                    })
                }
            };
            if applied.is_err() {
                debug!("tracking result arrived after presentation shut down");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::error::DetectionError;
    use crate::core_modules::scanner::tests::{ScriptedDetector, page_at, spawn_screen};
    use crate::core_modules::transform::SensorDimensions;

    fn tracker(
        script: Vec<Result<Vec<Observation>, DetectionError>>,
        presenter: &PresentationHandle,
        config: &ScannerConfig,
    ) -> QuadTracker {
        let detector = Arc::new(ScriptedDetector::new(script));
        let source =
            DetectionSource::new(detector, presenter.clone(), config.max_in_flight_detections);
        QuadTracker::new(source, config)
    }

    fn frame(id: u64) -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::blank(id, 4, 4))
    }

    #[test]
    fn velocity_follows_last_two_positions() {
        let mut t = TrackedQuad::new(page_at(0.1, 0.1));
        t.update(page_at(0.2, 0.1));
        assert!((t.velocity.0 - 0.1).abs() < 1e-12);
        assert!(t.velocity.1.abs() < 1e-12);
        let predicted = t.predict_next_position();
        assert!((predicted.x - 0.5).abs() < 1e-12);
        assert_eq!(t.age, 2);
    }

    #[test]
    fn best_match_prefers_prediction_and_respects_threshold() {
        let mut t = TrackedQuad::new(page_at(0.1, 0.1));
        t.update(page_at(0.2, 0.1));
        // Prediction centroid is (0.5, 0.3): page_at(0.3, 0.1) sits exactly there.
        let candidates = vec![page_at(0.2, 0.1), page_at(0.3, 0.1)];
        assert_eq!(t.best_match(&candidates, 0.25), Some(1));
        assert_eq!(t.best_match(&[page_at(0.9, 0.9)], 0.25), None);
    }

    #[tokio::test]
    async fn frames_before_acquire_are_ignored() {
        let (presenter, _actor) = spawn_screen(None);
        let config = ScannerConfig::default();
        let mut t = tracker(vec![Ok(vec![page_at(0.1, 0.1)])], &presenter, &config);
        assert!(t.on_frame_captured(frame(0)).is_none());
    }

    #[tokio::test]
    async fn matched_target_drives_overlay_and_crop() {
        let (presenter, _actor) = spawn_screen(Some(SensorDimensions::new(1080, 1920)));
        let mut t = tracker(
            vec![Ok(vec![page_at(0.55, 0.5), page_at(0.12, 0.1)])],
            &presenter,
            &ScannerConfig::default(),
        );
        t.acquire(&page_at(0.1, 0.1));

        t.on_frame_captured(frame(0)).expect("task").await.expect("join");

        let (quads, crop) = presenter
            .query(|s, _| (s.overlay.quads().len(), s.capture.crop_rectangle()))
            .await
            .expect("query");
        assert_eq!(quads, 1);
        assert!(crop.is_some());
        let track = t.track().expect("track");
        assert_eq!(track.latest, page_at(0.12, 0.1));
        assert_eq!(track.age, 2);
    }

    #[tokio::test]
    async fn target_lost_after_limit_without_demotion() {
        let (presenter, _actor) = spawn_screen(None);
        let config = ScannerConfig {
            tracking_max_frames_lost: 2,
            ..ScannerConfig::default()
        };
        let mut t = tracker(vec![Ok(vec![page_at(0.9, 0.9)])], &presenter, &config);
        t.acquire(&page_at(0.1, 0.1));

        for id in 0..2 {
            t.on_frame_captured(frame(id)).expect("task").await.expect("join");
        }
        let message = presenter
            .query(|s, _| s.overlay.message().to_string())
            .await
            .expect("query");
        assert_ne!(message, config.lost_message);

        t.on_frame_captured(frame(2)).expect("task").await.expect("join");
        let message = presenter
            .query(|s, _| s.overlay.message().to_string())
            .await
            .expect("query");
        assert_eq!(message, config.lost_message);
        assert_eq!(t.track().expect("track").frames_since_seen, 3);
    }

    #[tokio::test]
    async fn lost_target_stops_detecting_until_reacquired() {
        let (presenter, _actor) = spawn_screen(None);
        let config = ScannerConfig {
            tracking_max_frames_lost: 1,
            ..ScannerConfig::default()
        };
        let mut t = tracker(vec![Ok(vec![page_at(0.9, 0.9)])], &presenter, &config);
        t.acquire(&page_at(0.1, 0.1));

        for id in 0..2 {
            t.on_frame_captured(frame(id)).expect("task").await.expect("join");
        }
        assert!(t.track().expect("track").is_lost(config.tracking_max_frames_lost));
        for id in 2..10 {
            assert!(t.on_frame_captured(frame(id)).is_none());
        }
        assert_eq!(t.track().expect("track").frames_since_seen, 2);

        t.acquire(&page_at(0.8, 0.8));
        t.on_frame_captured(frame(10)).expect("task").await.expect("join");
        assert_eq!(t.track().expect("track").age, 2);
    }

    #[test]
    fn miss_counter_saturates() {
        let track = Mutex::new(Some(TrackedQuad {
            frames_since_seen: u32::MAX,
            ..TrackedQuad::new(page_at(0.1, 0.1))
        }));
        let step = QuadTracker::step(&track, &[], 0.25, 5);
        assert_eq!(step, Some(TrackStep::Missed));
        let frames = track.lock().unwrap().as_ref().map(|t| t.frames_since_seen);
        assert_eq!(frames, Some(u32::MAX));
    }
}
