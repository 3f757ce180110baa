// THEORY:
// The `OverlayModel` is what the rendering surface draws on top of the camera
// preview: the quadrilaterals found in the most recent detection and a single
// status line. It also remembers the observations those quadrilaterals came
// from so a touch can be matched back to a detection.
//
// The model is owned by the presentation context (see `presentation`). Nothing
// outside that context ever holds a mutable reference to it; detection and
// capture results reach it through dispatched closures.

use crate::core_modules::geometry::{CoordinateSpace, Point, Quadrilateral, Rect};
use crate::core_modules::transform::Viewport;

/// One quadrilateral reported by the detector for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Corners in DetectorNormalized space.
    pub quad: Quadrilateral,
    /// Detector-assigned bounding box in DetectorNormalized space, used for hit-testing.
    pub bounding_box: Rect,
    pub confidence: f32,
}

impl Observation {
    /// An observation whose bounding box is the axis-aligned hull of its corners.
    pub fn new(quad: Quadrilateral) -> Self {
        Self {
            bounding_box: quad.bounding_box(),
            quad,
            confidence: 1.0,
        }
    }

    pub fn with_bounding_box(quad: Quadrilateral, bounding_box: Rect, confidence: f32) -> Self {
        Self {
            quad,
            bounding_box,
            confidence,
        }
    }
}

/// The drawable state of the overlay.
#[derive(Debug, Clone)]
pub struct OverlayModel {
    size: Viewport,
    quads: Vec<Quadrilateral>,
    observations: Vec<Observation>,
    message: String,
}

impl OverlayModel {
    pub fn new(size: Viewport) -> Self {
        Self {
            size,
            quads: Vec::new(),
            observations: Vec::new(),
            message: String::new(),
        }
    }

    /// Removes every quadrilateral and every hit-testable observation.
    pub fn clear(&mut self) {
        self.quads.clear();
        self.observations.clear();
    }

    pub fn add_quad(&mut self, quad: Quadrilateral) {
        self.quads.push(quad);
    }

    /// Registers an observation for hit-testing, in detection order.
    pub fn add_observation(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn quads(&self) -> &[Quadrilateral] {
        &self.quads
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn size(&self) -> Viewport {
        self.size
    }

    /// Converts a raw touch on the overlay to DisplayNormalized space.
    pub fn normalize_touch(&self, point: Point) -> Point {
        Point::new(point.x / self.size.width, point.y / self.size.height)
    }

    /// First observation, in detection order, whose bounding box contains `point`.
    ///
    /// `space` says where `point` lives. Display points are brought back into
    /// DetectorNormalized space before comparing against the detector's boxes.
    /// SensorPixel points cannot be mapped back without the sensor size and never match.
    pub fn hit_test(&self, point: Point, space: CoordinateSpace) -> Option<&Observation> {
        let detector_point = match space {
            CoordinateSpace::DetectorNormalized => point,
            CoordinateSpace::DisplayNormalized => Point::new(point.x, 1.0 - point.y),
            CoordinateSpace::DisplayPixel => {
                let normalized = self.normalize_touch(point);
                Point::new(normalized.x, 1.0 - normalized.y)
            }
            CoordinateSpace::SensorPixel => return None,
        };
        self.observations
            .iter()
            .find(|o| o.bounding_box.contains(detector_point))
    }
}
