// THEORY:
// The `geometry` module holds the "dumb" data containers the rest of the
// scanner passes around: points, quadrilaterals and axis-aligned rectangles.
// None of them know which coordinate space they live in; the space is implied
// by who produced them (see `CoordinateSpace`). The one hard rule is corner
// order: a `Quadrilateral` is always (top-left, top-right, bottom-right,
// bottom-left) and nothing in the crate is allowed to permute it.

use serde::{Deserialize, Serialize};

/// A 2D point in whatever space its producer works in.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The four coordinate spaces a quadrilateral moves through on its way from
/// the detector to the crop rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateSpace {
    /// Unit square, Y axis increasing upward from the bottom of the frame.
    DetectorNormalized,
    /// Unit square, Y axis increasing downward (screen convention).
    DisplayNormalized,
    /// Logical viewport points.
    DisplayPixel,
    /// Pixels of the captured photo, axes swapped relative to the display.
    SensorPixel,
}

/// Corner indices of a `Quadrilateral`.
pub const TOP_LEFT: usize = 0;
pub const TOP_RIGHT: usize = 1;
pub const BOTTOM_RIGHT: usize = 2;
pub const BOTTOM_LEFT: usize = 3;

/// An ordered 4-corner polygon: top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub corners: [Point; 4],
}

impl Quadrilateral {
    pub const fn new(
        top_left: Point,
        top_right: Point,
        bottom_right: Point,
        bottom_left: Point,
    ) -> Self {
        Self {
            corners: [top_left, top_right, bottom_right, bottom_left],
        }
    }

    pub fn top_left(&self) -> Point {
        self.corners[TOP_LEFT]
    }

    pub fn top_right(&self) -> Point {
        self.corners[TOP_RIGHT]
    }

    pub fn bottom_right(&self) -> Point {
        self.corners[BOTTOM_RIGHT]
    }

    pub fn bottom_left(&self) -> Point {
        self.corners[BOTTOM_LEFT]
    }

    /// Applies `f` to every corner, keeping corner order.
    pub fn map(&self, mut f: impl FnMut(Point) -> Point) -> Self {
        Self {
            corners: self.corners.map(|p| f(p)),
        }
    }

    /// The arithmetic mean of the four corners.
    pub fn centroid(&self) -> Point {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }

    /// The smallest axis-aligned rectangle enclosing all four corners.
    pub fn bounding_box(&self) -> Rect {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for p in &self.corners {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

/// An axis-aligned rectangle given by its origin and size.
///
/// Size components may be negative; `standardized` flips them so the origin
/// becomes the minimum corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn min_x(&self) -> f64 {
        self.x.min(self.x + self.width)
    }

    pub fn max_x(&self) -> f64 {
        self.x.max(self.x + self.width)
    }

    pub fn min_y(&self) -> f64 {
        self.y.min(self.y + self.height)
    }

    pub fn max_y(&self) -> f64 {
        self.y.max(self.y + self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0.0 || self.height == 0.0
    }

    /// Same rectangle with non-negative width and height.
    pub fn standardized(&self) -> Self {
        Self::new(
            self.min_x(),
            self.min_y(),
            self.max_x() - self.min_x(),
            self.max_y() - self.min_y(),
        )
    }

    /// Half-open containment: min edges inclusive, max edges exclusive.
    pub fn contains(&self, point: Point) -> bool {
        !self.is_empty()
            && point.x >= self.min_x()
            && point.x < self.max_x()
            && point.y >= self.min_y()
            && point.y < self.max_y()
    }

    /// The overlapping region of two rectangles, or `None` if they do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.min_x().max(other.min_x());
        let y0 = self.min_y().max(other.min_y());
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}
