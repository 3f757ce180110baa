// THEORY:
// The `transform` module is the geometric heart of the scanner. A quadrilateral
// reported by the detector travels through four coordinate spaces before it
// becomes a crop rectangle on the captured photo:
//
//   DetectorNormalized --shrink, flip--> DisplayNormalized
//                      --viewport scale--> DisplayPixel
//                      --sensor scale (axes swapped)--> SensorPixel
//                      --margins--> CropRectangle
//
// Key architectural principles:
// 1.  **Pure Functions**: Nothing here holds state between calls. The
//     `CoordinateTransform` only carries the tuned constants from the
//     `ScannerConfig`, so the same input always produces the same output.
// 2.  **Point-wise Stages**: Every stage maps corners one by one via
//     `Quadrilateral::map`, which keeps the (TL, TR, BR, BL) order intact.
// 3.  **Orientation Swap**: The sensor reports its dimensions in landscape
//     while the display is portrait, so the sensor's *height* scales the
//     display X axis and its *width* scales the display Y axis.
// 4.  **Empirical Margins**: The shrink factor and crop margins are tuned by
//     hand against a real detector. They live in the config, not in code.

use crate::core_modules::geometry::{
    BOTTOM_LEFT, BOTTOM_RIGHT, Point, Quadrilateral, Rect, TOP_LEFT, TOP_RIGHT,
};
use crate::pipeline::ScannerConfig;
use serde::{Deserialize, Serialize};

/// A crop rectangle in SensorPixel space.
pub type CropRectangle = Rect;

/// The logical size of the display the overlay is drawn on, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1080.0,
            height: 1920.0,
        }
    }
}

/// Width/height of the sensor output as the camera reports them (landscape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDimensions {
    pub width: u32,
    pub height: u32,
}

impl SensorDimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The sensor size as seen from the portrait display: (height, width).
    pub fn display_oriented(&self) -> (f64, f64) {
        (f64::from(self.height), f64::from(self.width))
    }
}

/// Every intermediate form of one detected quadrilateral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Shrunk and flipped; what the overlay draws.
    pub display: Quadrilateral,
    /// Present only when sensor dimensions are known.
    pub sensor: Option<Quadrilateral>,
    /// Derived from `sensor` corners 0 and 2.
    pub crop: Option<CropRectangle>,
}

/// Converts detector output into overlay and crop geometry.
#[derive(Debug, Clone)]
pub struct CoordinateTransform {
    viewport: Viewport,
    shrink_factor: f64,
    margin_factor: f64,
    crop_origin_h_factor: f64,
    crop_origin_v_factor: f64,
    crop_width_growth: f64,
    crop_height_shrink: f64,
}

impl CoordinateTransform {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            viewport: config.viewport,
            shrink_factor: config.shrink_factor,
            margin_factor: config.margin_factor,
            crop_origin_h_factor: config.crop_origin_h_factor,
            crop_origin_v_factor: config.crop_origin_v_factor,
            crop_width_growth: config.crop_width_growth,
            crop_height_shrink: config.crop_height_shrink,
        }
    }

    /// Step 1: pulls the top edge down and the bottom edge up.
    /// The detector tends to include the page's content box a bit past its edges.
    pub fn shrink(&self, quad: &Quadrilateral) -> Quadrilateral {
        let mut corners = quad.corners;
        corners[TOP_LEFT].y -= self.shrink_factor;
        corners[TOP_RIGHT].y -= self.shrink_factor;
        corners[BOTTOM_RIGHT].y += self.shrink_factor;
        corners[BOTTOM_LEFT].y += self.shrink_factor;
        Quadrilateral { corners }
    }

    /// Step 2: `y -> 1 - y`. Self-inverse.
    pub fn flip(quad: &Quadrilateral) -> Quadrilateral {
        quad.map(|p| Point::new(p.x, 1.0 - p.y))
    }

    /// Steps 1 and 2: DetectorNormalized to DisplayNormalized.
    pub fn to_display_normalized(&self, detector_quad: &Quadrilateral) -> Quadrilateral {
        Self::flip(&self.shrink(detector_quad))
    }

    /// Step 3: DisplayNormalized to DisplayPixel.
    pub fn to_display_pixel(&self, display_quad: &Quadrilateral) -> Quadrilateral {
        let Viewport { width, height } = self.viewport;
        display_quad.map(|p| Point::new(p.x * width, p.y * height))
    }

    /// Step 4: DisplayPixel to SensorPixel, with the axis swap.
    pub fn to_sensor_pixel(
        &self,
        pixel_quad: &Quadrilateral,
        sensor: SensorDimensions,
    ) -> Quadrilateral {
        let (sensor_w, sensor_h) = sensor.display_oriented();
        let Viewport { width, height } = self.viewport;
        pixel_quad.map(|p| Point::new(p.x * sensor_w / width, p.y * sensor_h / height))
    }

    /// Horizontal and vertical crop margins for the given sensor.
    pub fn margins(&self, sensor: SensorDimensions) -> (f64, f64) {
        let (sensor_w, sensor_h) = sensor.display_oriented();
        (sensor_w * self.margin_factor, sensor_h * self.margin_factor)
    }

    /// Step 5: crop rectangle from corners 0 and 2 of a SensorPixel quadrilateral.
    pub fn crop_rectangle(
        &self,
        sensor_quad: &Quadrilateral,
        sensor: SensorDimensions,
    ) -> CropRectangle {
        let (h_offset, v_offset) = self.margins(sensor);
        let c0 = sensor_quad.corners[TOP_LEFT];
        let c2 = sensor_quad.corners[BOTTOM_RIGHT];
        Rect::new(
            c0.x - h_offset * self.crop_origin_h_factor,
            c0.y + v_offset * self.crop_origin_v_factor,
            (c2.x - c0.x) + h_offset * self.crop_width_growth,
            (c2.y - c0.y) - v_offset * self.crop_height_shrink,
        )
    }

    /// Runs every stage. Without sensor dimensions only the display form is produced.
    pub fn project(
        &self,
        detector_quad: &Quadrilateral,
        sensor: Option<SensorDimensions>,
    ) -> Projection {
        let display = self.to_display_normalized(detector_quad);
        let Some(sensor) = sensor else {
            return Projection {
                display,
                sensor: None,
                crop: None,
            };
        };
        let sensor_quad = self.to_sensor_pixel(&self.to_display_pixel(&display), sensor);
        Projection {
            display,
            sensor: Some(sensor_quad),
            crop: Some(self.crop_rectangle(&sensor_quad, sensor)),
        }
    }
}
