// THEORY:
// Every failure in the scanner is recoverable. Detection failures and capture
// failures end up as a status message on the overlay; nothing here is fatal.
// The enums exist so that the producers (detector, camera, crop pipeline) can
// report *what* went wrong with `?`, and the presentation layer decides how to
// show it.

use thiserror::Error;

/// Failure reported by the detection capability for a single frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    #[error("detector failed: {0}")]
    Failed(String),
    #[error("frame {frame_id} has no pixel data")]
    EmptyFrame { frame_id: u64 },
}

/// Failure while acquiring or post-processing a still photo.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("photo capture failed: {0}")]
    Failed(String),
    #[error("no crop rectangle has been computed yet")]
    NoCropRectangle,
    #[error(
        "crop rectangle {x:.1},{y:.1} {width:.1}x{height:.1} \
         lies outside the {image_width}x{image_height} image"
    )]
    EmptyCrop {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        image_width: u32,
        image_height: u32,
    },
    #[error("crop rectangle is {age_ms} ms old (limit {limit_ms} ms)")]
    StaleCrop { age_ms: u128, limit_ms: u64 },
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Top-level error for the scanner engine.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("presentation context has shut down")]
    PresentationClosed,
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
