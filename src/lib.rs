// THEORY:
// This file is the main entry point for the `doc_scanner` library crate.
// It exports the `ScannerPipeline` and its `ScannerConfig` as the high-level
// interface of the engine, together with the two collaborator traits a host
// application has to implement: `Detector` (finds quadrilaterals in a frame)
// and `Camera` (reports dimensions and takes the still photo).
//
// The internal modules (`core_modules`) stay public so that a host can drive
// individual stages (the coordinate transform, the overlay model) directly,
// but most consumers only need what is re-exported here.

pub mod core_modules;
pub mod pipeline;

pub use core_modules::capture::{Camera, decode_photo, process_photo};
pub use core_modules::dispatch::FrameBuffer;
pub use core_modules::error::{CaptureError, DetectionError, ScannerError};
pub use core_modules::scanner::Detector;
pub use core_modules::tracker::TrackingCapability;
pub use pipeline::{ScannerConfig, ScannerPipeline, ScreenSnapshot};
