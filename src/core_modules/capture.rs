// THEORY:
// The `CaptureCoordinator` turns a user's "capture" press into a finished
// document image. It owns the crop rectangle: detections write it through a
// single setter, the capture completion reads it. Both happen on the
// presentation context, so the value is never shared.
//
// Key architectural principles:
// 1.  **Fire Once**: A capture asks the camera for one photo and runs a fixed
//     pipeline on it: rotate 90 degrees, crop, desaturate. There is no retry
//     and no partial result. A failure leaves the previous image on screen.
// 2.  **Late Binding of the Crop**: The crop rectangle is read when the photo
//     arrives, not when the button is pressed. Whatever detection wrote last
//     (scanning or tracking) is what gets applied.
// 3.  **Resolution Handoff**: Right before the photo is taken, the camera's
//     still-image resolution replaces the sensor dimensions used by the
//     transform. Crops computed after that point use the new size.

use crate::core_modules::error::CaptureError;
use crate::core_modules::geometry::Rect;
use crate::core_modules::presentation::PresentationHandle;
use crate::core_modules::transform::{CropRectangle, SensorDimensions};
use crate::pipeline::ScannerConfig;
use futures::future::BoxFuture;
use image::{DynamicImage, GrayImage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The camera/session collaborator.
pub trait Camera: Send + Sync {
    /// Dimensions of the active video format, once one has been selected.
    fn sensor_dimensions(&self) -> Option<SensorDimensions>;

    /// Dimensions the next still photo will have.
    fn still_image_dimensions(&self) -> Option<SensorDimensions>;

    /// Takes one full-resolution photo.
    fn capture_photo(&self) -> BoxFuture<'static, Result<DynamicImage, CaptureError>>;
}

/// Decodes a photo's encoded file representation (JPEG, PNG, HEIF where supported).
pub fn decode_photo(data: &[u8]) -> Result<DynamicImage, CaptureError> {
    Ok(image::load_from_memory(data)?)
}

/// Rotates, crops and desaturates a captured photo.
pub fn process_photo(
    photo: &DynamicImage,
    crop: &CropRectangle,
) -> Result<GrayImage, CaptureError> {
    // --- 1. Orientation ---
    let rotated = photo.rotate90();

    // --- 2. Crop, clipped to the image and snapped outward to whole pixels ---
    let (width, height) = (rotated.width(), rotated.height());
    let bounds = Rect::new(0.0, 0.0, f64::from(width), f64::from(height));
    let empty = || CaptureError::EmptyCrop {
        x: crop.x,
        y: crop.y,
        width: crop.width,
        height: crop.height,
        image_width: width,
        image_height: height,
    };
    let finite = [crop.x, crop.y, crop.width, crop.height].iter().all(|v| v.is_finite());
    if !finite {
        return Err(empty());
    }
    let clipped = crop.standardized().intersection(&bounds).ok_or_else(empty)?;
    let x0 = clipped.min_x().floor() as u32;
    let y0 = clipped.min_y().floor() as u32;
    let x1 = (clipped.max_x().ceil() as u32).min(width);
    let y1 = (clipped.max_y().ceil() as u32).min(height);
    if x1 <= x0 || y1 <= y0 {
        return Err(empty());
    }
    let cropped = rotated.crop_imm(x0, y0, x1 - x0, y1 - y0);

    // --- 3. Desaturate ---
    Ok(cropped.to_luma8())
}

pub struct CaptureCoordinator {
    camera: Arc<dyn Camera>,
    sensor: Option<SensorDimensions>,
    crop: Option<(CropRectangle, Instant)>,
    max_crop_age: Option<Duration>,
    captured: Option<GrayImage>,
    captured_visible: bool,
}

impl CaptureCoordinator {
    pub fn new(camera: Arc<dyn Camera>, config: &ScannerConfig) -> Self {
        let sensor = camera.sensor_dimensions();
        Self {
            camera,
            sensor,
            crop: None,
            max_crop_age: config.max_crop_age_ms.map(Duration::from_millis),
            captured: None,
            captured_visible: false,
        }
    }

    pub fn sensor_dimensions(&self) -> Option<SensorDimensions> {
        self.sensor
    }

    pub fn set_sensor_dimensions(&mut self, sensor: SensorDimensions) {
        debug!(width = sensor.width, height = sensor.height, "sensor dimensions updated");
        self.sensor = Some(sensor);
    }

    /// The only way the crop rectangle changes.
    pub fn set_crop_rectangle(&mut self, crop: CropRectangle) {
        debug!(
            x = crop.x,
            y = crop.y,
            width = crop.width,
            height = crop.height,
            "crop rectangle updated"
        );
        self.crop = Some((crop, Instant::now()));
    }

    pub fn crop_rectangle(&self) -> Option<CropRectangle> {
        self.crop.map(|(crop, _)| crop)
    }

    pub fn captured_image(&self) -> Option<&GrayImage> {
        self.captured.as_ref()
    }

    pub fn captured_visible(&self) -> bool {
        self.captured_visible
    }

    /// Hides the capture surface and drops the image.
    pub fn dismiss_captured_image(&mut self) {
        self.captured = None;
        self.captured_visible = false;
    }

    /// Starts a one-shot photo capture. Its completion is applied on the presentation context.
    pub fn capture_image(&mut self, presenter: &PresentationHandle) -> JoinHandle<()> {
        if let Some(still) = self.camera.still_image_dimensions() {
            self.set_sensor_dimensions(still);
        }

        info!("capturing photo");
        let photo = self.camera.capture_photo();
        let presenter = presenter.clone();
        tokio::spawn(async move {
            let result = photo.await;
            if presenter.invoke(move |screen, _| screen.apply_capture(result)).is_err() {
                debug!("photo arrived after presentation shut down");
            }
        })
    }

    /// Runs the rotate/crop/desaturate pipeline on a finished capture.
    pub fn complete_capture(
        &mut self,
        photo: Result<DynamicImage, CaptureError>,
    ) -> Result<(), CaptureError> {
        let photo = photo?;
        let (crop, computed_at) = self.crop.ok_or(CaptureError::NoCropRectangle)?;
        if let Some(limit) = self.max_crop_age {
            let age = computed_at.elapsed();
            if age > limit {
                return Err(CaptureError::StaleCrop {
                    age_ms: age.as_millis(),
                    limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        let image = process_photo(&photo, &crop)?;
        info!(width = image.width(), height = image.height(), "document captured");
        self.captured = Some(image);
        self.captured_visible = true;
        Ok(())
    }
}
