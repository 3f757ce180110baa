// This file is an example of how to drive the `doc_scanner` library.
// It feeds synthetic camera frames (a bright page drifting over a dark desk)
// through the pipeline, touches the detected page, and captures it.
//
// Set DOC_SCANNER_CONFIG to a JSON file to override any `ScannerConfig` field.

use anyhow::Context;
use doc_scanner::core_modules::geometry::{CoordinateSpace, Point, Quadrilateral};
use doc_scanner::core_modules::overlay::Observation;
use doc_scanner::core_modules::transform::SensorDimensions;
use doc_scanner::{
    Camera, CaptureError, DetectionError, Detector, FrameBuffer, ScannerConfig, ScannerPipeline,
    decode_photo,
};
use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, Pixel, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 180;
const LUMA_THRESHOLD: u8 = 128;

/// Reports the bounding box of all bright pixels as one page.
struct BrightPageDetector;

impl Detector for BrightPageDetector {
    fn detect(
        &self,
        frame: Arc<FrameBuffer>,
    ) -> BoxFuture<'static, Result<Vec<Observation>, DetectionError>> {
        Box::pin(async move {
            let image = frame
                .to_rgba_image()
                .filter(|img| img.width() > 0 && img.height() > 0)
                .ok_or(DetectionError::EmptyFrame { frame_id: frame.frame_id })?;
            let (w, h) = (f64::from(image.width()), f64::from(image.height()));

            let mut bounds: Option<(u32, u32, u32, u32)> = None;
            for (x, y, px) in image.enumerate_pixels() {
                if px.to_luma().0[0] < LUMA_THRESHOLD {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }

            // Detector space has its origin at the bottom left.
            let pages: Vec<Observation> = bounds
                .map(|(x0, y0, x1, y1)| {
                    let (left, right) = (f64::from(x0) / w, f64::from(x1 + 1) / w);
                    let (top, bottom) = (1.0 - f64::from(y0) / h, 1.0 - f64::from(y1 + 1) / h);
                    Observation::new(Quadrilateral::new(
                        Point::new(left, top),
                        Point::new(right, top),
                        Point::new(right, bottom),
                        Point::new(left, bottom),
                    ))
                })
                .into_iter()
                .collect();
            Ok::<_, DetectionError>(pages)
        })
    }
}

/// Produces PNG-encoded photos of a page, decoded the way a real capture would be.
struct SyntheticCamera {
    sensor: SensorDimensions,
}

impl Camera for SyntheticCamera {
    fn sensor_dimensions(&self) -> Option<SensorDimensions> {
        Some(self.sensor)
    }

    fn still_image_dimensions(&self) -> Option<SensorDimensions> {
        Some(self.sensor)
    }

    fn capture_photo(&self) -> BoxFuture<'static, Result<DynamicImage, CaptureError>> {
        let SensorDimensions { width, height } = self.sensor;
        Box::pin(async move {
            let photo = RgbaImage::from_fn(width, height, |x, y| {
                let on_page_x = (width / 4..width * 3 / 4).contains(&x);
                if on_page_x && (height / 4..height * 3 / 4).contains(&y) {
                    Rgba([240, 240, 230, 255])
                } else {
                    Rgba([30, 30, 40, 255])
                }
            });
            let mut encoded = Cursor::new(Vec::new());
            DynamicImage::ImageRgba8(photo).write_to(&mut encoded, ImageFormat::Png)?;
            decode_photo(encoded.get_ref())
        })
    }
}

fn render_frame(frame_id: u64) -> FrameBuffer {
    let shift = (frame_id % 20) as u32;
    let (x0, x1) = (80 + shift, 240 + shift);
    let image = RgbaImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |x, y| {
        if (x0..x1).contains(&x) && (40..140).contains(&y) {
            Rgba([250, 250, 250, 255])
        } else {
            Rgba([20, 20, 20, 255])
        }
    });
    FrameBuffer::from_rgba(image, frame_id)
}

fn load_config() -> anyhow::Result<ScannerConfig> {
    match std::env::var("DOC_SCANNER_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            Ok(ScannerConfig::from_json_str(&json)?)
        }
        Err(_) => Ok(ScannerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Document Scanner - Example Runner");

    // --- 1. Setup ---
    let config = load_config()?;
    let camera = Arc::new(SyntheticCamera {
        sensor: SensorDimensions::new(1080, 1920),
    });
    let pipeline = ScannerPipeline::start(config, Arc::new(BrightPageDetector), camera);
    let frames = pipeline.frame_sender();

    // --- 2. Scanning ---
    for frame_id in 0..5 {
        frames.send(render_frame(frame_id)).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    let snapshot = pipeline.snapshot().await?;
    info!(
        mode = ?snapshot.mode,
        quads = snapshot.quads.len(),
        message = %snapshot.message,
        "after scanning"
    );

    // --- 3. Acquire the page by touching its centre ---
    let Some(target) = snapshot.quads.first() else {
        warn!("no page detected, nothing to track");
        drop(frames);
        pipeline.shutdown().await?;
        return Ok(());
    };
    pipeline.touch(target.centroid(), CoordinateSpace::DisplayNormalized)?;

    // --- 4. Tracking ---
    for frame_id in 5..10 {
        frames.send(render_frame(frame_id)).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    let snapshot = pipeline.snapshot().await?;
    info!(
        mode = ?snapshot.mode,
        crop = ?snapshot.crop,
        message = %snapshot.message,
        "after tracking"
    );

    // --- 5. Capture ---
    pipeline.capture()?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = pipeline.snapshot().await?;
    match snapshot.captured_size {
        Some((width, height)) => info!(width, height, "captured document"),
        None => warn!(message = %snapshot.message, "capture produced no image"),
    }

    // --- 6. Back to scanning ---
    pipeline.reset()?;
    drop(frames);
    let screen = pipeline.shutdown().await?;
    info!(mode = ?screen.mode.mode(), message = %screen.overlay.message(), "scanner stopped");
    Ok(())
}
