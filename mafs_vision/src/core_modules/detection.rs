//! Boundary to the external object-detection capability.
//!
//! The land masker hands its land-excluded image to a `Detector` and gets back
//! boxes plus an annotated RGB rendering. When no model is configured the
//! `NoopDetector` stands in, so the pipeline never checks for a missing model.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;

/// Errors raised by a detector implementation.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectionError {
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }
}

/// Single detection in pixel coordinates of the analysed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    /// Confidence score (0-1)
    pub confidence: f32,
    pub class_name: String,
}

/// What a detector returns for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutput {
    pub annotated: RgbImage,
    pub detections: Vec<Detection>,
}

/// Common interface for object detectors.
pub trait Detector: Send + Sync {
    /// Detect objects in a single-channel image.
    fn detect(&self, image: &GrayImage) -> Result<DetectionOutput, DetectionError>;

    /// Detector name (for logging/debugging)
    fn name(&self) -> &str;
}

/// Stand-in used when no model is configured: no detections, plain RGB copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn detect(&self, image: &GrayImage) -> Result<DetectionOutput, DetectionError> {
        Ok(DetectionOutput {
            annotated: gray_to_rgb(image),
            detections: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "none"
    }
}

pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let mut out = RgbImage::new(w, h);
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        let v = src.0[0];
        *dst = Rgb([v, v, v]);
    }
    out
}

/// Draws detection boxes onto an RGB copy of `image`.
pub fn annotate_detections(image: &GrayImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = gray_to_rgb(image);
    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox;
        let width = (x2 - x1).round().max(1.0) as u32;
        let height = (y2 - y1).round().max(1.0) as u32;
        let rect = Rect::at(x1.round() as i32, y1.round() as i32).of_size(width, height);

        // Thick border by drawing nested rectangles
        for offset in 0..BOX_THICKNESS {
            let grown = Rect::at(rect.left() - offset, rect.top() - offset)
                .of_size(rect.width() + (offset * 2) as u32, rect.height() + (offset * 2) as u32);
            draw_hollow_rect_mut(&mut canvas, grown, BOX_COLOR);
        }
    }
    canvas
}
