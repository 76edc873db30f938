//! Motion classification
//!
//! Turns one RGB frame into a "has motion" decision: luma conversion,
//! Gaussian blur, region masking, foreground segmentation, then external
//! contour extraction with an area threshold.

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;
use imageproc::rect::Rect;

use super::region::RegionMask;
use super::segmentation::SegmentationEngine;
use crate::error::ClassifyError;

/// Result of classifying a frame
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Whether any contour reached the area threshold
    pub has_motion: bool,
    /// Bounding boxes of contours that reached the threshold
    pub regions: Vec<Rect>,
    /// Area of the largest external contour, thresholded or not
    pub largest_area: f64,
}

impl Detection {
    /// A frame without motion
    pub fn none() -> Self {
        Self::default()
    }
}

/// Per-camera motion classifier.
///
/// Owns the camera's segmentation engine, so it must only be driven by that
/// camera's processing thread.
pub struct MotionClassifier {
    dimensions: (u32, u32),
    blur_sigma: Option<f32>,
    min_area: f64,
    region: RegionMask,
    engine: Box<dyn SegmentationEngine>,
}

impl MotionClassifier {
    pub fn new(
        region: RegionMask,
        blur_kernel: u32,
        min_area: u32,
        engine: Box<dyn SegmentationEngine>,
    ) -> Self {
        Self {
            dimensions: region.dimensions(),
            blur_sigma: kernel_sigma(blur_kernel),
            min_area: min_area as f64,
            region,
            engine,
        }
    }

    /// Whether the frame shows motion inside the region
    pub fn classify(&mut self, frame: &RgbImage) -> Result<bool, ClassifyError> {
        Ok(self.detect(frame)?.has_motion)
    }

    /// Full classification including the moving regions
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Detection, ClassifyError> {
        let luma = self.preprocess(frame)?;
        let mask = self.engine.apply(&luma)?;
        if mask.dimensions() != luma.dimensions() {
            return Err(ClassifyError::Segmentation(format!(
                "mask is {:?}, frame is {:?}",
                mask.dimensions(),
                luma.dimensions()
            )));
        }
        Ok(find_motion(&mask, self.min_area))
    }

    /// Luma conversion, blur and region masking
    pub fn preprocess(&self, frame: &RgbImage) -> Result<GrayImage, ClassifyError> {
        if frame.dimensions() != self.dimensions {
            return Err(ClassifyError::DimensionMismatch {
                expected: self.dimensions,
                actual: frame.dimensions(),
            });
        }

        let gray = image::imageops::grayscale(frame);
        let mut luma = match self.blur_sigma {
            Some(sigma) => gaussian_blur_f32(&gray, sigma),
            None => gray,
        };
        self.region.apply(&mut luma);
        Ok(luma)
    }

    pub fn min_area(&self) -> f64 {
        self.min_area
    }
}

/// Gaussian sigma for an odd kernel size, using the same derivation as
/// OpenCV when no sigma is given. Kernels of 1 or less disable blurring.
pub fn kernel_sigma(kernel: u32) -> Option<f32> {
    if kernel <= 1 {
        return None;
    }
    Some(0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8)
}

/// Polygon area of a contour (shoelace formula)
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice as f64 / 2.0).abs()
}

/// Inclusive area threshold check
pub fn meets_threshold(area: f64, min_area: f64) -> bool {
    area >= min_area
}

fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32))
}

/// Evaluate a foreground mask: any external contour whose area is at least
/// `min_area` counts as motion. An empty mask never does.
pub fn find_motion(mask: &GrayImage, min_area: f64) -> Detection {
    let mut detection = Detection::none();

    for contour in find_contours::<i32>(mask) {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        let area = contour_area(&contour.points);
        detection.largest_area = detection.largest_area.max(area);
        if meets_threshold(area, min_area) {
            detection.has_motion = true;
            if let Some(rect) = bounding_rect(&contour.points) {
                detection.regions.push(rect);
            }
        }
    }

    detection
}
