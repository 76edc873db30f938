//! Region-of-interest parsing and masking
//!
//! A region is written in config as a whitespace-separated flat list of
//! integers read as alternating x,y pairs. Several polygons can be given
//! separated by `;`. An empty string covers the whole frame.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use serde::Serialize;

use crate::error::ConfigError;

/// One or more closed polygons in frame pixel space
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionOfInterest {
    polygons: Vec<Vec<(i32, i32)>>,
}

impl RegionOfInterest {
    /// Rectangle covering the whole frame
    pub fn full_frame(width: u32, height: u32) -> Self {
        let w = width.saturating_sub(1) as i32;
        let h = height.saturating_sub(1) as i32;
        Self {
            polygons: vec![vec![(0, 0), (w, 0), (w, h), (0, h)]],
        }
    }

    /// Parse the config representation
    pub fn parse(spec: &str, width: u32, height: u32) -> Result<Self, ConfigError> {
        let mut polygons = Vec::new();

        for (idx, part) in spec.split(';').enumerate() {
            let values = part
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<i32>().map_err(|_| {
                        ConfigError::Region(format!("polygon {}: {:?} is not an integer", idx, tok))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if values.is_empty() {
                continue;
            }
            if values.len() % 2 != 0 {
                return Err(ConfigError::Region(format!(
                    "polygon {}: odd number of coordinates ({})",
                    idx,
                    values.len()
                )));
            }

            let mut points: Vec<(i32, i32)> =
                values.chunks_exact(2).map(|xy| (xy[0], xy[1])).collect();

            // An explicitly closed polygon repeats its first point
            while points.len() > 1 && points.first() == points.last() {
                points.pop();
            }

            if points.len() < 3 {
                return Err(ConfigError::Region(format!(
                    "polygon {}: needs at least 3 distinct points, got {}",
                    idx,
                    points.len()
                )));
            }
            polygons.push(points);
        }

        if polygons.is_empty() {
            return Ok(Self::full_frame(width, height));
        }
        Ok(Self { polygons })
    }

    /// The configured polygons
    pub fn polygons(&self) -> &[Vec<(i32, i32)>] {
        &self.polygons
    }

    /// Rasterize into a mask for a frame of the given size
    pub fn to_mask(&self, width: u32, height: u32) -> RegionMask {
        let mut mask = GrayImage::new(width, height);
        for polygon in &self.polygons {
            let points: Vec<Point<i32>> = polygon.iter().map(|&(x, y)| Point::new(x, y)).collect();
            draw_polygon_mut(&mut mask, &points, Luma([255u8]));
        }
        RegionMask { mask }
    }
}

/// Precomputed single-channel mask, 255 inside the region and 0 outside
#[derive(Debug, Clone)]
pub struct RegionMask {
    mask: GrayImage,
}

impl RegionMask {
    /// Width and height of the mask
    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }

    /// Whether a pixel lies inside the region
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y)[0] > 0
    }

    /// Zero every pixel of `image` that lies outside the region.
    ///
    /// The caller guarantees matching dimensions.
    pub fn apply(&self, image: &mut GrayImage) {
        for (px, m) in image.pixels_mut().zip(self.mask.pixels()) {
            px[0] &= m[0];
        }
    }
}
