//! Foreground segmentation
//!
//! A [`SegmentationEngine`] keeps a per-camera background model and turns
//! each preprocessed luma frame into a foreground mask (pixel > 0 means
//! foreground). Engines are stateful and owned by exactly one processing
//! thread.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;

/// Stateful foreground-mask producer
pub trait SegmentationEngine: Send {
    /// Feed one single-channel frame and return its foreground mask
    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage, ClassifyError>;

    /// Forget the learned background
    fn reset(&mut self);
}

/// Creates one engine per camera
pub trait SegmentationFactory: Send + Sync {
    fn create(&self, settings: &SegmentationSettings) -> Box<dyn SegmentationEngine>;
}

/// Tunables for the default background model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Weight of each new frame in the running background average (0..=1)
    pub learning_rate: f32,
    /// Minimum absolute luma difference counted as foreground
    pub threshold: u8,
    /// Frames used to build the background before any foreground is reported
    pub warmup_frames: u32,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            threshold: 25,
            warmup_frames: 30,
        }
    }
}

/// Running-average background subtractor
pub struct RunningAverageModel {
    settings: SegmentationSettings,
    background: Vec<f32>,
    dimensions: (u32, u32),
    frames_seen: u32,
}

impl RunningAverageModel {
    pub fn new(settings: SegmentationSettings) -> Self {
        Self {
            settings: SegmentationSettings {
                learning_rate: settings.learning_rate.clamp(0.0, 1.0),
                ..settings
            },
            background: Vec::new(),
            dimensions: (0, 0),
            frames_seen: 0,
        }
    }

    fn seed(&mut self, frame: &GrayImage) {
        self.background = frame.pixels().map(|p| p[0] as f32).collect();
        self.dimensions = frame.dimensions();
        self.frames_seen = 1;
    }
}

impl SegmentationEngine for RunningAverageModel {
    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage, ClassifyError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifyError::Segmentation("empty frame".to_string()));
        }

        if self.background.is_empty() || self.dimensions != (width, height) {
            if !self.background.is_empty() {
                log::warn!(
                    "Frame size changed from {:?} to {:?}, relearning background",
                    self.dimensions,
                    (width, height)
                );
            }
            self.seed(frame);
            return Ok(GrayImage::new(width, height));
        }

        let warming_up = self.frames_seen < self.settings.warmup_frames;
        // Learn faster while warming up so the first real frames see a settled model
        let alpha = if warming_up {
            1.0 / (self.frames_seen as f32 + 1.0)
        } else {
            self.settings.learning_rate
        };
        let threshold = self.settings.threshold as f32;

        let mut mask = GrayImage::new(width, height);
        for ((bg, px), out) in self
            .background
            .iter_mut()
            .zip(frame.pixels())
            .zip(mask.pixels_mut())
        {
            let value = px[0] as f32;
            if !warming_up && (value - *bg).abs() > threshold {
                *out = Luma([255u8]);
            }
            *bg += alpha * (value - *bg);
        }

        self.frames_seen = self.frames_seen.saturating_add(1);
        Ok(mask)
    }

    fn reset(&mut self) {
        self.background.clear();
        self.dimensions = (0, 0);
        self.frames_seen = 0;
    }
}

/// Creates [`RunningAverageModel`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningAverageFactory;

impl SegmentationFactory for RunningAverageFactory {
    fn create(&self, settings: &SegmentationSettings) -> Box<dyn SegmentationEngine> {
        Box::new(RunningAverageModel::new(*settings))
    }
}
