//! Time-rotated video segments
//!
//! The recorder keeps at most one segment open per camera. A segment is
//! closed and replaced once its wall-clock span exceeds the rotation window,
//! and closed for good when the pipeline stops.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;

use super::writer::{SegmentWriter, SegmentWriterFactory};
use crate::config::{CameraConfig, RecordingMode};
use crate::core::state::{bump, should_log_occurrence, PipelineStats};
use crate::error::RecorderError;
use crate::vision::capture::Frame;
use crate::vision::motion::MotionPhase;

/// Box color for annotated recordings
const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// One rotation-bounded output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSegment {
    pub path: PathBuf,
    pub started_at: DateTime<Local>,
    pub frame_count: u64,
}

struct OpenSegment {
    info: VideoSegment,
    writer: Box<dyn SegmentWriter>,
}

/// Per-camera segment recorder, driven by the processing thread
pub struct SegmentRecorder {
    camera: Arc<CameraConfig>,
    writers: Arc<dyn SegmentWriterFactory>,
    stats: Arc<PipelineStats>,
    rotation: TimeDelta,
    current: Option<OpenSegment>,
    last_closed: Option<VideoSegment>,
    failures: u64,
}

impl SegmentRecorder {
    pub fn new(
        camera: Arc<CameraConfig>,
        writers: Arc<dyn SegmentWriterFactory>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let rotation = TimeDelta::from_std(camera.segment_rotation).unwrap_or(TimeDelta::MAX);
        Self {
            camera,
            writers,
            stats,
            rotation,
            current: None,
            last_closed: None,
            failures: 0,
        }
    }

    /// Whether recording is switched on for this camera
    pub fn enabled(&self) -> bool {
        self.camera.output_video
    }

    /// The segment currently receiving frames
    pub fn current(&self) -> Option<&VideoSegment> {
        self.current.as_ref().map(|s| &s.info)
    }

    /// The most recently closed segment
    pub fn last_closed(&self) -> Option<&VideoSegment> {
        self.last_closed.as_ref()
    }

    /// Record one frame. `regions` are the moving areas used for annotation
    /// and `phase` is the motion state after this frame.
    ///
    /// Failures are logged and counted; the next frame tries again.
    pub fn on_frame(&mut self, frame: &Frame, regions: &[Rect], phase: MotionPhase) {
        if !self.enabled() {
            return;
        }

        if self.camera.recording_mode == RecordingMode::Motion && phase == MotionPhase::Idle {
            self.finish();
            return;
        }

        let expected = (self.camera.width, self.camera.height);
        if frame.image.dimensions() != expected {
            // Skip the frame but keep the open segment
            self.report(&RecorderError::FrameSize {
                expected,
                actual: frame.image.dimensions(),
            });
            return;
        }

        let now = frame.captured_at;
        if let Some(open) = &self.current {
            if now.signed_duration_since(open.info.started_at) > self.rotation {
                log::debug!(
                    "Camera {}: rotating segment {:?}",
                    self.camera.camera_id,
                    open.info.path
                );
                self.finish();
            }
        }

        if self.current.is_none() {
            match self.open(now) {
                Ok(open) => self.current = Some(open),
                Err(e) => {
                    self.report(&e);
                    return;
                }
            }
        }

        let annotated;
        let image = if self.camera.annotate && !regions.is_empty() {
            annotated = annotate(&frame.image, regions);
            &annotated
        } else {
            &frame.image
        };

        let Some(open) = self.current.as_mut() else {
            return;
        };
        match open.writer.write(image) {
            Ok(()) => open.info.frame_count += 1,
            Err(e) => {
                self.report(&e);
                // Drop the broken segment; the next frame opens a fresh one
                self.finish();
            }
        }
    }

    /// Close the open segment, if any. Safe to call repeatedly.
    pub fn finish(&mut self) {
        let Some(open) = self.current.take() else {
            return;
        };
        let OpenSegment { info, writer } = open;
        match writer.finish() {
            Ok(()) => log::info!(
                "Camera {}: closed segment {:?} ({} frames)",
                self.camera.camera_id,
                info.path,
                info.frame_count
            ),
            Err(e) => self.report(&e),
        }
        self.last_closed = Some(info);
    }

    fn open(&self, now: DateTime<Local>) -> Result<OpenSegment, RecorderError> {
        let dir = self.camera.segment_dir();
        std::fs::create_dir_all(&dir).map_err(|source| RecorderError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let path = self.segment_path(now);
        let writer = self.writers.create(&path, &self.camera)?;
        bump(&self.stats.segments_opened);
        log::info!("Camera {}: recording to {:?}", self.camera.camera_id, path);

        Ok(OpenSegment {
            info: VideoSegment {
                path,
                started_at: now,
                frame_count: 0,
            },
            writer,
        })
    }

    /// `<segment_dir>/<YYYYMMDDTHHMMSS>.<ext>`, suffixed if that name is taken
    fn segment_path(&self, now: DateTime<Local>) -> PathBuf {
        let dir = self.camera.segment_dir();
        let stem = now.format("%Y%m%dT%H%M%S").to_string();
        let ext = &self.camera.video_extension;

        let mut path = dir.join(format!("{}.{}", stem, ext));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{}_{}.{}", stem, n, ext));
            n += 1;
        }
        path
    }

    fn report(&mut self, err: &RecorderError) {
        bump(&self.stats.output_errors);
        self.failures += 1;
        if should_log_occurrence(self.failures) {
            log::error!(
                "Camera {}: recording failed ({} so far): {}",
                self.camera.camera_id,
                self.failures,
                err
            );
        }
    }
}

impl Drop for SegmentRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Copy of `image` with a box around every region
pub fn annotate(image: &RgbImage, regions: &[Rect]) -> RgbImage {
    let mut out = image.clone();
    for rect in regions {
        draw_hollow_rect_mut(&mut out, *rect, ANNOTATION_COLOR);
    }
    out
}
