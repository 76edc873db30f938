//! Segmented video recording
//!
//! - `SegmentRecorder` - rotates output files on a fixed wall-clock window
//! - `SegmentWriter` - encoder boundary, ffmpeg-backed by default

pub mod segment;
pub mod writer;

pub use segment::{SegmentRecorder, VideoSegment};
pub use writer::{FfmpegSegmentWriter, FfmpegWriterFactory, SegmentWriter, SegmentWriterFactory};
