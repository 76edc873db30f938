//! Error types for the motion pipeline
//!
//! Every failure that can happen inside a running pipeline is represented
//! here so it can be logged and contained instead of unwinding.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used across the crate
pub type Result<T, E = MotionError> = std::result::Result<T, E>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum MotionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The config file is not valid TOML for the expected layout
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A single camera entry was rejected; other cameras are unaffected
    #[error("camera #{index} ({camera_id}): {message}")]
    Camera {
        index: usize,
        camera_id: String,
        message: String,
    },
    /// A region-of-interest string could not be parsed
    #[error("invalid region of interest: {0}")]
    Region(String),
}

/// Frame source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened at all
    #[error("failed to open video source {uri:?}: {source}")]
    Open {
        uri: String,
        #[source]
        source: io::Error,
    },
    /// A single frame could not be decoded; the stream is still usable
    #[error("frame decode failed: {0}")]
    Decode(String),
    /// The underlying stream failed
    #[error("source I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SourceError {
    /// Whether the stream can keep being read after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Decode(_))
    }
}

/// Per-frame classification errors, always treated as "no motion"
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Frame dimensions do not match the configured camera geometry
    #[error("frame is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// The segmentation engine rejected its input
    #[error("segmentation failed: {0}")]
    Segmentation(String),
}

/// Segment recording errors
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The per-camera output directory could not be created
    #[error("failed to create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The encoder process could not be started
    #[error("failed to start encoder for {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A frame could not be written to the open segment
    #[error("failed to write frame: {0}")]
    Write(#[source] io::Error),
    /// The frame does not match the segment geometry
    #[error("frame is {actual:?}, segment expects {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// The segment could not be finalized
    #[error("failed to finalize segment {path:?}: {message}")]
    Finish { path: PathBuf, message: String },
}

/// Pipeline lifecycle errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `start()` was called on a pipeline that is not in the `Created` state
    #[error("pipeline {camera_id} cannot start from state {state}")]
    InvalidState { camera_id: String, state: String },
    /// A worker thread could not be spawned
    #[error("failed to spawn {task} thread for {camera_id}: {source}")]
    Spawn {
        camera_id: String,
        task: &'static str,
        #[source]
        source: io::Error,
    },
}
