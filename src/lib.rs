//! MotionWatch
//!
//! Unattended motion detection for many camera feeds at once. Each camera
//! gets its own pipeline that decodes frames, classifies them for motion
//! inside a region of interest, turns the noisy per-frame signal into
//! discrete motion events, writes an event marker per transition and
//! optionally records time-rotated video segments.
//!
//! Cameras are fully independent: a stalled stream or a crashing worker only
//! ever affects its own pipeline.

pub mod config;
pub mod core;
pub mod error;
pub mod recording;
pub mod vision;

// Re-export commonly used types
pub use config::{AppConfig, CameraConfig, RecordingMode};
pub use crate::core::{CameraPipeline, Collaborators, EventKind, EventMarker, EventSink, Orchestrator, PipelineState, StopSignal};
pub use error::{MotionError, Result};
