//! Core pipeline abstractions
//!
//! This module contains the lifecycle types for running cameras:
//! - `CameraPipeline` - ingestion and processing threads for one camera
//! - `Orchestrator` - starts, supervises and stops every pipeline
//! - `EventSink` - receives motion start/end markers

pub mod events;
pub mod orchestrator;
pub mod runner;
pub mod signal;
pub mod state;

pub use events::{ChannelSink, EventFanout, EventKind, EventMarker, EventSink, MarkerFileSink};
pub use orchestrator::Orchestrator;
pub use runner::{CameraPipeline, Collaborators};
pub use signal::StopSignal;
pub use state::{PipelineState, PipelineStats, StatsSnapshot};
