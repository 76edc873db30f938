//! Frame capture and motion analysis
//!
//! This module covers everything between a camera stream and a per-frame
//! motion decision: decoding, buffering, region masking, foreground
//! segmentation, contour classification and event hysteresis.
//!
//! # Example
//!
//! ```ignore
//! use motionwatch::vision::{MotionClassifier, MotionStateMachine, RegionOfInterest, RunningAverageModel};
//!
//! let roi = RegionOfInterest::parse("0 0 320 0 320 240 0 240", 640, 480)?;
//! let engine = Box::new(RunningAverageModel::new(Default::default()));
//! let mut classifier = MotionClassifier::new(roi.to_mask(640, 480), 21, 500, engine);
//! let mut machine = MotionStateMachine::new(std::time::Duration::from_secs(5));
//!
//! let outcome = classifier.detect(&frame.image);
//! if let Some(transition) = machine.observe(&outcome, frame.captured_at) {
//!     println!("motion {}", transition.kind);
//! }
//! ```

pub mod capture;
pub mod detector;
pub mod motion;
pub mod queue;
pub mod region;
pub mod segmentation;

pub use capture::{FfmpegSource, FfmpegSourceFactory, Frame, FrameSource, FrameSourceFactory, SourceCloser, SourceRead};
pub use detector::{Detection, MotionClassifier};
pub use motion::{MotionPhase, MotionState, MotionStateMachine, MotionTransition};
pub use queue::{FrameQueue, PopTimeout, PushOutcome};
pub use region::{RegionMask, RegionOfInterest};
pub use segmentation::{
    RunningAverageFactory, RunningAverageModel, SegmentationEngine, SegmentationFactory, SegmentationSettings,
};
