//! Configuration types for the motion pipeline
//!
//! The configuration file is TOML with a `[defaults]` table and any number of
//! `[[camera]]` tables. Each camera is resolved on its own into an immutable
//! [`CameraConfig`]; a bad entry rejects that camera only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::vision::region::RegionOfInterest;
use crate::vision::segmentation::SegmentationSettings;

/// File name looked up in `$HOME` when no config path is given
pub const DEFAULT_CONFIG_FILE: &str = "motionwatch.toml";

/// When segments are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Every frame is recorded while output is enabled
    #[default]
    Continuous,
    /// Only frames inside a motion event are recorded
    Motion,
}

/// Settings shared by every camera unless overridden
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Gaussian blur kernel size (odd)
    #[serde(default = "default_blur")]
    pub blur: u32,
    #[serde(default = "default_post_motion_wait")]
    pub post_motion_wait_secs: u64,
    /// Global toggle for segment recording
    #[serde(default)]
    pub output_motion_video: bool,
    /// Root for marker files and per-camera segment directories
    #[serde(default = "default_event_path")]
    pub event_path: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_segment_rotation")]
    pub segment_rotation_secs: u64,
    #[serde(default)]
    pub recording_mode: RecordingMode,
    /// Draw boxes around moving regions in recorded frames
    #[serde(default)]
    pub annotate_video: bool,
    /// Emit `MotionEnd` for an event still open at shutdown
    #[serde(default = "default_true")]
    pub end_events_on_shutdown: bool,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_codec")]
    pub video_codec: String,
    #[serde(default = "default_extension")]
    pub video_extension: String,
    #[serde(default)]
    pub segmentation: SegmentationSettings,
}

fn default_blur() -> u32 {
    21
}

fn default_post_motion_wait() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    1500
}

fn default_segment_rotation() -> u64 {
    300 // five minutes
}

fn default_retry_delay() -> u64 {
    2
}

fn default_stats_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_codec() -> String {
    "mpeg4".to_string()
}

fn default_extension() -> String {
    "mp4".to_string()
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `$HOME/events`
pub fn default_event_path() -> PathBuf {
    home_dir().join("events")
}

/// `$HOME/motionwatch.toml`
pub fn default_config_path() -> PathBuf {
    home_dir().join(DEFAULT_CONFIG_FILE)
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            blur: default_blur(),
            post_motion_wait_secs: default_post_motion_wait(),
            output_motion_video: false,
            event_path: default_event_path(),
            queue_capacity: default_queue_capacity(),
            segment_rotation_secs: default_segment_rotation(),
            recording_mode: RecordingMode::default(),
            annotate_video: false,
            end_events_on_shutdown: true,
            retry_delay_secs: default_retry_delay(),
            stats_interval_secs: default_stats_interval(),
            ffmpeg_path: default_ffmpeg(),
            video_codec: default_codec(),
            video_extension: default_extension(),
            segmentation: SegmentationSettings::default(),
        }
    }
}

/// Camera ids may be written as strings or bare integers
#[derive(Deserialize)]
#[serde(untagged)]
enum CameraId {
    Text(String),
    Number(i64),
}

impl From<CameraId> for String {
    fn from(id: CameraId) -> Self {
        match id {
            CameraId::Text(s) => s,
            CameraId::Number(n) => n.to_string(),
        }
    }
}

/// A `[[camera]]` table as written in the file
#[derive(Deserialize)]
struct CameraEntry {
    camera_id: CameraId,
    uri: String,
    area: u32,
    width: u32,
    height: u32,
    fps: u32,
    #[serde(default)]
    regions: String,
    #[serde(default)]
    disabled: bool,
    blur: Option<u32>,
    post_motion_wait_secs: Option<u64>,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    defaults: Defaults,
    #[serde(default)]
    camera: Vec<toml::Value>,
}

/// Fully resolved, immutable per-camera configuration
#[derive(Debug, Clone, Serialize)]
pub struct CameraConfig {
    pub camera_id: String,
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Minimum contour area counted as motion
    pub min_area: u32,
    pub blur_kernel: u32,
    pub post_motion_wait: Duration,
    pub regions: RegionOfInterest,
    pub enabled: bool,
    pub output_video: bool,
    pub event_path: PathBuf,
    pub queue_capacity: usize,
    pub segment_rotation: Duration,
    pub recording_mode: RecordingMode,
    pub annotate: bool,
    pub end_events_on_shutdown: bool,
    pub retry_delay: Duration,
    pub stats_interval: Duration,
    pub ffmpeg_path: String,
    pub video_codec: String,
    pub video_extension: String,
    pub segmentation: SegmentationSettings,
}

impl CameraConfig {
    /// Create a camera with default settings and a full-frame region
    pub fn new(camera_id: impl Into<String>, uri: impl Into<String>, width: u32, height: u32) -> Self {
        Self::from_defaults(camera_id, uri, width, height, &Defaults::default())
    }

    fn from_defaults(
        camera_id: impl Into<String>,
        uri: impl Into<String>,
        width: u32,
        height: u32,
        defaults: &Defaults,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            uri: uri.into(),
            width,
            height,
            fps: 15,
            min_area: 500,
            blur_kernel: defaults.blur,
            post_motion_wait: Duration::from_secs(defaults.post_motion_wait_secs),
            regions: RegionOfInterest::full_frame(width, height),
            enabled: true,
            output_video: defaults.output_motion_video,
            event_path: defaults.event_path.clone(),
            queue_capacity: defaults.queue_capacity,
            segment_rotation: Duration::from_secs(defaults.segment_rotation_secs),
            recording_mode: defaults.recording_mode,
            annotate: defaults.annotate_video,
            end_events_on_shutdown: defaults.end_events_on_shutdown,
            retry_delay: Duration::from_secs(defaults.retry_delay_secs),
            stats_interval: Duration::from_secs(defaults.stats_interval_secs),
            ffmpeg_path: defaults.ffmpeg_path.clone(),
            video_codec: defaults.video_codec.clone(),
            video_extension: defaults.video_extension.clone(),
            segmentation: defaults.segmentation,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_min_area(mut self, area: u32) -> Self {
        self.min_area = area;
        self
    }

    pub fn with_blur(mut self, kernel: u32) -> Self {
        self.blur_kernel = kernel;
        self
    }

    pub fn with_post_motion_wait(mut self, wait: Duration) -> Self {
        self.post_motion_wait = wait;
        self
    }

    pub fn with_regions(mut self, regions: RegionOfInterest) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enable segment recording under `event_path`
    pub fn with_output_video(mut self, event_path: impl Into<PathBuf>) -> Self {
        self.output_video = true;
        self.event_path = event_path.into();
        self
    }

    pub fn with_event_path(mut self, event_path: impl Into<PathBuf>) -> Self {
        self.event_path = event_path.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_segment_rotation(mut self, rotation: Duration) -> Self {
        self.segment_rotation = rotation;
        self
    }

    pub fn with_recording_mode(mut self, mode: RecordingMode) -> Self {
        self.recording_mode = mode;
        self
    }

    pub fn with_annotate(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    pub fn with_end_events_on_shutdown(mut self, end: bool) -> Self {
        self.end_events_on_shutdown = end;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn with_segmentation(mut self, settings: SegmentationSettings) -> Self {
        self.segmentation = settings;
        self
    }

    /// Directory that holds this camera's video segments
    pub fn segment_dir(&self) -> PathBuf {
        self.event_path.join(&self.camera_id)
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.camera_id.trim().is_empty() {
            return Err("camera_id must not be empty".to_string());
        }
        if self.camera_id.contains(&['/', '\\'][..]) || self.camera_id == "." || self.camera_id == ".." {
            return Err(format!("camera_id {:?} must be a plain directory name", self.camera_id));
        }
        if self.uri.trim().is_empty() {
            return Err("uri must not be empty".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid frame size {}x{}", self.width, self.height));
        }
        if self.fps == 0 {
            return Err("fps must be greater than 0".to_string());
        }
        if self.blur_kernel == 0 || self.blur_kernel % 2 == 0 {
            return Err(format!("blur must be a positive odd number, got {}", self.blur_kernel));
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }
        if self.segment_rotation.is_zero() {
            return Err("segment_rotation_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Loaded configuration file
#[derive(Debug)]
pub struct AppConfig {
    pub defaults: Defaults,
    /// Cameras that resolved successfully, in file order
    pub cameras: Vec<CameraConfig>,
    /// Cameras that were rejected, with the reason
    pub rejected: Vec<ConfigError>,
}

impl AppConfig {
    /// Load and resolve a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration text. Only a malformed document is an error;
    /// individual cameras that fail to resolve end up in `rejected`.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        let mut cameras = Vec::new();
        let mut rejected = Vec::new();

        for (index, value) in raw.camera.into_iter().enumerate() {
            match resolve_camera(index, value, &raw.defaults) {
                Ok(camera) => cameras.push(camera),
                Err(e) => rejected.push(e),
            }
        }

        Ok(Self {
            defaults: raw.defaults,
            cameras,
            rejected,
        })
    }

    /// Cameras that should get a pipeline
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter().filter(|c| c.enabled)
    }
}

fn id_hint(value: &toml::Value) -> String {
    match value.get("camera_id") {
        Some(toml::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "?".to_string(),
    }
}

fn resolve_camera(
    index: usize,
    value: toml::Value,
    defaults: &Defaults,
) -> Result<CameraConfig, ConfigError> {
    let hint = id_hint(&value);
    let reject = |message: String| ConfigError::Camera {
        index,
        camera_id: hint.clone(),
        message,
    };

    let entry = value
        .try_into::<CameraEntry>()
        .map_err(|e| reject(e.message().to_string()))?;

    let regions = RegionOfInterest::parse(&entry.regions, entry.width, entry.height)
        .map_err(|e| reject(e.to_string()))?;

    let camera_id: String = entry.camera_id.into();
    let mut camera = CameraConfig::from_defaults(camera_id, entry.uri, entry.width, entry.height, defaults)
        .with_fps(entry.fps)
        .with_min_area(entry.area)
        .with_regions(regions)
        .with_enabled(!entry.disabled);

    if let Some(blur) = entry.blur {
        camera.blur_kernel = blur;
    }
    if let Some(wait) = entry.post_motion_wait_secs {
        camera.post_motion_wait = Duration::from_secs(wait);
    }

    camera.validate().map_err(reject)?;
    Ok(camera)
}
