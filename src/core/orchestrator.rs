//! Multi-camera supervisor
//!
//! Builds one [`CameraPipeline`] per enabled camera, starts them together and
//! stops them together. Pipelines never share state, so one camera failing
//! has no effect on the others.

use std::sync::Arc;
use std::time::Duration;

use super::runner::{CameraPipeline, Collaborators};
use super::signal::StopSignal;
use super::state::{PipelineState, StatsSnapshot};
use crate::config::{AppConfig, CameraConfig};

/// How often `run_until` checks whether every pipeline has died on its own
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(500);

/// Owns every camera pipeline
pub struct Orchestrator {
    collaborators: Collaborators,
    pipelines: Vec<CameraPipeline>,
    pipelines_created: u64,
    skipped: Vec<String>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            pipelines: Vec::new(),
            pipelines_created: 0,
            skipped: Vec::new(),
        }
    }

    /// Build pipelines for every enabled camera in `config`.
    /// Rejected cameras are logged and left out.
    pub fn from_config(config: &AppConfig, collaborators: Collaborators) -> Self {
        let mut orchestrator = Self::new(collaborators);
        for err in &config.rejected {
            log::error!("Skipping camera: {}", err);
        }
        for camera in &config.cameras {
            orchestrator.add_camera(camera.clone());
        }
        orchestrator
    }

    /// Create a pipeline for `camera` unless it is disabled.
    /// Returns whether a pipeline was created.
    pub fn add_camera(&mut self, camera: CameraConfig) -> bool {
        if !camera.enabled {
            log::info!("Camera {}: disabled, skipping", camera.camera_id);
            self.skipped.push(camera.camera_id);
            return false;
        }

        let pipeline = CameraPipeline::new(Arc::new(camera), self.collaborators.clone());
        self.pipelines.push(pipeline);
        self.pipelines_created += 1;
        true
    }

    pub fn pipelines(&self) -> &[CameraPipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, camera_id: &str) -> Option<&CameraPipeline> {
        self.pipelines.iter().find(|p| p.camera_id() == camera_id)
    }

    /// Number of pipelines this orchestrator has built
    pub fn pipelines_created(&self) -> u64 {
        self.pipelines_created
    }

    /// Ids of cameras skipped because they are disabled
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Start every pipeline; returns how many started
    pub fn start_all(&self) -> usize {
        let mut started = 0;
        for pipeline in &self.pipelines {
            match pipeline.start() {
                Ok(()) => started += 1,
                Err(e) => log::error!("Camera {}: failed to start: {}", pipeline.camera_id(), e),
            }
        }
        log::info!("Started {} of {} camera pipelines", started, self.pipelines.len());
        started
    }

    /// Signal every pipeline first, then wait for each, so shutdown takes
    /// as long as the slowest camera rather than the sum of all of them.
    pub fn stop_all(&self) {
        for pipeline in &self.pipelines {
            pipeline.request_stop();
        }
        self.join_all();
    }

    pub fn join_all(&self) {
        for pipeline in &self.pipelines {
            pipeline.join();
        }
    }

    /// Start everything, wait for `stop` (or for every pipeline to die),
    /// then stop everything
    pub fn run_until(&self, stop: &StopSignal) {
        if self.start_all() == 0 {
            log::warn!("No camera pipelines running");
            return;
        }

        while !stop.wait_timeout(SUPERVISE_INTERVAL) {
            let alive = self
                .pipelines
                .iter()
                .any(|p| p.state() == PipelineState::Running && !p.is_finished());
            if !alive {
                log::warn!("Every camera pipeline has exited");
                break;
            }
        }

        log::info!("Shutting down {} camera pipelines", self.pipelines.len());
        self.stop_all();
        for (camera_id, stats) in self.stats() {
            log::info!("Camera {}: final {}", camera_id, stats);
        }
    }

    /// Per-camera counters
    pub fn stats(&self) -> Vec<(String, StatsSnapshot)> {
        self.pipelines
            .iter()
            .map(|p| (p.camera_id().to_string(), p.stats()))
            .collect()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_all();
    }
}
