//! Per-camera pipeline runner
//!
//! Each pipeline runs two threads: ingestion (source -> queue) and
//! processing (queue -> classifier -> state machine -> sink/recorder).
//! Everything a pipeline mutates is owned by one of those two threads.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::{Condvar, Mutex};

use super::events::{EventKind, EventMarker, EventSink, MarkerFileSink};
use super::signal::StopSignal;
use super::state::{bump, should_log_occurrence, PipelineState, PipelineStats, StatsSnapshot};
use crate::config::CameraConfig;
use crate::error::PipelineError;
use crate::recording::{FfmpegWriterFactory, SegmentRecorder, SegmentWriterFactory};
use crate::vision::capture::{FfmpegSourceFactory, Frame, FrameSource, FrameSourceFactory, SourceCloser, SourceRead};
use crate::vision::detector::MotionClassifier;
use crate::vision::motion::{MotionStateMachine, MotionTransition};
use crate::vision::queue::{FrameQueue, PopTimeout, PushOutcome};
use crate::vision::segmentation::{RunningAverageFactory, SegmentationFactory};

/// How long the processing thread blocks on the queue before re-checking the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Back-off after a source reports no frame yet
const PENDING_BACKOFF: Duration = Duration::from_millis(10);

/// External collaborators shared by every pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub sources: Arc<dyn FrameSourceFactory>,
    pub segmentation: Arc<dyn SegmentationFactory>,
    pub writers: Arc<dyn SegmentWriterFactory>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    /// ffmpeg decode and encode, running-average segmentation, marker files in `event_dir`
    pub fn ffmpeg(event_dir: impl Into<PathBuf>) -> Self {
        Self {
            sources: Arc::new(FfmpegSourceFactory),
            segmentation: Arc::new(RunningAverageFactory),
            writers: Arc::new(FfmpegWriterFactory),
            events: Arc::new(MarkerFileSink::new(event_dir)),
        }
    }

    pub fn with_sources(mut self, sources: Arc<dyn FrameSourceFactory>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_segmentation(mut self, segmentation: Arc<dyn SegmentationFactory>) -> Self {
        self.segmentation = segmentation;
        self
    }

    pub fn with_writers(mut self, writers: Arc<dyn SegmentWriterFactory>) -> Self {
        self.writers = writers;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

/// State shared between a pipeline handle and its worker threads
struct Shared {
    camera: Arc<CameraConfig>,
    stop: StopSignal,
    queue: FrameQueue<Frame>,
    stats: Arc<PipelineStats>,
    closer: Mutex<Option<SourceCloser>>,
}

impl Shared {
    /// Ask both workers to exit and unblock whichever is waiting
    fn abort(&self) {
        self.stop.trigger();
        self.queue.close();
        let closer = self.closer.lock().clone();
        if let Some(closer) = closer {
            closer.close();
        }
    }
}

/// One camera's ingestion and processing threads
pub struct CameraPipeline {
    camera: Arc<CameraConfig>,
    collaborators: Collaborators,
    shared: Arc<Shared>,
    state: Mutex<PipelineState>,
    state_changed: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CameraPipeline {
    pub fn new(camera: Arc<CameraConfig>, collaborators: Collaborators) -> Self {
        let shared = Arc::new(Shared {
            camera: camera.clone(),
            stop: StopSignal::new(),
            queue: FrameQueue::new(camera.queue_capacity),
            stats: Arc::new(PipelineStats::new()),
            closer: Mutex::new(None),
        });

        Self {
            camera,
            collaborators,
            shared,
            state: Mutex::new(PipelineState::Created),
            state_changed: Condvar::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn camera_id(&self) -> &str {
        &self.camera.camera_id
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Frames waiting to be processed
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether both worker threads have exited on their own
    pub fn is_finished(&self) -> bool {
        let workers = self.workers.lock();
        !workers.is_empty() && workers.iter().all(|h| h.is_finished())
    }

    /// Spawn the ingestion and processing threads
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if *state != PipelineState::Created {
            return Err(PipelineError::InvalidState {
                camera_id: self.camera.camera_id.clone(),
                state: state.to_string(),
            });
        }

        let camera = &self.camera;
        let engine = self.collaborators.segmentation.create(&camera.segmentation);
        let classifier = MotionClassifier::new(
            camera.regions.to_mask(camera.width, camera.height),
            camera.blur_kernel,
            camera.min_area,
            engine,
        );
        let machine = MotionStateMachine::new(camera.post_motion_wait);
        let recorder = SegmentRecorder::new(
            camera.clone(),
            self.collaborators.writers.clone(),
            self.shared.stats.clone(),
        );

        let processing = {
            let shared = self.shared.clone();
            let events = self.collaborators.events.clone();
            let worker = ProcessingWorker {
                classifier,
                machine,
                recorder,
                events,
                last_frame_at: None,
            };
            thread::Builder::new()
                .name(format!("process-{}", camera.camera_id))
                .spawn(move || guarded(&shared, "processing", |s| worker.run(s)))
                .map_err(|source| PipelineError::Spawn {
                    camera_id: camera.camera_id.clone(),
                    task: "processing",
                    source,
                })?
        };

        let ingestion = {
            let shared = self.shared.clone();
            let sources = self.collaborators.sources.clone();
            thread::Builder::new()
                .name(format!("ingest-{}", camera.camera_id))
                .spawn(move || guarded(&shared, "ingestion", |s| run_ingestion(s, sources.as_ref())))
        };

        let ingestion = match ingestion {
            Ok(handle) => handle,
            Err(source) => {
                self.shared.abort();
                let _ = processing.join();
                *state = PipelineState::Stopped;
                self.state_changed.notify_all();
                return Err(PipelineError::Spawn {
                    camera_id: camera.camera_id.clone(),
                    task: "ingestion",
                    source,
                });
            }
        };

        self.workers.lock().extend([ingestion, processing]);
        *state = PipelineState::Running;
        log::info!(
            "Camera {}: pipeline started ({}x{} @ {} fps, queue {})",
            camera.camera_id,
            camera.width,
            camera.height,
            camera.fps,
            self.shared.queue.capacity()
        );
        Ok(())
    }

    /// Signal both threads to exit without waiting for them
    pub fn request_stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                PipelineState::Created => {
                    *state = PipelineState::Stopped;
                    self.state_changed.notify_all();
                    return;
                }
                PipelineState::Running => {
                    *state = PipelineState::Stopping;
                    log::info!("Camera {}: stopping", self.camera.camera_id);
                }
                PipelineState::Stopping | PipelineState::Stopped => {}
            }
        }
        self.shared.abort();
    }

    /// Stop the pipeline and wait for its threads. Safe to call repeatedly.
    pub fn stop(&self) {
        self.request_stop();
        self.join();
    }

    /// Block until both threads have exited
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());

        if handles.is_empty() {
            // Either never started or another caller is joining
            let mut state = self.state.lock();
            while matches!(*state, PipelineState::Running | PipelineState::Stopping) {
                self.state_changed.wait(&mut state);
            }
            return;
        }

        for handle in handles {
            if handle.join().is_err() {
                log::error!("Camera {}: worker thread panicked", self.camera.camera_id);
            }
        }

        let mut state = self.state.lock();
        if *state != PipelineState::Stopped {
            *state = PipelineState::Stopped;
            log::info!(
                "Camera {}: pipeline stopped ({})",
                self.camera.camera_id,
                self.shared.stats.snapshot()
            );
        }
        self.state_changed.notify_all();
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run a worker body, containing any panic to this pipeline
fn guarded<F>(shared: &Shared, task: &str, body: F)
where
    F: FnOnce(&Shared),
{
    if panic::catch_unwind(AssertUnwindSafe(|| body(shared))).is_err() {
        log::error!(
            "Camera {}: {} thread panicked, shutting the pipeline down",
            shared.camera.camera_id,
            task
        );
        shared.abort();
    }
}

/// Ingestion loop: open, pump frames, reopen after a delay on stream loss
fn run_ingestion(shared: &Shared, sources: &dyn FrameSourceFactory) {
    let camera = &shared.camera;

    while !shared.stop.is_set() {
        let mut source = match sources.open(camera) {
            Ok(source) => source,
            Err(e) => {
                bump(&shared.stats.source_errors);
                log::warn!(
                    "Camera {}: {} (retrying in {:?})",
                    camera.camera_id,
                    e,
                    camera.retry_delay
                );
                if shared.stop.wait_timeout(camera.retry_delay) {
                    break;
                }
                bump(&shared.stats.reconnects);
                continue;
            }
        };

        *shared.closer.lock() = source.closer();
        if shared.stop.is_set() {
            source.close();
            break;
        }
        log::info!("Camera {}: stream opened", camera.camera_id);

        let reopen = pump(shared, source.as_mut());
        source.close();
        *shared.closer.lock() = None;

        if !reopen || shared.stop.wait_timeout(camera.retry_delay) {
            break;
        }
        bump(&shared.stats.reconnects);
        log::info!("Camera {}: reconnecting", camera.camera_id);
    }

    shared.queue.close();
    log::debug!("Camera {}: ingestion exited", camera.camera_id);
}

/// Read frames until the stream ends (returns `true`) or the pipeline stops
fn pump(shared: &Shared, source: &mut dyn FrameSource) -> bool {
    let camera = &shared.camera;
    let stats = &shared.stats;

    loop {
        if shared.stop.is_set() {
            return false;
        }

        match source.read() {
            Ok(SourceRead::Frame(frame)) => {
                bump(&stats.captured);
                match shared.queue.push(frame) {
                    PushOutcome::Queued => {}
                    PushOutcome::Dropped => {
                        let n = bump(&stats.dropped);
                        log::debug!("Camera {}: queue full, dropped frame ({} total)", camera.camera_id, n);
                    }
                    PushOutcome::Closed => return false,
                }
            }
            Ok(SourceRead::Pending) => {
                if shared.stop.wait_timeout(PENDING_BACKOFF) {
                    return false;
                }
            }
            Ok(SourceRead::EndOfStream) => {
                if !shared.stop.is_set() {
                    log::warn!("Camera {}: stream ended", camera.camera_id);
                }
                return true;
            }
            Err(e) if e.is_transient() => {
                let n = bump(&stats.source_errors);
                if should_log_occurrence(n) {
                    log::warn!("Camera {}: skipped frame: {} ({} errors)", camera.camera_id, e, n);
                }
                if shared.stop.wait_timeout(PENDING_BACKOFF) {
                    return false;
                }
            }
            Err(e) => {
                bump(&stats.source_errors);
                if !shared.stop.is_set() {
                    log::warn!("Camera {}: stream failed: {}", camera.camera_id, e);
                }
                return true;
            }
        }
    }
}

/// Everything the processing thread owns
struct ProcessingWorker {
    classifier: MotionClassifier,
    machine: MotionStateMachine,
    recorder: SegmentRecorder,
    events: Arc<dyn EventSink>,
    last_frame_at: Option<DateTime<Local>>,
}

impl ProcessingWorker {
    fn run(mut self, shared: &Shared) {
        let camera = &shared.camera;
        let mut reporter = StatsReporter::new(camera.stats_interval);

        while !shared.stop.is_set() {
            match shared.queue.pop_timeout(POLL_INTERVAL) {
                PopTimeout::Item(frame) => {
                    if shared.stop.is_set() {
                        break;
                    }
                    self.process(shared, &frame);
                }
                PopTimeout::TimedOut => {}
                PopTimeout::Closed => break,
            }
            reporter.tick(&camera.camera_id, &shared.stats);
        }

        if camera.end_events_on_shutdown {
            // Never stamp the end before the last frame we saw
            let now = Local::now();
            let at = self.last_frame_at.map_or(now, |last| last.max(now));
            if let Some(transition) = self.machine.force_end(at) {
                log::info!("Camera {}: ending open motion event on shutdown", camera.camera_id);
                self.emit(shared, transition);
            }
        } else if self.machine.in_event() {
            log::info!("Camera {}: motion event still open at shutdown", camera.camera_id);
        }

        self.recorder.finish();
        log::debug!("Camera {}: processing exited", camera.camera_id);
    }

    fn process(&mut self, shared: &Shared, frame: &Frame) {
        let outcome = self.classifier.detect(&frame.image);
        bump(&shared.stats.processed);

        if let Err(e) = &outcome {
            let n = bump(&shared.stats.classify_errors);
            if should_log_occurrence(n) {
                log::warn!(
                    "Camera {}: frame {} not classified: {} ({} errors)",
                    shared.camera.camera_id,
                    frame.sequence,
                    e,
                    n
                );
            }
        }

        if let Some(transition) = self.machine.observe(&outcome, frame.captured_at) {
            self.emit(shared, transition);
        }
        self.last_frame_at = Some(frame.captured_at);

        let regions = outcome.map(|d| d.regions).unwrap_or_default();
        self.recorder.on_frame(frame, &regions, self.machine.phase());
    }

    fn emit(&self, shared: &Shared, transition: MotionTransition) {
        match transition.kind {
            EventKind::Started => bump(&shared.stats.events_started),
            EventKind::Ended => bump(&shared.stats.events_ended),
        };
        log::info!(
            "Camera {}: motion {} at {}",
            shared.camera.camera_id,
            transition.kind,
            transition.at.format("%Y-%m-%d %H:%M:%S")
        );
        self.events
            .emit(&EventMarker::new(shared.camera.camera_id.clone(), transition.kind, transition.at));
    }
}

/// Periodic one-line stats log
struct StatsReporter {
    interval: Duration,
    last: Instant,
    last_dropped: u64,
}

impl StatsReporter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
            last_dropped: 0,
        }
    }

    fn tick(&mut self, camera_id: &str, stats: &PipelineStats) {
        if self.interval.is_zero() || self.last.elapsed() < self.interval {
            return;
        }
        self.last = Instant::now();

        let snapshot = stats.snapshot();
        log::info!("Camera {}: {}", camera_id, snapshot);

        let dropped = snapshot.dropped - self.last_dropped;
        if dropped > 0 {
            log::warn!(
                "Camera {}: dropped {} frames in the last {:?}, processing is falling behind",
                camera_id,
                dropped,
                self.interval
            );
        }
        self.last_dropped = snapshot.dropped;
    }
}
