//! End-to-end pipeline tests with scripted collaborators

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeDelta};
use crossbeam_channel::{unbounded, Receiver};
use image::{GrayImage, Luma, Rgb, RgbImage};
use parking_lot::Mutex;

use motionwatch::config::{CameraConfig, RecordingMode};
use motionwatch::core::{
    CameraPipeline, ChannelSink, Collaborators, EventKind, EventMarker, MarkerFileSink, Orchestrator,
    PipelineState, StopSignal,
};
use motionwatch::error::{ClassifyError, RecorderError, SourceError};
use motionwatch::recording::{SegmentWriter, SegmentWriterFactory};
use motionwatch::vision::{
    Frame, FrameSource, FrameSourceFactory, SegmentationEngine, SegmentationFactory, SegmentationSettings,
    SourceRead,
};

const SIZE: u32 = 16;

fn base_time() -> DateTime<Local> {
    Local::now() - TimeDelta::hours(1)
}

fn at(base: DateTime<Local>, secs: i64) -> DateTime<Local> {
    base + TimeDelta::seconds(secs)
}

/// 16x16 frame, with a bright 6x6 block when `motion` is set
fn frame(seq: u64, captured_at: DateTime<Local>, motion: bool) -> Frame {
    let mut image = RgbImage::new(SIZE, SIZE);
    if motion {
        for y in 4..10 {
            for x in 4..10 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
    }
    Frame::new(image, captured_at, seq)
}

fn camera(id: &str) -> CameraConfig {
    CameraConfig::new(id, format!("test://{}", id), SIZE, SIZE)
        .with_blur(1)
        .with_min_area(16)
        .with_post_motion_wait(Duration::from_secs(5))
        .with_retry_delay(Duration::from_millis(20))
        .with_stats_interval(Duration::ZERO)
}

fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Plays queued frames, then reports `Pending` forever
struct ScriptedSource {
    script: Arc<Mutex<VecDeque<Frame>>>,
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<SourceRead, SourceError> {
        match self.script.lock().pop_front() {
            Some(frame) => Ok(SourceRead::Frame(frame)),
            None => {
                thread::sleep(Duration::from_millis(2));
                Ok(SourceRead::Pending)
            }
        }
    }

    fn close(&mut self) {}
}

#[derive(Default)]
struct ScriptedFactory {
    script: Arc<Mutex<VecDeque<Frame>>>,
    opened: Mutex<Vec<String>>,
    failures_left: AtomicUsize,
    panic_for: Option<String>,
}

impl ScriptedFactory {
    fn with_frames(frames: Vec<Frame>) -> Self {
        Self {
            script: Arc::new(Mutex::new(frames.into())),
            ..Default::default()
        }
    }
}

impl FrameSourceFactory for ScriptedFactory {
    fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        if self.panic_for.as_deref() == Some(camera.camera_id.as_str()) {
            panic!("decoder crashed for {}", camera.camera_id);
        }
        self.opened.lock().push(camera.camera_id.clone());
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Open {
                uri: camera.uri.clone(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "camera offline"),
            });
        }
        Ok(Box::new(ScriptedSource {
            script: self.script.clone(),
        }))
    }
}

/// Produces a new frame on every read
struct EndlessSource {
    seq: u64,
}

impl FrameSource for EndlessSource {
    fn read(&mut self) -> Result<SourceRead, SourceError> {
        self.seq += 1;
        Ok(SourceRead::Frame(frame(self.seq, Local::now(), false)))
    }

    fn close(&mut self) {}
}

struct EndlessFactory;

impl FrameSourceFactory for EndlessFactory {
    fn open(&self, _camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        Ok(Box::new(EndlessSource { seq: 0 }))
    }
}

enum Step {
    Corrupt,
    Frame(Frame),
    End,
}

/// Replays one script per open, then idles
struct SessionSource {
    steps: VecDeque<Step>,
}

impl FrameSource for SessionSource {
    fn read(&mut self) -> Result<SourceRead, SourceError> {
        match self.steps.pop_front() {
            Some(Step::Corrupt) => Err(SourceError::Decode("truncated packet".into())),
            Some(Step::Frame(frame)) => Ok(SourceRead::Frame(frame)),
            Some(Step::End) => Ok(SourceRead::EndOfStream),
            None => {
                thread::sleep(Duration::from_millis(2));
                Ok(SourceRead::Pending)
            }
        }
    }

    fn close(&mut self) {}
}

#[derive(Default)]
struct SessionFactory {
    sessions: Mutex<VecDeque<Vec<Step>>>,
    opens: AtomicUsize,
}

impl FrameSourceFactory for SessionFactory {
    fn open(&self, _camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let steps = self.sessions.lock().pop_front().unwrap_or_default();
        Ok(Box::new(SessionSource { steps: steps.into() }))
    }
}

/// Bright pixels are foreground
struct ThresholdEngine {
    delay: Duration,
}

impl SegmentationEngine for ThresholdEngine {
    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage, ClassifyError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let mut mask = GrayImage::new(frame.width(), frame.height());
        for (x, y, p) in frame.enumerate_pixels() {
            if p[0] > 128 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        Ok(mask)
    }

    fn reset(&mut self) {}
}

#[derive(Default)]
struct ThresholdFactory {
    delay: Duration,
}

impl SegmentationFactory for ThresholdFactory {
    fn create(&self, _settings: &SegmentationSettings) -> Box<dyn SegmentationEngine> {
        Box::new(ThresholdEngine { delay: self.delay })
    }
}

#[derive(Default)]
struct WriterLog {
    opened: Vec<PathBuf>,
    finished: Vec<(PathBuf, usize)>,
}

struct MemoryWriter {
    path: PathBuf,
    frames: usize,
    log: Arc<Mutex<WriterLog>>,
}

impl SegmentWriter for MemoryWriter {
    fn write(&mut self, _frame: &RgbImage) -> Result<(), RecorderError> {
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), RecorderError> {
        self.log.lock().finished.push((self.path.clone(), self.frames));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryWriters {
    log: Arc<Mutex<WriterLog>>,
}

impl SegmentWriterFactory for MemoryWriters {
    fn create(&self, path: &Path, _camera: &CameraConfig) -> Result<Box<dyn SegmentWriter>, RecorderError> {
        self.log.lock().opened.push(path.to_path_buf());
        Ok(Box::new(MemoryWriter {
            path: path.to_path_buf(),
            frames: 0,
            log: self.log.clone(),
        }))
    }
}

fn collaborators(
    sources: Arc<dyn FrameSourceFactory>,
    writers: Arc<MemoryWriters>,
) -> (Collaborators, Receiver<EventMarker>) {
    let (tx, rx) = unbounded();
    let collaborators = Collaborators {
        sources,
        segmentation: Arc::new(ThresholdFactory::default()),
        writers,
        events: Arc::new(ChannelSink::new(tx)),
    };
    (collaborators, rx)
}

fn next_event(rx: &Receiver<EventMarker>) -> EventMarker {
    rx.recv_timeout(Duration::from_secs(5)).expect("expected a motion event")
}

#[test]
fn test_motion_event_end_to_end() {
    let base = base_time();
    let mut frames = vec![frame(0, at(base, 0), true)];
    for s in 1..=7 {
        frames.push(frame(s as u64, at(base, s), false));
    }
    let (collab, rx) = collaborators(
        Arc::new(ScriptedFactory::with_frames(frames)),
        Arc::new(MemoryWriters::default()),
    );

    let pipeline = CameraPipeline::new(Arc::new(camera("1")), collab);
    pipeline.start().unwrap();

    let start = next_event(&rx);
    assert_eq!(start.camera_id, "1");
    assert_eq!(start.kind, EventKind::Started);
    assert_eq!(start.at, at(base, 0));

    let end = next_event(&rx);
    assert_eq!(end.kind, EventKind::Ended);
    assert_eq!(end.at, at(base, 6));

    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().processed == 8));
    pipeline.stop();
    assert!(rx.try_recv().is_err(), "idle pipeline must not emit on shutdown");

    let stats = pipeline.stats();
    assert_eq!(stats.captured, 8);
    assert_eq!(stats.events_started, 1);
    assert_eq!(stats.events_ended, 1);
}

#[test]
fn test_shutdown_ends_open_event() {
    let base = base_time();
    let frames = vec![frame(0, at(base, 0), true), frame(1, at(base, 1), true)];
    let (collab, rx) = collaborators(
        Arc::new(ScriptedFactory::with_frames(frames)),
        Arc::new(MemoryWriters::default()),
    );

    let pipeline = CameraPipeline::new(Arc::new(camera("1")), collab);
    pipeline.start().unwrap();
    assert_eq!(next_event(&rx).kind, EventKind::Started);
    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().processed == 2));

    pipeline.stop();
    let end = next_event(&rx);
    assert_eq!(end.kind, EventKind::Ended);
    assert!(end.at >= at(base, 1));
}

#[test]
fn test_shutdown_policy_can_leave_event_open() {
    let base = base_time();
    let frames = vec![frame(0, at(base, 0), true)];
    let (collab, rx) = collaborators(
        Arc::new(ScriptedFactory::with_frames(frames)),
        Arc::new(MemoryWriters::default()),
    );

    let cam = camera("1").with_end_events_on_shutdown(false);
    let pipeline = CameraPipeline::new(Arc::new(cam), collab);
    pipeline.start().unwrap();
    assert_eq!(next_event(&rx).kind, EventKind::Started);
    pipeline.stop();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_stop_twice_returns_promptly() {
    let (collab, _rx) = collaborators(
        Arc::new(ScriptedFactory::default()),
        Arc::new(MemoryWriters::default()),
    );
    let pipeline = CameraPipeline::new(Arc::new(camera("1")), collab);
    pipeline.start().unwrap();

    let start = Instant::now();
    pipeline.stop();
    pipeline.stop();
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_overflow_drops_without_blocking() {
    let (mut collab, _rx) = collaborators(Arc::new(EndlessFactory), Arc::new(MemoryWriters::default()));
    collab = collab.with_segmentation(Arc::new(ThresholdFactory {
        delay: Duration::from_millis(5),
    }));

    let cam = camera("1").with_queue_capacity(4);
    let pipeline = CameraPipeline::new(Arc::new(cam), collab);
    pipeline.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().dropped > 0));
    assert!(pipeline.queued() <= 4);

    let start = Instant::now();
    pipeline.stop();
    assert!(start.elapsed() < Duration::from_secs(3));

    let stats = pipeline.stats();
    assert!(stats.processed > 0);
    assert!(stats.processed + stats.dropped <= stats.captured);
}

#[test]
fn test_source_open_retries() {
    let base = base_time();
    let factory = Arc::new(ScriptedFactory::with_frames(vec![frame(0, at(base, 0), false)]));
    factory.failures_left.store(2, Ordering::SeqCst);
    let (collab, _rx) = collaborators(factory.clone(), Arc::new(MemoryWriters::default()));

    let pipeline = CameraPipeline::new(Arc::new(camera("1")), collab);
    pipeline.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().processed == 1));
    pipeline.stop();

    let stats = pipeline.stats();
    assert_eq!(stats.source_errors, 2);
    assert!(stats.reconnects >= 2);
    assert_eq!(factory.opened.lock().len(), 3);
}

#[test]
fn test_stream_end_reopens_and_skips_corrupt_frames() {
    let base = base_time();
    let factory = Arc::new(SessionFactory::default());
    factory.sessions.lock().extend([
        vec![Step::Corrupt, Step::Frame(frame(0, at(base, 0), false)), Step::End],
        vec![Step::Frame(frame(1, at(base, 1), false))],
    ]);
    let (collab, _rx) = collaborators(factory.clone(), Arc::new(MemoryWriters::default()));

    let pipeline = CameraPipeline::new(Arc::new(camera("1")), collab);
    pipeline.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().processed == 2));
    pipeline.stop();

    let stats = pipeline.stats();
    assert_eq!(stats.captured, 2);
    assert_eq!(stats.source_errors, 1);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn test_segments_rotate() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_time();
    let frames = (0..6).map(|s| frame(s as u64, at(base, s), false)).collect();
    let writers = Arc::new(MemoryWriters::default());
    let (collab, _rx) = collaborators(Arc::new(ScriptedFactory::with_frames(frames)), writers.clone());

    let cam = camera("cam")
        .with_output_video(dir.path())
        .with_segment_rotation(Duration::from_secs(2));
    let pipeline = CameraPipeline::new(Arc::new(cam), collab);
    pipeline.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().processed == 6));
    pipeline.stop();

    let log = writers.log.lock();
    assert_eq!(log.opened.len(), 2);
    let expected = dir
        .path()
        .join("cam")
        .join(format!("{}.mp4", at(base, 0).format("%Y%m%dT%H%M%S")));
    assert_eq!(log.opened[0], expected);
    assert_eq!(log.finished.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec![3, 3]);
    assert_eq!(pipeline.stats().segments_opened, 2);
}

#[test]
fn test_motion_mode_records_only_events() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_time();
    let frames = vec![
        frame(0, at(base, 0), false),
        frame(1, at(base, 1), true),
        frame(2, at(base, 2), false),
        frame(3, at(base, 8), false),
        frame(4, at(base, 9), false),
    ];
    let writers = Arc::new(MemoryWriters::default());
    let (collab, _rx) = collaborators(Arc::new(ScriptedFactory::with_frames(frames)), writers.clone());

    let cam = camera("cam")
        .with_output_video(dir.path())
        .with_recording_mode(RecordingMode::Motion);
    let pipeline = CameraPipeline::new(Arc::new(cam), collab);
    pipeline.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().processed == 5));
    pipeline.stop();

    let log = writers.log.lock();
    assert_eq!(log.opened.len(), 1);
    // Active at t=1, cooling at t=2, idle again at t=8
    assert_eq!(log.finished[0].1, 2);
}

#[test]
fn test_marker_files_written() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_time();
    let frames = vec![
        frame(0, at(base, 0), true),
        frame(1, at(base, 1), false),
        frame(2, at(base, 2), false),
    ];
    let (mut collab, _rx) = collaborators(
        Arc::new(ScriptedFactory::with_frames(frames)),
        Arc::new(MemoryWriters::default()),
    );
    collab = collab.with_events(Arc::new(MarkerFileSink::new(dir.path())));

    let cam = camera("7").with_post_motion_wait(Duration::from_secs(1));
    let pipeline = CameraPipeline::new(Arc::new(cam), collab);
    pipeline.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || pipeline.stats().events_ended == 1));
    pipeline.stop();

    let start = dir
        .path()
        .join(format!("7_MotionStart_{}.txt", at(base, 0).format("%Y_%m_%d_%H_%M_%S")));
    let end = dir
        .path()
        .join(format!("7_MotionEnd_{}.txt", at(base, 2).format("%Y_%m_%d_%H_%M_%S")));
    assert!(start.exists(), "missing {:?}", start);
    assert!(end.exists(), "missing {:?}", end);
}

#[test]
fn test_disabled_camera_never_runs() {
    let factory = Arc::new(ScriptedFactory::default());
    let (collab, _rx) = collaborators(factory.clone(), Arc::new(MemoryWriters::default()));

    let mut orchestrator = Orchestrator::new(collab);
    orchestrator.add_camera(camera("on"));
    orchestrator.add_camera(camera("off").with_enabled(false));
    assert_eq!(orchestrator.pipelines_created(), 1);

    assert_eq!(orchestrator.start_all(), 1);
    assert!(wait_for(Duration::from_secs(5), || !factory.opened.lock().is_empty()));
    orchestrator.stop_all();

    assert_eq!(*factory.opened.lock(), vec!["on".to_string()]);
}

#[test]
fn test_panicking_camera_is_isolated() {
    let base = base_time();
    let factory = Arc::new(ScriptedFactory {
        panic_for: Some("bad".to_string()),
        ..ScriptedFactory::with_frames(vec![frame(0, at(base, 0), true)])
    });
    let (collab, rx) = collaborators(factory, Arc::new(MemoryWriters::default()));

    let mut orchestrator = Orchestrator::new(collab);
    orchestrator.add_camera(camera("bad"));
    orchestrator.add_camera(camera("good"));
    assert_eq!(orchestrator.start_all(), 2);

    let bad = orchestrator.pipeline("bad").unwrap();
    assert!(wait_for(Duration::from_secs(5), || bad.is_finished()));

    let event = next_event(&rx);
    assert_eq!(event.camera_id, "good");
    assert_eq!(orchestrator.pipeline("good").unwrap().state(), PipelineState::Running);

    orchestrator.stop_all();
    for pipeline in orchestrator.pipelines() {
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}

#[test]
fn test_run_until_stop_signal() {
    let (collab, _rx) = collaborators(
        Arc::new(ScriptedFactory::default()),
        Arc::new(MemoryWriters::default()),
    );
    let mut orchestrator = Orchestrator::new(collab);
    orchestrator.add_camera(camera("a"));
    orchestrator.add_camera(camera("b"));

    let stop = StopSignal::new();
    let trigger = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            stop.trigger();
        })
    };

    let start = Instant::now();
    orchestrator.run_until(&stop);
    trigger.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    for pipeline in orchestrator.pipelines() {
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}
