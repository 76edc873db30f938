//! Motion event markers
//!
//! Every motion transition produces one marker. The default sink writes a
//! zero-byte file whose name carries the camera, the transition kind and the
//! time to the second.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use serde::Serialize;

/// Kind of motion transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// Idle -> Active
    Started,
    /// Cooling -> Idle (or forced on shutdown)
    Ended,
}

impl EventKind {
    /// Tag used in marker file names
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::Started => "MotionStart",
            EventKind::Ended => "MotionEnd",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Started => write!(f, "started"),
            EventKind::Ended => write!(f, "ended"),
        }
    }
}

/// Write-once record of a motion transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventMarker {
    pub camera_id: String,
    pub kind: EventKind,
    pub at: DateTime<Local>,
}

impl EventMarker {
    pub fn new(camera_id: impl Into<String>, kind: EventKind, at: DateTime<Local>) -> Self {
        Self {
            camera_id: camera_id.into(),
            kind,
            at,
        }
    }

    /// `<camera_id>_MotionStart_<YYYY_MM_DD_HH_MM_SS>.txt` and the `MotionEnd` equivalent
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.txt",
            self.camera_id,
            self.kind.tag(),
            self.at.format("%Y_%m_%d_%H_%M_%S")
        )
    }
}

/// Receives motion markers.
///
/// Emission is fire-and-forget: implementations log their own failures and
/// never report them back to the processing loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, marker: &EventMarker);
}

/// Writes one empty marker file per event into a directory
#[derive(Debug, Clone)]
pub struct MarkerFileSink {
    dir: PathBuf,
}

impl MarkerFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the marker file for `marker`
    pub fn path_for(&self, marker: &EventMarker) -> PathBuf {
        self.dir.join(marker.file_name())
    }
}

impl EventSink for MarkerFileSink {
    fn emit(&self, marker: &EventMarker) {
        let path = self.path_for(marker);
        let result = std::fs::create_dir_all(&self.dir).and_then(|_| {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .map(|_| ())
        });

        match result {
            Ok(()) => log::debug!("Camera {}: motion {} -> {:?}", marker.camera_id, marker.kind, path),
            Err(e) => log::error!(
                "Camera {}: failed to write marker {:?}: {}",
                marker.camera_id,
                path,
                e
            ),
        }
    }
}

/// Forwards markers over a channel, for embedding applications
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<EventMarker>,
}

impl ChannelSink {
    pub fn new(tx: Sender<EventMarker>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, marker: &EventMarker) {
        if self.tx.try_send(marker.clone()).is_err() {
            log::warn!(
                "Camera {}: event listener unavailable, dropped motion {}",
                marker.camera_id,
                marker.kind
            );
        }
    }
}

/// Sends every marker to several sinks
#[derive(Default)]
pub struct EventFanout {
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for EventFanout {
    fn emit(&self, marker: &EventMarker) {
        for sink in &self.sinks {
            sink.emit(marker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossbeam_channel::{bounded, unbounded};

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_marker_file_names() {
        let start = EventMarker::new("3", EventKind::Started, at());
        assert_eq!(start.file_name(), "3_MotionStart_2024_03_09_14_05_07.txt");
        let end = EventMarker::new("3", EventKind::Ended, at());
        assert_eq!(end.file_name(), "3_MotionEnd_2024_03_09_14_05_07.txt");
    }

    #[test]
    fn test_file_sink_writes_empty_marker() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MarkerFileSink::new(dir.path().join("events"));
        let marker = EventMarker::new("cam", EventKind::Started, at());
        sink.emit(&marker);

        let path = sink.path_for(&marker);
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_file_sink_failure_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let sink = MarkerFileSink::new(&blocker);
        sink.emit(&EventMarker::new("cam", EventKind::Ended, at()));
    }

    #[test]
    fn test_channel_sink_and_fanout() {
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = bounded(0);
        let fanout = EventFanout::new()
            .with_sink(ChannelSink::new(tx_a))
            .with_sink(ChannelSink::new(tx_b));
        assert_eq!(fanout.len(), 2);

        fanout.emit(&EventMarker::new("1", EventKind::Started, at()));
        assert_eq!(rx_a.try_recv().unwrap().kind, EventKind::Started);
        // Rendezvous channel with no reader: dropped, not blocked
        assert!(rx_b.try_recv().is_err());
    }
}
