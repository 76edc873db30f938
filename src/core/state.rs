//! Pipeline lifecycle state and counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lifecycle of a camera pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PipelineState {
    /// Built but not started
    #[default]
    Created,
    /// Both worker threads are running
    Running,
    /// Stop was requested; workers are winding down
    Stopping,
    /// Workers have exited
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Created => write!(f, "created"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Stopping => write!(f, "stopping"),
            PipelineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Live counters for one pipeline, updated by its worker threads
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub captured: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    pub classify_errors: AtomicU64,
    pub source_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub events_started: AtomicU64,
    pub events_ended: AtomicU64,
    pub segments_opened: AtomicU64,
    pub output_errors: AtomicU64,
}

/// Increment a counter and return the new value
pub(crate) fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// Whether the `n`th occurrence of a repeated failure should be logged:
/// the first one, then every power of two.
pub(crate) fn should_log_occurrence(n: u64) -> bool {
    n.is_power_of_two()
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            captured: get(&self.captured),
            dropped: get(&self.dropped),
            processed: get(&self.processed),
            classify_errors: get(&self.classify_errors),
            source_errors: get(&self.source_errors),
            reconnects: get(&self.reconnects),
            events_started: get(&self.events_started),
            events_ended: get(&self.events_ended),
            segments_opened: get(&self.segments_opened),
            output_errors: get(&self.output_errors),
        }
    }
}

/// Plain copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub dropped: u64,
    pub processed: u64,
    pub classify_errors: u64,
    pub source_errors: u64,
    pub reconnects: u64,
    pub events_started: u64,
    pub events_ended: u64,
    pub segments_opened: u64,
    pub output_errors: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "captured={} dropped={} processed={} classify_errors={} events={}/{} segments={}",
            self.captured,
            self.dropped,
            self.processed,
            self.classify_errors,
            self.events_started,
            self.events_ended,
            self.segments_opened
        )
    }
}
