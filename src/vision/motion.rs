//! Motion hysteresis
//!
//! Converts the classifier's noisy per-frame booleans into discrete motion
//! events. A grace period ("post-motion wait") after the last positive frame
//! keeps short gaps from splitting one event into several.

use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;

use super::detector::Detection;
use crate::core::events::EventKind;
use crate::error::ClassifyError;

/// Hysteresis phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MotionPhase {
    /// No motion in progress
    #[default]
    Idle,
    /// Motion is being detected
    Active,
    /// Motion stopped; waiting out the grace period
    Cooling,
}

/// Full motion state, owned by one processing thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotionState {
    pub phase: MotionPhase,
    /// Last frame that showed motion
    pub last_motion_at: Option<DateTime<Local>>,
    /// When the current grace period started
    pub cooling_since: Option<DateTime<Local>>,
}

/// A state change that produces an event marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionTransition {
    pub kind: EventKind,
    pub at: DateTime<Local>,
}

/// Hysteresis state machine
#[derive(Debug, Clone)]
pub struct MotionStateMachine {
    state: MotionState,
    post_motion_wait: TimeDelta,
}

impl MotionStateMachine {
    pub fn new(post_motion_wait: Duration) -> Self {
        Self {
            state: MotionState::default(),
            post_motion_wait: TimeDelta::from_std(post_motion_wait).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    pub fn phase(&self) -> MotionPhase {
        self.state.phase
    }

    /// Whether an event is in progress (`Active` or `Cooling`)
    pub fn in_event(&self) -> bool {
        self.state.phase != MotionPhase::Idle
    }

    /// Advance with one frame's motion signal
    pub fn update(&mut self, has_motion: bool, now: DateTime<Local>) -> Option<MotionTransition> {
        let state = &mut self.state;
        match (has_motion, state.phase) {
            (true, MotionPhase::Idle) => {
                state.phase = MotionPhase::Active;
                state.last_motion_at = Some(now);
                state.cooling_since = None;
                Some(MotionTransition {
                    kind: EventKind::Started,
                    at: now,
                })
            }
            (true, MotionPhase::Active | MotionPhase::Cooling) => {
                state.phase = MotionPhase::Active;
                state.last_motion_at = Some(now);
                state.cooling_since = None;
                None
            }
            (false, MotionPhase::Active) => {
                state.phase = MotionPhase::Cooling;
                state.cooling_since.get_or_insert(now);
                None
            }
            (false, MotionPhase::Cooling) => {
                let since = *state.cooling_since.get_or_insert(now);
                if now.signed_duration_since(since) >= self.post_motion_wait {
                    state.phase = MotionPhase::Idle;
                    state.last_motion_at = None;
                    state.cooling_since = None;
                    Some(MotionTransition {
                        kind: EventKind::Ended,
                        at: now,
                    })
                } else {
                    None
                }
            }
            (false, MotionPhase::Idle) => None,
        }
    }

    /// Advance with a classification outcome. Errors count as "no motion".
    pub fn observe(
        &mut self,
        outcome: &Result<Detection, ClassifyError>,
        now: DateTime<Local>,
    ) -> Option<MotionTransition> {
        let has_motion = matches!(outcome, Ok(d) if d.has_motion);
        self.update(has_motion, now)
    }

    /// End an in-progress event immediately, e.g. on shutdown
    pub fn force_end(&mut self, now: DateTime<Local>) -> Option<MotionTransition> {
        if !self.in_event() {
            return None;
        }
        self.state = MotionState::default();
        Some(MotionTransition {
            kind: EventKind::Ended,
            at: now,
        })
    }
}
