//! [`SupervisionStateMachine`] – turns per-frame detection counts into
//! supervision states and events.
//!
//! # Transition rule
//!
//! Every cycle the target state is derived from the latest counts alone:
//!
//! | supervisees | supervisors | target |
//! |---|---|---|
//! | 0 | any | `Idle` |
//! | > 0 | 0 | `Unsupervised` |
//! | > 0 | > 0 | `Supervised` |
//!
//! A change of target emits a state-change event. Entering `Unsupervised`
//! starts the unsupervised timer, any other target clears it.
//!
//! While the state stays `Unsupervised`, each cycle checks the timer; once
//! it reaches the alert delay a single `Alert` event fires and the state
//! becomes `Alert`. The timer is kept so later status queries still report
//! the span length. `Alert` counts as the same span: further `(>0, 0)`
//! cycles stay in `Alert` silently, so at most one alert fires per
//! unsupervised span.
//!
//! The machine performs no I/O and cannot fail. Time is passed in
//! explicitly, which keeps every transition reproducible in tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pawwatch_types::{Detection, DetectionCounts, Frame, SupervisionEvent, SupervisionState};
use tracing::{info, warn};
use uuid::Uuid;

/// Default grace period before an unsupervised span escalates.
pub const DEFAULT_ALERT_DELAY: Duration = Duration::from_secs(5);

/// Everything one detection cycle produced.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub counts: DetectionCounts,
    pub detections: Vec<Detection>,
    pub snapshot: Option<Arc<Frame>>,
}

impl Observation {
    /// An observation carrying only counts.
    pub fn counts(supervisees: u32, supervisors: u32) -> Self {
        Self {
            counts: DetectionCounts::new(supervisees, supervisors),
            ..Self::default()
        }
    }

    /// Build from detections, tallying the counts.
    pub fn from_detections(detections: Vec<Detection>, snapshot: Option<Arc<Frame>>) -> Self {
        Self {
            counts: DetectionCounts::tally(&detections),
            detections,
            snapshot,
        }
    }
}

/// Events produced by one call to [`SupervisionStateMachine::observe`].
#[derive(Debug, Default)]
pub struct Evaluation {
    pub state_change: Option<SupervisionEvent>,
    pub alert: Option<SupervisionEvent>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.state_change.is_none() && self.alert.is_none()
    }

    /// The produced events in emission order (state change first).
    pub fn into_events(self) -> impl Iterator<Item = SupervisionEvent> {
        self.state_change.into_iter().chain(self.alert)
    }
}

/// Target state for a pair of counts, independent of history.
pub fn target_state(counts: DetectionCounts) -> SupervisionState {
    match (counts.supervisees, counts.supervisors) {
        (0, _) => SupervisionState::Idle,
        (_, 0) => SupervisionState::Unsupervised,
        _ => SupervisionState::Supervised,
    }
}

/// The supervision state machine.
#[derive(Debug)]
pub struct SupervisionStateMachine {
    state: SupervisionState,
    unsupervised_since: Option<DateTime<Utc>>,
    alert_delay: Duration,
}

impl Default for SupervisionStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_DELAY)
    }
}

impl SupervisionStateMachine {
    /// Start in `Idle` with no timer.
    pub fn new(alert_delay: Duration) -> Self {
        Self {
            state: SupervisionState::Idle,
            unsupervised_since: None,
            alert_delay,
        }
    }

    pub fn state(&self) -> SupervisionState {
        self.state
    }

    pub fn alert_delay(&self) -> Duration {
        self.alert_delay
    }

    /// When the current unsupervised span began, if one is open.
    pub fn unsupervised_since(&self) -> Option<DateTime<Utc>> {
        self.unsupervised_since
    }

    /// Length of the open unsupervised span at `now`.
    pub fn unsupervised_elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.unsupervised_since.map(|since| elapsed(since, now))
    }

    /// Evaluate bare counts.
    pub fn evaluate(
        &mut self,
        supervisee_count: u32,
        supervisor_count: u32,
        now: DateTime<Utc>,
    ) -> Evaluation {
        self.observe(Observation::counts(supervisee_count, supervisor_count), now)
    }

    /// Evaluate one detection cycle.
    pub fn observe(&mut self, observation: Observation, now: DateTime<Utc>) -> Evaluation {
        let target = target_state(observation.counts);

        // Still the same unsupervised span after the alert fired.
        if self.state == SupervisionState::Alert && target == SupervisionState::Unsupervised {
            return Evaluation::default();
        }

        if target != self.state {
            let previous = self.state;
            self.unsupervised_since = (target == SupervisionState::Unsupervised).then_some(now);
            self.state = target;
            info!(from = %previous, to = %target, "supervision state changed");
            return Evaluation {
                state_change: Some(build_event(target, previous, now, None, observation)),
                alert: None,
            };
        }

        if self.state != SupervisionState::Unsupervised {
            return Evaluation::default();
        }

        let Some(since) = self.unsupervised_since else {
            return Evaluation::default();
        };
        let span = elapsed(since, now);
        if span < self.alert_delay {
            return Evaluation::default();
        }

        let previous = self.state;
        self.state = SupervisionState::Alert;
        warn!(
            unsupervised_secs = span.as_secs_f64(),
            "supervisee unsupervised beyond alert delay"
        );
        Evaluation {
            state_change: None,
            alert: Some(build_event(
                SupervisionState::Alert,
                previous,
                now,
                Some(span),
                observation,
            )),
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn build_event(
    state: SupervisionState,
    previous_state: SupervisionState,
    now: DateTime<Utc>,
    unsupervised_duration: Option<Duration>,
    observation: Observation,
) -> SupervisionEvent {
    SupervisionEvent {
        id: Uuid::new_v4(),
        state,
        previous_state,
        timestamp: now,
        supervisee_count: observation.counts.supervisees,
        supervisor_count: observation.counts.supervisors,
        unsupervised_duration,
        snapshot: observation.snapshot,
        detections: observation.detections,
    }
}
