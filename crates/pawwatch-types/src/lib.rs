//! `pawwatch-types` – shared vocabulary for every pawwatch crate.
//!
//! Holds the supervision states, the immutable [`SupervisionEvent`] record,
//! the frame and detection types exchanged between the frame source, the
//! detector and the state machine, and the workspace-wide [`WatchError`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Supervision state
// ─────────────────────────────────────────────────────────────────────────────

/// The four mutually exclusive supervision states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisionState {
    /// No supervisee in view.
    #[default]
    Idle,
    /// Supervisee in view together with at least one supervisor.
    Supervised,
    /// Supervisee in view, no supervisor.
    Unsupervised,
    /// Continuously unsupervised for at least the configured alert delay.
    Alert,
}

impl SupervisionState {
    /// Stable lowercase name, used as the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisionState::Idle => "idle",
            SupervisionState::Supervised => "supervised",
            SupervisionState::Unsupervised => "unsupervised",
            SupervisionState::Alert => "alert",
        }
    }

    /// Parse the representation produced by [`as_str`][Self::as_str].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SupervisionState::Idle),
            "supervised" => Some(SupervisionState::Supervised),
            "unsupervised" => Some(SupervisionState::Unsupervised),
            "alert" => Some(SupervisionState::Alert),
            _ => None,
        }
    }
}

impl std::fmt::Display for SupervisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames
// ─────────────────────────────────────────────────────────────────────────────

/// A captured video frame.
///
/// Frames are never mutated after capture; they travel behind an [`Arc`] so
/// the latest-frame slot, the detector and event snapshots can share one
/// allocation without ever observing a partially written buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw pixel data (e.g. RGB24 or greyscale).
    pub data: Vec<u8>,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Build a frame stamped with the current time.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            captured_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Detections
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic category of a detection as far as supervision is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionCategory {
    /// The monitored subject (e.g. a dog).
    Supervisee,
    /// An entity whose presence satisfies supervision (e.g. a person).
    Supervisor,
    /// Anything else the detector reported.
    Other,
}

/// Axis-aligned bounding box in pixel coordinates (`x1,y1` top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// One labelled, confidence-scored detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Raw class label reported by the model (e.g. `"dog"`).
    pub label: String,
    pub category: DetectionCategory,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub timestamp: DateTime<Utc>,
}

/// Per-frame counts of the two categories the state machine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectionCounts {
    pub supervisees: u32,
    pub supervisors: u32,
}

impl DetectionCounts {
    pub fn new(supervisees: u32, supervisors: u32) -> Self {
        Self {
            supervisees,
            supervisors,
        }
    }

    /// Count supervisees and supervisors in `detections`.
    pub fn tally(detections: &[Detection]) -> Self {
        detections
            .iter()
            .fold(Self::default(), |mut acc, d| {
                match d.category {
                    DetectionCategory::Supervisee => acc.supervisees += 1,
                    DetectionCategory::Supervisor => acc.supervisors += 1,
                    DetectionCategory::Other => {}
                }
                acc
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable record produced at every state transition and at the alert
/// threshold crossing.
#[derive(Debug, Clone)]
pub struct SupervisionEvent {
    pub id: Uuid,
    /// State entered by this event.
    pub state: SupervisionState,
    /// State that was current before this event.
    pub previous_state: SupervisionState,
    pub timestamp: DateTime<Utc>,
    pub supervisee_count: u32,
    pub supervisor_count: u32,
    /// Length of the unsupervised span; set only on `Alert` events.
    pub unsupervised_duration: Option<Duration>,
    /// Detached snapshot of the frame that produced the event.
    pub snapshot: Option<Arc<Frame>>,
    pub detections: Vec<Detection>,
}

impl SupervisionEvent {
    /// `true` for alert-class events (the ones routed to side-effect actions).
    pub fn is_alert(&self) -> bool {
        self.state == SupervisionState::Alert
    }

    /// Flatten into the persistence / UI record.
    pub fn record(&self) -> EventRecord {
        EventRecord {
            id: self.id,
            state: self.state,
            timestamp: self.timestamp,
            supervisee_count: self.supervisee_count,
            supervisor_count: self.supervisor_count,
            unsupervised_duration_seconds: self.unsupervised_duration.map(|d| d.as_secs_f64()),
            has_snapshot: self.snapshot.is_some(),
            alert_triggered: self.is_alert(),
        }
    }

    /// Build the payload handed to alert actions.
    pub fn alert_payload(&self) -> AlertPayload {
        AlertPayload {
            event_id: self.id,
            state: self.state,
            timestamp: self.timestamp,
            supervisee_count: self.supervisee_count,
            supervisor_count: self.supervisor_count,
            unsupervised_duration_seconds: self.unsupervised_duration.map(|d| d.as_secs_f64()),
        }
    }
}

/// Serialisable view of a [`SupervisionEvent`] for persistence and UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub state: SupervisionState,
    pub timestamp: DateTime<Utc>,
    pub supervisee_count: u32,
    pub supervisor_count: u32,
    pub unsupervised_duration_seconds: Option<f64>,
    pub has_snapshot: bool,
    pub alert_triggered: bool,
}

/// What an alert action receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub event_id: Uuid,
    pub state: SupervisionState,
    pub timestamp: DateTime<Utc>,
    pub supervisee_count: u32,
    pub supervisor_count: u32,
    pub unsupervised_duration_seconds: Option<f64>,
}

/// Answer to the "current status" query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionStatus {
    pub state: SupervisionState,
    /// Id of the frame source being watched.
    pub source: String,
    pub running: bool,
    /// Seconds since the current unsupervised span began, if one is open.
    pub unsupervised_elapsed_seconds: Option<f64>,
    /// Number of events currently held in the history.
    pub event_count: usize,
    pub alert_delay_seconds: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared across the workspace.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WatchError {
    #[error("Frame source unavailable: {0}")]
    FrameSourceUnavailable(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Detection timed out after {0:?}")]
    DetectionTimeout(Duration),

    #[error("Observer '{observer}' failed: {details}")]
    Observer { observer: String, details: String },

    #[error("Action '{action}' failed: {details}")]
    Action { action: String, details: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Recording error: {0}")]
    Recording(String),
}
