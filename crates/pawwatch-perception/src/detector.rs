//! Detection adapter.
//!
//! The pawwatch core never runs inference itself. A [`Detector`] turns a
//! frame into labelled detections; [`CategoryMap`] decides which raw model
//! labels count as supervisees and which as supervisors, and drops
//! everything below the confidence threshold.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use pawwatch_types::{BoundingBox, Detection, DetectionCategory, Frame, WatchError};

/// An object detector.
///
/// `detect` may be expensive; the supervisor always calls it from a
/// blocking worker thread, never from the async driver loop.
pub trait Detector: Send + Sync {
    /// Run inference on `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Detection`] when inference fails. The supervisor
    /// treats this as a skipped cycle.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, WatchError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// CategoryMap
// ─────────────────────────────────────────────────────────────────────────────

/// Raw detection straight out of a model, before categorisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Maps model class labels onto [`DetectionCategory`] values.
///
/// Labels are compared case-insensitively.
#[derive(Debug, Clone)]
pub struct CategoryMap {
    supervisee_labels: HashSet<String>,
    supervisor_labels: HashSet<String>,
    confidence_threshold: f32,
}

impl Default for CategoryMap {
    /// Dogs supervised by people, 0.5 confidence threshold.
    fn default() -> Self {
        Self::new(["dog"], ["person"], 0.5)
    }
}

impl CategoryMap {
    pub fn new<I, J, S, T>(supervisees: I, supervisors: J, confidence_threshold: f32) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            supervisee_labels: supervisees
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
            supervisor_labels: supervisors
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Category of a raw label.
    pub fn category(&self, label: &str) -> DetectionCategory {
        let label = label.to_lowercase();
        if self.supervisee_labels.contains(&label) {
            DetectionCategory::Supervisee
        } else if self.supervisor_labels.contains(&label) {
            DetectionCategory::Supervisor
        } else {
            DetectionCategory::Other
        }
    }

    /// Keep only confident supervisee/supervisor detections and tag them.
    pub fn classify(&self, raw: Vec<RawDetection>) -> Vec<Detection> {
        let timestamp = Utc::now();
        raw.into_iter()
            .filter(|r| r.confidence >= self.confidence_threshold)
            .filter_map(|r| {
                let category = self.category(&r.label);
                (category != DetectionCategory::Other).then(|| Detection {
                    label: r.label,
                    category,
                    confidence: r.confidence,
                    bbox: r.bbox,
                    timestamp,
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedDetector
// ─────────────────────────────────────────────────────────────────────────────

/// A detector that replays a fixed script of `(supervisees, supervisors)`
/// counts, one entry per call, wrapping around at the end.
///
/// Used by tests and the demo binary in place of a real model.
pub struct ScriptedDetector {
    script: Vec<(u32, u32)>,
    cursor: Mutex<usize>,
    failing: AtomicBool,
    map: CategoryMap,
    supervisee_label: String,
    supervisor_label: String,
}

impl ScriptedDetector {
    /// An empty script yields no detections at all.
    pub fn new(script: Vec<(u32, u32)>) -> Self {
        Self {
            script,
            cursor: Mutex::new(0),
            failing: AtomicBool::new(false),
            map: CategoryMap::default(),
            supervisee_label: "dog".to_string(),
            supervisor_label: "person".to_string(),
        }
    }

    /// Classify through `map`, synthesising detections with the given labels.
    pub fn with_labels(
        mut self,
        map: CategoryMap,
        supervisee_label: impl Into<String>,
        supervisor_label: impl Into<String>,
    ) -> Self {
        self.map = map;
        self.supervisee_label = supervisee_label.into();
        self.supervisor_label = supervisor_label.into();
        self
    }

    /// Always report the same counts.
    pub fn constant(supervisees: u32, supervisors: u32) -> Self {
        Self::new(vec![(supervisees, supervisors)])
    }

    /// Make subsequent `detect` calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    fn next_counts(&self) -> (u32, u32) {
        if self.script.is_empty() {
            return (0, 0);
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let counts = self.script[*cursor % self.script.len()];
        *cursor += 1;
        counts
    }

    fn synthesize(label: &str, index: u32, frame: &Frame) -> RawDetection {
        let w = frame.width.max(1) as i32;
        let h = frame.height.max(1) as i32;
        let x1 = (index as i32 * 10) % w;
        RawDetection {
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox {
                x1,
                y1: 0,
                x2: (x1 + 10).min(w),
                y2: h,
            },
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, WatchError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(WatchError::Detection("scripted detector failure".to_string()));
        }
        let (supervisees, supervisors) = self.next_counts();
        let raw = (0..supervisees)
            .map(|i| Self::synthesize(&self.supervisee_label, i, frame))
            .chain((0..supervisors).map(|i| Self::synthesize(&self.supervisor_label, i, frame)))
            .collect();
        Ok(self.map.classify(raw))
    }
}
