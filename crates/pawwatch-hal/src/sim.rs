//! Simulated frame sources for CI and the demo binary.
//!
//! Lets the whole pawwatch stack run headless without any camera attached.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pawwatch_types::{Frame, WatchError};

use crate::camera::{Camera, FrameSource};

// ────────────────────────────────────────────────────────────────────────────
// SimCamera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera that returns blank greyscale frames.
pub struct SimCamera {
    id: String,
    width: u32,
    height: u32,
    openable: bool,
    fail_every: Option<usize>,
    captures: usize,
}

impl SimCamera {
    /// A 4×4 greyscale camera that always succeeds.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            width: 4,
            height: 4,
            openable: true,
            fail_every: None,
            captures: 0,
        }
    }

    /// A camera whose `open` always fails.
    pub fn unavailable(id: impl Into<String>) -> Self {
        Self {
            openable: false,
            ..Self::new(id)
        }
    }

    /// Override the frame dimensions.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Make every `n`th capture fail with a transient error.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self) -> Result<(), WatchError> {
        if self.openable {
            Ok(())
        } else {
            Err(WatchError::FrameSourceUnavailable(format!(
                "camera '{}' could not be opened",
                self.id
            )))
        }
    }

    fn capture(&mut self) -> Result<Frame, WatchError> {
        self.captures += 1;
        if let Some(n) = self.fail_every
            && self.captures % n == 0
        {
            return Err(WatchError::FrameSourceUnavailable(format!(
                "camera '{}' dropped frame {}",
                self.id, self.captures
            )));
        }
        Ok(Frame::new(
            self.width,
            self.height,
            vec![0u8; frame_len(self.width, self.height)],
        ))
    }
}

/// Bytes in a greyscale frame, computed in `usize` so large resolutions
/// cannot overflow `u32`.
fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

// ────────────────────────────────────────────────────────────────────────────
// StaticFrameSource
// ────────────────────────────────────────────────────────────────────────────

/// A [`FrameSource`] that hands out whatever frame the test put in it.
pub struct StaticFrameSource {
    id: String,
    frame: Mutex<Option<Arc<Frame>>>,
    fail_start: bool,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl StaticFrameSource {
    /// A source that always yields a blank 4×4 frame.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frame: Mutex::new(Some(Arc::new(Frame::new(4, 4, vec![0u8; 16])))),
            fail_start: false,
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// A source that has no frame available.
    pub fn empty(id: impl Into<String>) -> Self {
        let source = Self::new(id);
        source.set_frame(None);
        source
    }

    /// A source whose `start` fails.
    pub fn unavailable(id: impl Into<String>) -> Self {
        Self {
            fail_start: true,
            ..Self::new(id)
        }
    }

    pub fn set_frame(&self, frame: Option<Frame>) {
        *self.frame.lock().unwrap_or_else(|e| e.into_inner()) = frame.map(Arc::new);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// How many times `start` succeeded.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Acquire)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Acquire)
    }
}

impl FrameSource for StaticFrameSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self) -> Result<(), WatchError> {
        if self.fail_start {
            return Err(WatchError::FrameSourceUnavailable(format!(
                "source '{}' could not be opened",
                self.id
            )));
        }
        if !self.running.swap(true, Ordering::AcqRel) {
            self.starts.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frame.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.stops.fetch_add(1, Ordering::AcqRel);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
