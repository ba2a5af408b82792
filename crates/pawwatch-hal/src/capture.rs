//! [`CaptureThread`] – decouples frame acquisition from detection.
//!
//! A dedicated OS thread pulls frames from a [`Camera`] at a bounded rate
//! and publishes each one into a [`FrameSlot`]. The supervisor reads the slot
//! without ever waiting on the camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pawwatch_types::{Frame, WatchError};
use tracing::{debug, error, info, warn};

use crate::camera::{Camera, FrameSource};
use crate::frame_slot::FrameSlot;

/// Pause after a failed capture before trying again.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(100);

enum CaptureState {
    Stopped(Box<dyn Camera>),
    Running(JoinHandle<Box<dyn Camera>>),
    /// The capture thread panicked; the camera is gone.
    Lost,
}

/// Background capture loop that implements [`FrameSource`].
pub struct CaptureThread {
    id: String,
    frame_interval: Duration,
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    state: Mutex<CaptureState>,
}

impl CaptureThread {
    /// Wrap `camera`, capturing at no more than `fps_limit` frames per second.
    pub fn new(camera: Box<dyn Camera>, fps_limit: u32) -> Self {
        let fps = fps_limit.max(1);
        Self {
            id: camera.id().to_string(),
            frame_interval: Duration::from_secs(1) / fps,
            slot: Arc::new(FrameSlot::new()),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(CaptureState::Stopped(camera)),
        }
    }

    /// The slot this thread publishes into.
    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn capture_loop(
        mut camera: Box<dyn Camera>,
        slot: Arc<FrameSlot>,
        running: Arc<AtomicBool>,
        frame_interval: Duration,
    ) -> Box<dyn Camera> {
        while running.load(Ordering::Acquire) {
            let started = Instant::now();
            match camera.capture() {
                Ok(frame) => slot.publish(frame),
                Err(e) => {
                    warn!(camera = camera.id(), error = %e, "frame capture failed");
                    thread::sleep(CAPTURE_RETRY_DELAY);
                    continue;
                }
            }
            let elapsed = started.elapsed();
            if elapsed < frame_interval {
                thread::sleep(frame_interval - elapsed);
            }
        }
        debug!(camera = camera.id(), "capture loop exited");
        camera
    }
}

impl FrameSource for CaptureThread {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self) -> Result<(), WatchError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut camera = match std::mem::replace(&mut *state, CaptureState::Lost) {
            CaptureState::Stopped(camera) => camera,
            running @ CaptureState::Running(_) => {
                *state = running;
                return Ok(());
            }
            CaptureState::Lost => {
                return Err(WatchError::FrameSourceUnavailable(format!(
                    "camera '{}' was lost after a capture thread panic",
                    self.id
                )));
            }
        };

        if let Err(e) = camera.open() {
            *state = CaptureState::Stopped(camera);
            return Err(e);
        }

        self.running.store(true, Ordering::Release);
        let slot = Arc::clone(&self.slot);
        let running = Arc::clone(&self.running);
        let interval = self.frame_interval;
        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.id))
            .spawn(move || Self::capture_loop(camera, slot, running, interval))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                WatchError::FrameSourceUnavailable(format!("failed to spawn capture thread: {e}"))
            })?;
        *state = CaptureState::Running(handle);
        info!(camera = %self.id, "capture started");
        Ok(())
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *state, CaptureState::Lost) {
            CaptureState::Running(handle) => match handle.join() {
                Ok(mut camera) => {
                    camera.close();
                    *state = CaptureState::Stopped(camera);
                    info!(camera = %self.id, "capture stopped");
                }
                Err(_) => error!(camera = %self.id, "capture thread panicked"),
            },
            other => *state = other,
        }
        self.slot.clear();
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
