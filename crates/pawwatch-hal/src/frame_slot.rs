//! [`FrameSlot`] – single-slot "latest frame" cell.
//!
//! Written by exactly one capture thread, read by any number of consumers.
//! A published frame is immutable and lives behind an [`Arc`], so a reader
//! either gets the previous frame or the new one, never a mix of both. The
//! lock only guards the pointer swap, so neither side waits on pixel copies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use pawwatch_types::Frame;

#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: RwLock<Option<Arc<Frame>>>,
    sequence: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame and bump the sequence number.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        // A poisoned lock only means a reader panicked mid-clone; the slot
        // itself is always in a valid state.
        let mut guard = self.latest.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(frame);
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// The most recently published frame, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of frames published so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Drop the stored frame.
    pub fn clear(&self) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
