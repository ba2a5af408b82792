//! `Camera` driver trait and the [`FrameSource`] interface the supervisor
//! pulls frames from.

use std::sync::Arc;

use pawwatch_types::{Frame, WatchError};

/// A camera or image-capture device.
///
/// Drivers are owned by a capture loop (see
/// [`CaptureThread`][crate::capture::CaptureThread]) which calls
/// [`capture`][Self::capture] repeatedly from a dedicated thread.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front_door"`.
    fn id(&self) -> &str;

    /// Acquire the device.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::FrameSourceUnavailable`] when the device cannot
    /// be opened. Callers treat this as fatal: no supervision is possible
    /// without frames.
    fn open(&mut self) -> Result<(), WatchError>;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::FrameSourceUnavailable`] if the frame cannot be
    /// read (e.g. a dropped USB packet). Such errors are transient.
    fn capture(&mut self) -> Result<Frame, WatchError>;

    /// Release the device. The default does nothing.
    fn close(&mut self) {}
}

/// Supplies the most recent frame on demand.
pub trait FrameSource: Send + Sync {
    /// Identifier of the underlying device.
    fn id(&self) -> &str;

    /// Begin producing frames. Calling `start` on a running source is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::FrameSourceUnavailable`] if the source cannot be
    /// acquired at all.
    fn start(&self) -> Result<(), WatchError>;

    /// The latest frame, or `None` when nothing has been captured yet.
    ///
    /// Never blocks on capture.
    fn latest_frame(&self) -> Option<Arc<Frame>>;

    /// Stop producing frames and release the device.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCamera {
        id: String,
        opened: bool,
    }

    impl Camera for MockCamera {
        fn id(&self) -> &str {
            &self.id
        }

        fn open(&mut self) -> Result<(), WatchError> {
            self.opened = true;
            Ok(())
        }

        fn capture(&mut self) -> Result<Frame, WatchError> {
            if !self.opened {
                return Err(WatchError::FrameSourceUnavailable(self.id.clone()));
            }
            Ok(Frame::new(2, 2, vec![0u8; 4 * 3]))
        }
    }

    #[test]
    fn mock_camera_capture_requires_open() {
        let mut cam = MockCamera {
            id: "front_door".to_string(),
            opened: false,
        };
        assert_eq!(cam.id(), "front_door");
        assert!(cam.capture().is_err());

        cam.open().unwrap();
        let frame = cam.capture().unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.data.len(), 12);
        cam.close();
    }
}
