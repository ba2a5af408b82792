//! Timed alert recording.
//!
//! A trigger starts a background task that samples the latest frame at a
//! fixed rate for a fixed duration and appends each one to
//! `<dir>/alert_YYYYMMDD_HHMMSS.pwr`. The trigger itself returns as soon as
//! the file is open; the recording runs on independently and can be
//! cancelled with [`VideoRecorder::stop`].
//!
//! # File format
//!
//! The file starts with the 4-byte magic `PWR1`, followed by one record per
//! frame, all integers little-endian:
//!
//! | field | type |
//! |---|---|
//! | width | u32 |
//! | height | u32 |
//! | captured_at (µs since epoch) | i64 |
//! | data length | u32 |
//! | data | `length` bytes |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pawwatch_hal::FrameSource;
use pawwatch_types::{AlertPayload, Frame, WatchError};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Action;

pub const RECORDING_MAGIC: &[u8; 4] = b"PWR1";
pub const DEFAULT_RECORDING_FPS: u32 = 20;

/// Result of a finished recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames_written: u64,
    pub cancelled: bool,
}

struct ActiveRecording {
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<RecordingSummary, WatchError>>,
    path: PathBuf,
}

/// Records frames from a [`FrameSource`] after an alert.
pub struct VideoRecorder {
    source: Arc<dyn FrameSource>,
    dir: PathBuf,
    duration: Duration,
    fps: u32,
    active: Mutex<Option<ActiveRecording>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for VideoRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoRecorder")
            .field("source", &self.source.id())
            .field("dir", &self.dir)
            .field("duration", &self.duration)
            .field("fps", &self.fps)
            .finish()
    }
}

impl VideoRecorder {
    pub fn new(source: Arc<dyn FrameSource>, dir: impl Into<PathBuf>, duration: Duration) -> Self {
        Self {
            source,
            dir: dir.into(),
            duration,
            fps: DEFAULT_RECORDING_FPS,
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `true` while a recording task is still writing.
    pub async fn is_recording(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Path of the current (or most recently started) recording.
    pub async fn current_path(&self) -> Option<PathBuf> {
        self.active.lock().await.as_ref().map(|r| r.path.clone())
    }

    /// Cancel the running recording, if any, and wait for it to close its
    /// file. Also collects the result of a recording that already finished.
    pub async fn stop(&self) -> Option<Result<RecordingSummary, WatchError>> {
        let recording = self.active.lock().await.take()?;
        let _ = recording.cancel.send(true);
        Some(join_recording(recording.task).await)
    }

    /// Refuse further recordings, then [`stop`](Self::stop) the current one.
    ///
    /// A trigger racing with `close` either sees the recorder closed or
    /// starts a recording that this call then cancels.
    pub async fn close(&self) -> Option<Result<RecordingSummary, WatchError>> {
        self.closed.store(true, Ordering::Release);
        self.stop().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait for the running recording to end on its own.
    pub async fn wait(&self) -> Option<Result<RecordingSummary, WatchError>> {
        let recording = self.active.lock().await.take()?;
        Some(join_recording(recording.task).await)
    }

    fn file_name(&self) -> PathBuf {
        self.dir
            .join(format!("alert_{}.pwr", Utc::now().format("%Y%m%d_%H%M%S")))
    }

    async fn open_output(&self) -> Result<(PathBuf, File), WatchError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| WatchError::Recording(format!("cannot create {}: {e}", self.dir.display())))?;
        let path = self.file_name();
        let file = File::create(&path)
            .await
            .map_err(|e| WatchError::Recording(format!("cannot create {}: {e}", path.display())))?;
        Ok((path, file))
    }
}

#[async_trait]
impl Action for VideoRecorder {
    fn name(&self) -> &str {
        "video_recorder"
    }

    async fn execute(&self, payload: &AlertPayload) -> Result<bool, WatchError> {
        let mut active = self.active.lock().await;
        if self.is_closed() {
            debug!("recorder closed, ignoring request");
            return Ok(false);
        }
        if active.as_ref().is_some_and(|r| !r.task.is_finished()) {
            warn!("already recording, ignoring new request");
            return Ok(false);
        }

        let (path, file) = self.open_output().await?;
        let (cancel, cancelled) = watch::channel(false);
        info!(
            path = %path.display(),
            duration_secs = self.duration.as_secs_f64(),
            event_id = %payload.event_id,
            "recording started"
        );
        let task = tokio::spawn(record(
            Arc::clone(&self.source),
            file,
            path.clone(),
            self.duration,
            self.fps,
            cancelled,
        ));
        *active = Some(ActiveRecording { cancel, task, path });
        Ok(true)
    }
}

async fn join_recording(
    task: JoinHandle<Result<RecordingSummary, WatchError>>,
) -> Result<RecordingSummary, WatchError> {
    task.await
        .map_err(|e| WatchError::Recording(format!("recording task aborted: {e}")))?
}

async fn record(
    source: Arc<dyn FrameSource>,
    file: File,
    path: PathBuf,
    duration: Duration,
    fps: u32,
    mut cancelled: watch::Receiver<bool>,
) -> Result<RecordingSummary, WatchError> {
    let io_err = |e: std::io::Error| WatchError::Recording(format!("{}: {e}", path.display()));
    let mut out = BufWriter::new(file);
    out.write_all(RECORDING_MAGIC).await.map_err(io_err)?;

    let deadline = Instant::now() + duration;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames_written = 0u64;
    let mut was_cancelled = false;

    loop {
        tokio::select! {
            changed = cancelled.changed() => {
                // A dropped sender also ends the recording.
                was_cancelled = changed.is_err() || *cancelled.borrow();
                if was_cancelled {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
            _ = ticker.tick() => {
                if let Some(frame) = source.latest_frame() {
                    write_frame(&mut out, &frame).await.map_err(io_err)?;
                    frames_written += 1;
                }
            }
        }
    }

    out.flush().await.map_err(io_err)?;
    out.into_inner().sync_all().await.map_err(io_err)?;
    info!(path = %path.display(), frames_written, was_cancelled, "recording finished");
    Ok(RecordingSummary {
        path,
        frames_written,
        cancelled: was_cancelled,
    })
}

async fn write_frame(out: &mut BufWriter<File>, frame: &Frame) -> std::io::Result<()> {
    let len = u32::try_from(frame.data.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"))?;
    out.write_all(&frame.width.to_le_bytes()).await?;
    out.write_all(&frame.height.to_le_bytes()).await?;
    out.write_all(&frame.captured_at.timestamp_micros().to_le_bytes())
        .await?;
    out.write_all(&len.to_le_bytes()).await?;
    out.write_all(&frame.data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::payload;
    use pawwatch_hal::StaticFrameSource;

    fn recorder(dir: &Path, duration: Duration) -> VideoRecorder {
        VideoRecorder::new(Arc::new(StaticFrameSource::new("cam")), dir, duration)
    }

    #[tokio::test]
    async fn records_frames_for_duration() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path(), Duration::from_millis(200));

        assert!(rec.execute(&payload()).await.unwrap());
        let summary = rec.wait().await.unwrap().unwrap();
        assert!(!summary.cancelled);
        assert!(summary.frames_written >= 1);

        let bytes = std::fs::read(&summary.path).unwrap();
        assert_eq!(&bytes[..4], RECORDING_MAGIC);
        let width = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let height = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let len = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        assert_eq!((width, height, len), (4, 4, 16));
        let record_size = 4 + 4 + 8 + 4 + 16;
        assert_eq!(bytes.len() as u64, 4 + summary.frames_written * record_size);
        assert!(
            summary
                .path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("alert_")
        );
    }

    #[tokio::test]
    async fn refuses_second_recording_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path(), Duration::from_secs(30));

        assert!(rec.execute(&payload()).await.unwrap());
        assert!(rec.is_recording().await);
        assert!(!rec.execute(&payload()).await.unwrap());

        let summary = rec.stop().await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert!(!rec.is_recording().await);
        assert!(summary.path.exists());
    }

    #[tokio::test]
    async fn can_record_again_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path(), Duration::from_millis(50));
        assert!(rec.execute(&payload()).await.unwrap());
        rec.wait().await.unwrap().unwrap();
        assert!(rec.execute(&payload()).await.unwrap());
        rec.stop().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn empty_source_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let rec = VideoRecorder::new(
            Arc::new(StaticFrameSource::empty("cam")),
            dir.path(),
            Duration::from_millis(60),
        );
        assert!(rec.execute(&payload()).await.unwrap());
        let summary = rec.wait().await.unwrap().unwrap();
        assert_eq!(summary.frames_written, 0);
        assert_eq!(std::fs::read(&summary.path).unwrap(), RECORDING_MAGIC.to_vec());
    }

    #[tokio::test]
    async fn close_cancels_current_recording_and_refuses_new_ones() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path(), Duration::from_secs(30));
        assert!(rec.execute(&payload()).await.unwrap());

        let summary = rec.close().await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert!(rec.is_closed());

        assert!(!rec.execute(&payload()).await.unwrap());
        assert!(!rec.is_recording().await);
        assert!(rec.close().await.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn unusable_directory_is_a_recording_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let rec = recorder(file.path(), Duration::from_millis(10));
        assert!(matches!(
            rec.execute(&payload()).await,
            Err(WatchError::Recording(_))
        ));
        assert!(rec.stop().await.is_none());
    }
}
