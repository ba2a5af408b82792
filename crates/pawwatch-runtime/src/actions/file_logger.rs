//! Daily JSON-lines alert log.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pawwatch_types::{AlertPayload, WatchError};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::Action;

/// Appends one JSON object per alert to `<dir>/events_YYYYMMDD.log`.
#[derive(Debug, Clone)]
pub struct FileLogger {
    dir: PathBuf,
}

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: DateTime<Utc>,
    logged_at: DateTime<Utc>,
    event_id: String,
    state: &'a str,
    supervisee_count: u32,
    supervisor_count: u32,
    unsupervised_duration_seconds: Option<f64>,
}

impl FileLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file that receives an alert raised at `at`.
    pub fn log_path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("events_{}.log", at.format("%Y%m%d")))
    }

    async fn append(&self, payload: &AlertPayload) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.log_path_for(payload.timestamp);
        let line = LogLine {
            timestamp: payload.timestamp,
            logged_at: Utc::now(),
            event_id: payload.event_id.to_string(),
            state: payload.state.as_str(),
            supervisee_count: payload.supervisee_count,
            supervisor_count: payload.supervisor_count,
            unsupervised_duration_seconds: payload.unsupervised_duration_seconds,
        };
        let mut json = serde_json::to_string(&line)?;
        json.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }
}

#[async_trait]
impl Action for FileLogger {
    fn name(&self) -> &str {
        "file_logger"
    }

    async fn execute(&self, payload: &AlertPayload) -> Result<bool, WatchError> {
        let path = self.append(payload).await.map_err(|e| WatchError::Action {
            action: self.name().to_string(),
            details: e.to_string(),
        })?;
        debug!(path = %path.display(), "alert written to log file");
        Ok(true)
    }
}
