//! Persistent event log.
//!
//! Every supervision event is written to a local SQLite database so the
//! history survives restarts and can be queried, summarised and pruned.
//!
//! # Storage layout
//!
//! A single table `event_logs` is created (if it does not already exist):
//!
//! | column                | type    | description                                  |
//! |-----------------------|---------|----------------------------------------------|
//! | id                    | INTEGER | Row id, autoincrement                        |
//! | event_id              | TEXT    | UUID of the [`SupervisionEvent`]             |
//! | timestamp             | TEXT    | RFC-3339 event time (UTC, fixed width)       |
//! | state                 | TEXT    | State entered by the event                   |
//! | previous_state        | TEXT    | State before the event                       |
//! | supervisee_count      | INTEGER |                                              |
//! | supervisor_count      | INTEGER |                                              |
//! | unsupervised_duration | REAL    | Seconds, alerts only                         |
//! | snapshot              | BLOB    | Raw frame bytes, if a snapshot was attached  |
//! | snapshot_width        | INTEGER |                                              |
//! | snapshot_height       | INTEGER |                                              |
//! | detections_json       | TEXT    | JSON array of detections                     |
//! | alert_triggered       | INTEGER | 1 for alert events                           |
//!
//! # Example
//!
//! ```rust
//! use pawwatch_memory::event_store::{EventQuery, EventStore};
//!
//! let store = EventStore::open_in_memory().unwrap();
//! assert!(store.events(&EventQuery::default()).unwrap().is_empty());
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use pawwatch_middleware::EventObserver;
use pawwatch_types::{EventRecord, Frame, SupervisionEvent, SupervisionState, WatchError};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from event store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for WatchError {
    fn from(e: StoreError) -> Self {
        WatchError::Storage(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query and result types
// ─────────────────────────────────────────────────────────────────────────────

/// Filter for [`EventStore::events`]. Results are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub limit: usize,
    pub offset: usize,
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,
    pub state: Option<SupervisionState>,
    pub alerts_only: bool,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            start: None,
            end: None,
            state: None,
            alerts_only: false,
        }
    }
}

/// One persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Database row id; pass to [`EventStore::snapshot`].
    pub row_id: i64,
    #[serde(flatten)]
    pub record: EventRecord,
}

/// Aggregates over a time range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStatistics {
    pub total_events: u64,
    pub total_alerts: u64,
    /// Mean over events that carry a duration; `0.0` when none do.
    pub avg_unsupervised_duration: f64,
    pub max_unsupervised_duration: f64,
    /// Event count per state name.
    pub state_counts: BTreeMap<String, u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// EventStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed event log.
pub struct EventStore {
    conn: Connection,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").finish_non_exhaustive()
    }
}

impl EventStore {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS event_logs (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id              TEXT NOT NULL,
                timestamp             TEXT NOT NULL,
                state                 TEXT NOT NULL,
                previous_state        TEXT NOT NULL,
                supervisee_count      INTEGER NOT NULL DEFAULT 0,
                supervisor_count      INTEGER NOT NULL DEFAULT 0,
                unsupervised_duration REAL,
                snapshot              BLOB,
                snapshot_width        INTEGER,
                snapshot_height       INTEGER,
                detections_json       TEXT,
                alert_triggered       INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_event_logs_timestamp
                ON event_logs (timestamp);",
        )?;
        Ok(())
    }

    /// Persist one event. Returns the new row id.
    pub fn log_event(&self, event: &SupervisionEvent) -> Result<i64, StoreError> {
        let detections_json = if event.detections.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&event.detections)?)
        };
        let snapshot = event.snapshot.as_deref();
        self.conn.execute(
            "INSERT INTO event_logs
                 (event_id, timestamp, state, previous_state, supervisee_count,
                  supervisor_count, unsupervised_duration, snapshot, snapshot_width,
                  snapshot_height, detections_json, alert_triggered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.id.to_string(),
                timestamp_key(event.timestamp),
                event.state.as_str(),
                event.previous_state.as_str(),
                event.supervisee_count,
                event.supervisor_count,
                event.unsupervised_duration.map(|d| d.as_secs_f64()),
                snapshot.map(|f| f.data.as_slice()),
                snapshot.map(|f| f.width),
                snapshot.map(|f| f.height),
                detections_json,
                event.is_alert(),
            ],
        )?;
        let row_id = self.conn.last_insert_rowid();
        debug!(row_id, state = %event.state, "event persisted");
        Ok(row_id)
    }

    /// Events matching `query`, newest first.
    pub fn events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_id, timestamp, state, supervisee_count, supervisor_count,
                    unsupervised_duration, snapshot IS NOT NULL, alert_triggered
             FROM event_logs
             WHERE (?1 IS NULL OR timestamp >= ?1)
               AND (?2 IS NULL OR timestamp <= ?2)
               AND (?3 IS NULL OR state = ?3)
               AND (?4 = 0 OR alert_triggered = 1)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?5 OFFSET ?6",
        )?;
        let rows = stmt.query_map(
            params![
                query.start.map(timestamp_key),
                query.end.map(timestamp_key),
                query.state.map(|s| s.as_str()),
                query.alerts_only,
                i64::try_from(query.limit).unwrap_or(i64::MAX),
                i64::try_from(query.offset).unwrap_or(i64::MAX),
            ],
            map_stored_event,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The frame attached to row `row_id`, if any.
    pub fn snapshot(&self, row_id: i64) -> Result<Option<Frame>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT snapshot, snapshot_width, snapshot_height, timestamp
                 FROM event_logs WHERE id = ?1",
                params![row_id],
                |row| {
                    let data: Option<Vec<u8>> = row.get(0)?;
                    let width: Option<u32> = row.get(1)?;
                    let height: Option<u32> = row.get(2)?;
                    let ts: String = row.get(3)?;
                    Ok((data, width, height, parse_timestamp(3, &ts)?))
                },
            )
            .optional()?;

        Ok(match row {
            Some((Some(data), Some(width), Some(height), captured_at)) => Some(Frame {
                width,
                height,
                data,
                captured_at,
            }),
            _ => None,
        })
    }

    /// Totals and per-state counts for events inside `[start, end]`.
    pub fn statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<EventStatistics, StoreError> {
        let start = start.map(timestamp_key);
        let end = end.map(timestamp_key);

        let (total_events, total_alerts, avg, max) = self.conn.query_row(
            "SELECT COUNT(id), COALESCE(SUM(alert_triggered), 0),
                    AVG(unsupervised_duration), MAX(unsupervised_duration)
             FROM event_logs
             WHERE (?1 IS NULL OR timestamp >= ?1)
               AND (?2 IS NULL OR timestamp <= ?2)",
            params![start, end],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            },
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT state, COUNT(id) FROM event_logs
             WHERE (?1 IS NULL OR timestamp >= ?1)
               AND (?2 IS NULL OR timestamp <= ?2)
             GROUP BY state",
        )?;
        let state_counts = stmt
            .query_map(params![start, end], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(EventStatistics {
            total_events: total_events.max(0) as u64,
            total_alerts: total_alerts.max(0) as u64,
            avg_unsupervised_duration: avg.unwrap_or(0.0),
            max_unsupervised_duration: max.unwrap_or(0.0),
            state_counts,
        })
    }

    /// Delete events older than `days` before `now`. Returns the number removed.
    pub fn cleanup_older_than(&self, days: u32, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - TimeDelta::days(i64::from(days));
        let removed = self.conn.execute(
            "DELETE FROM event_logs WHERE timestamp < ?1",
            params![timestamp_key(cutoff)],
        )?;
        if removed > 0 {
            info!(removed, days, "pruned old events");
        }
        Ok(removed)
    }

    /// Total number of stored events.
    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(id) FROM event_logs", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-width RFC-3339 so lexical order in SQLite equals time order.
fn timestamp_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::InvalidColumnType(idx, e.to_string(), rusqlite::types::Type::Text)
    })
}

fn map_stored_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    let id_str: String = row.get(1)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::InvalidColumnType(1, e.to_string(), rusqlite::types::Type::Text)
    })?;
    let ts: String = row.get(2)?;
    let state_str: String = row.get(3)?;
    let state = SupervisionState::parse(&state_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(
            3,
            format!("unknown state '{state_str}'"),
            rusqlite::types::Type::Text,
        )
    })?;
    Ok(StoredEvent {
        row_id: row.get(0)?,
        record: EventRecord {
            id,
            state,
            timestamp: parse_timestamp(2, &ts)?,
            supervisee_count: row.get(4)?,
            supervisor_count: row.get(5)?,
            unsupervised_duration_seconds: row.get(6)?,
            has_snapshot: row.get(7)?,
            alert_triggered: row.get(8)?,
        },
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// PersistenceObserver
// ─────────────────────────────────────────────────────────────────────────────

/// Store handle shared between the observer and maintenance code.
pub type SharedEventStore = Arc<Mutex<EventStore>>;

/// Writes every dispatched event to an [`EventStore`].
#[derive(Debug, Clone)]
pub struct PersistenceObserver {
    store: SharedEventStore,
}

impl PersistenceObserver {
    pub fn new(store: SharedEventStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedEventStore {
        &self.store
    }
}

impl EventObserver for PersistenceObserver {
    fn name(&self) -> &str {
        "persistence"
    }

    fn on_event(&self, event: &SupervisionEvent) -> Result<(), WatchError> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.log_event(event)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
