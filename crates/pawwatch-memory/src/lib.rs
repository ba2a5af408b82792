//! `pawwatch-memory` – durable event history.
//!
//! # Modules
//!
//! - [`event_store`] – [`EventStore`][event_store::EventStore]: SQLite log
//!   of every supervision event with filtering, statistics, snapshot
//!   retrieval and age-based cleanup, plus the
//!   [`PersistenceObserver`][event_store::PersistenceObserver] that feeds it
//!   from the dispatcher.

pub mod event_store;

pub use event_store::{
    EventQuery, EventStatistics, EventStore, PersistenceObserver, SharedEventStore, StoreError,
    StoredEvent,
};
