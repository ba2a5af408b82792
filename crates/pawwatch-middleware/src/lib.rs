//! `pawwatch-middleware` – event routing.
//!
//! Moves supervision events from the driver loop to whoever consumes them
//! without caring what the consumers do.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`EventDispatcher`][dispatcher::EventDispatcher]:
//!   bounded in-memory history plus isolated, ordered fan-out to
//!   [`EventObserver`][dispatcher::EventObserver]s.
//! - [`bus`] – Tokio broadcast [`EventBus`][bus::EventBus] with `Events`
//!   and `Alerts` topics, and the [`BusObserver`][bus::BusObserver] bridge.

pub mod bus;
pub mod dispatcher;

pub use bus::{BusObserver, EventBus, Topic, TopicReceiver};
pub use dispatcher::{
    DEFAULT_HISTORY_CAPACITY, DispatchReport, EventDispatcher, EventObserver, ObserverId,
};
