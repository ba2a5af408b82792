//! `pawwatch-runtime` – the running system.
//!
//! Drives detection cycles, turns alerts into side effects and sets up
//! logging.
//!
//! # Modules
//!
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: the periodic
//!   fetch → detect → evaluate → record loop, with off-loop detection,
//!   a single in-flight detection, error back-off and start/stop lifecycle.
//! - [`actions`] – the [`Action`][actions::Action] capability, the
//!   [`ActionCoordinator`][actions::ActionCoordinator] with per-action
//!   cooldowns, and the built-in sound, file log, video and webhook actions.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP span export. Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to send spans to any OTLP collector.

pub mod actions;
pub mod supervisor;
pub mod telemetry;

pub use actions::{
    Action, ActionCoordinator, ActionOutcome, CoordinatorConfig, CoordinatorStatus, TriggerReport,
};
pub use supervisor::{CycleOutcome, Supervisor, SupervisorConfig};
