//! `pawwatch-kernel` – supervision rules.
//!
//! Pure decision logic: given detection counts and the current time, decide
//! which supervision state the scene is in and when an alert is due. Nothing
//! in here touches frames, threads or storage.
//!
//! # Modules
//!
//! - [`state_machine`] – [`SupervisionStateMachine`][state_machine::SupervisionStateMachine]:
//!   the `Idle` / `Supervised` / `Unsupervised` / `Alert` transition rule,
//!   the unsupervised-span timer and the one-alert-per-span guarantee.

pub mod state_machine;

pub use state_machine::{
    DEFAULT_ALERT_DELAY, Evaluation, Observation, SupervisionStateMachine, target_state,
};
