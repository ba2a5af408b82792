//! `pawwatch-hal` – frame acquisition.
//!
//! # Modules
//!
//! - [`camera`] – the [`Camera`] driver trait and the [`FrameSource`]
//!   interface the supervisor reads from.
//! - [`frame_slot`] – [`FrameSlot`]: single-slot latest-frame cell shared
//!   between the capture thread and its readers.
//! - [`capture`] – [`CaptureThread`]: background capture loop that keeps the
//!   slot fresh.
//! - [`sim`] – simulated cameras and frame sources for headless runs.

pub mod camera;
pub mod capture;
pub mod frame_slot;
pub mod sim;

pub use camera::{Camera, FrameSource};
pub use capture::CaptureThread;
pub use frame_slot::FrameSlot;
pub use sim::{SimCamera, StaticFrameSource};
