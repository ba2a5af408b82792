//! `pawwatch-perception` – detection adapter layer.
//!
//! Turns frames into the labelled detections the supervision core counts.
//!
//! # Modules
//!
//! - [`detector`] – the [`Detector`][detector::Detector] trait,
//!   [`CategoryMap`][detector::CategoryMap] for mapping model labels onto
//!   supervisee / supervisor categories, and
//!   [`ScriptedDetector`][detector::ScriptedDetector] for headless runs.

pub mod detector;

pub use detector::{CategoryMap, Detector, RawDetection, ScriptedDetector};
