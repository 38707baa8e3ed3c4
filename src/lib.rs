//! # XYZ Tank Core Library
//!
//! This crate drives a three-axis positioning rig that carries a sensor
//! through a regular 3D grid inside a liquid-filled tank, recording one
//! measurement per grid point. Scans are planned once, executed on a
//! background task and can be stopped and resumed without losing data.
//!
//! ## Crate Structure
//!
//! - **`experiment`**: the measurement plan, the boustrophedon route planner,
//!   the lifecycle state machine, scan progress and the [`XyzSystem`] rig with
//!   its executor.
//! - **`hardware`**: the `Acquisition` capability trait, the axis motors and
//!   simulated probes.
//! - **`controller`**: command-channel actor that views use to drive a rig.
//! - **`config`**: figment-based settings (TOML plus `XYZ_TANK_` environment).
//! - **`logging`**: tracing-subscriber initialisation.
//! - **`error`**: the `RigError` enum for centralized error handling.
//!
//! [`XyzSystem`]: experiment::XyzSystem

pub mod config;
pub mod controller;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
