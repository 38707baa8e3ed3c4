//! Scan planning and execution.
//!
//! - [`plan`]: the declarative measurement plan and its grid
//! - [`route`]: the boustrophedon visiting order of a grid
//! - [`state`]: the rig lifecycle state machine
//! - [`progress`]: resumable scan progress and saved results
//! - [`run_engine`]: the rig instance and its executor task

pub mod plan;
pub mod progress;
pub mod route;
pub mod run_engine;
pub mod state;

pub use plan::{Grid, GridAxis, MeasurementPlan, Position, Tank};
pub use progress::{percent_after, MeasurementProgress, MeasurementResult};
pub use route::{plan_route, Axis, Direction, Motion, RouteStep, ScanRoute};
pub use run_engine::{RigStatus, ScanEvent, ScanOutcome, StopHandle, XyzSystem};
pub use state::{SystemState, Transition};
