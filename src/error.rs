//! Custom error types for the rig.
//!
//! This module defines `RigError`, the single error type returned by every
//! operation on an [`XyzSystem`](crate::experiment::XyzSystem). Using the
//! `thiserror` crate it keeps the state-machine rejections, runtime
//! acquisition failures and ambient I/O problems in one place.
//!
//! ## Error Hierarchy
//!
//! - **`Busy`**: an operation requiring exclusive access to the rig was invoked
//!   while a scan is running.
//! - **`NoPlanConfigured`**: a scan (or positioning move) was requested before any
//!   plan was configured.
//! - **`InvalidPlan`**: the plan is malformed (empty or non-monotonic grid axis,
//!   non-positive precision, ...). Raised at `configure` time, before any route
//!   is computed or any motor moves.
//! - **`AcquisitionFailure`**: the external acquisition collaborator failed while
//!   sampling a point. Never retried; progress is preserved so the scan can be
//!   resumed.
//! - **`InvalidTransition`**: a lifecycle transition the state machine does not
//!   model. Unmodeled combinations are rejected rather than silently accepted.
//! - **`NoMeasurement`**: a save was requested before any point was acquired.
//! - **`Config`**, **`Io`**, **`Serialization`**: ambient failures while loading
//!   settings or persisting results.
//!
//! State errors are detected synchronously and are always raised before any
//! mutation, so a rejected operation leaves the rig unchanged.

use thiserror::Error;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum RigError {
    #[error("The system is busy: a measurement is currently running")]
    Busy,

    #[error("No measurement plan configured")]
    NoPlanConfigured,

    #[error("Invalid measurement plan: {0}")]
    InvalidPlan(String),

    #[error("Acquisition failed at route index {index}: {message}")]
    AcquisitionFailure { index: usize, message: String },

    #[error("Cannot {action} while the system is {from}")]
    InvalidTransition { from: String, action: String },

    #[error("No measurement has been performed yet")]
    NoMeasurement,

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Measurement executor terminated abnormally: {0}")]
    ExecutorPanicked(String),
}

impl From<figment::Error> for RigError {
    fn from(value: figment::Error) -> Self {
        RigError::Config(Box::new(value))
    }
}

impl RigError {
    /// Whether the error is a synchronous state-machine rejection.
    ///
    /// These are the errors guaranteed to leave the rig untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RigError::Busy
                | RigError::NoPlanConfigured
                | RigError::InvalidPlan(_)
                | RigError::InvalidTransition { .. }
        )
    }
}
