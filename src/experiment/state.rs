//! Rig lifecycle state machine.
//!
//! This module owns the legal lifecycle of an XYZ rig. Every state change of an
//! [`XyzSystem`](super::XyzSystem) goes through [`SystemState::next`], which
//! either returns the successor state or rejects the transition.
//!
//! # State Machine
//!
//! ```text
//!   ┌─────────┐  move_to_start()  ┌─────────┐
//!   │ Stopped │──────────────────▶│ AtStart │
//!   └─────────┘                   └─────────┘
//!     ▲    │ start()                   │ start()
//!     │    ▼                           ▼
//!     │  ┌───────────────────────────────┐
//!     └──│            Running            │
//!  stop()└───────────────────────────────┘
//!  failure             │ end of route
//!                      ▼
//!                ┌──────────┐
//!                │ Finished │  (start / configure / move_to_start
//!                └──────────┘   as from Stopped)
//! ```
//!
//! `configure`, `move_to_start` and `start` are rejected with `Busy` while
//! `Running`. `stop` outside `Running` is a no-op. Any combination not listed
//! in [`SystemState::next`] fails with `InvalidTransition`.

use crate::error::{RigError, RigResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an XYZ rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SystemState {
    /// Motors are at the plan's reference position
    AtStart,
    /// No measurement in progress (initial state)
    #[default]
    Stopped,
    /// A measurement is currently executing
    Running,
    /// The previous measurement walked the whole route
    Finished,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemState::AtStart => write!(f, "at start"),
            SystemState::Stopped => write!(f, "stopped"),
            SystemState::Running => write!(f, "running"),
            SystemState::Finished => write!(f, "finished"),
        }
    }
}

/// Lifecycle events that may change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Replace the plan and route, discarding progress
    Configure,
    /// Drive the motors to the reference position
    MoveToStart,
    /// Launch (or resume) the executor
    Start,
    /// Request a cooperative halt
    Stop,
    /// Executor walked the whole route
    Finish,
    /// Executor aborted on an acquisition failure
    Fail,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Configure => write!(f, "configure"),
            Transition::MoveToStart => write!(f, "move to start"),
            Transition::Start => write!(f, "start"),
            Transition::Stop => write!(f, "stop"),
            Transition::Finish => write!(f, "finish"),
            Transition::Fail => write!(f, "fail"),
        }
    }
}

impl SystemState {
    /// Whether a measurement is executing.
    pub fn is_running(&self) -> bool {
        matches!(self, SystemState::Running)
    }

    /// Check if the state allows replacing the plan.
    pub fn can_configure(&self) -> bool {
        !self.is_running()
    }

    /// Check if the state allows starting or resuming a measurement.
    pub fn can_start(&self) -> bool {
        !self.is_running()
    }

    /// Check if the state allows stopping.
    pub fn can_stop(&self) -> bool {
        self.is_running()
    }

    /// Successor state for `transition`.
    ///
    /// # Errors
    ///
    /// - `Busy` for `Configure`, `MoveToStart` or `Start` while running
    /// - `InvalidTransition` for executor outcomes (`Finish`, `Fail`) reported
    ///   in a state no executor can be in
    pub fn next(self, transition: Transition) -> RigResult<SystemState> {
        use SystemState::*;
        use Transition::*;

        match (self, transition) {
            (Running, Configure | MoveToStart | Start) => Err(RigError::Busy),

            (state, Configure) => Ok(state),
            (_, MoveToStart) => Ok(AtStart),
            (_, Start) => Ok(Running),

            (Running, Stop) => Ok(Stopped),
            (state, Stop) => Ok(state),

            // A stop may land while the final point is being recorded; the
            // route is still complete.
            (Running | Stopped, Finish) => Ok(Finished),
            (Running | Stopped, Fail) => Ok(Stopped),

            (from @ (AtStart | Finished), action @ (Finish | Fail)) => {
                Err(RigError::InvalidTransition {
                    from: from.to_string(),
                    action: action.to_string(),
                })
            }
        }
    }
}
