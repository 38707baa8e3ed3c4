//! Rig hardware.
//!
//! Motors are modeled in-crate; acquisition devices plug in through the
//! [`Acquisition`](capabilities::Acquisition) capability.

pub mod capabilities;
pub mod mock;
pub mod motor;

pub use capabilities::Acquisition;
pub use mock::{MockProbe, ScriptedProbe, PROBE_CHANNELS};
pub use motor::{AxisMotor, Motors};
