//! Hardware Capabilities
//!
//! The rig core talks to measurement hardware through small capability traits
//! rather than concrete drivers. An oscilloscope bound through a vendor SDK, a
//! simulated probe and a test double all look the same to the executor.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors, so drivers can report whatever context
//!   they have; the executor maps failures into `RigError::AcquisitionFailure`
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! struct Oscilloscope { /* SDK handle */ }
//!
//! #[async_trait]
//! impl Acquisition for Oscilloscope {
//!     fn channels(&self) -> usize {
//!         2 // positive and negative pressure peaks
//!     }
//!
//!     async fn sample(&self, _at: Position) -> Result<Vec<f32>> {
//!         let handle = self.handle.clone();
//!         // Blocking SDK calls belong on the blocking pool
//!         tokio::task::spawn_blocking(move || handle.capture_peaks()).await?
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::experiment::Position;

/// Capability: Point Acquisition
///
/// Devices that take one measurement at the probe's current position
/// (oscilloscopes, hydrophone digitizers, power meters).
///
/// # Contract
/// - `sample` is invoked exactly once per grid point, after the motors have
///   settled at that point, and is awaited before anything else happens
/// - The returned payload has exactly [`channels`](Acquisition::channels)
///   values; any other length is treated as an acquisition failure
/// - Failures are not retried by the caller
/// - There is no timeout: a `sample` that never completes stalls the scan
#[async_trait]
pub trait Acquisition: Send + Sync {
    /// Number of values produced per grid point
    fn channels(&self) -> usize;

    /// Acquire one sample at the current probe position
    ///
    /// # Arguments
    /// * `at` - Absolute motor position the sample is taken at
    ///
    /// # Returns
    /// - Ok(values) with `channels()` values on success
    /// - Err on hardware error
    async fn sample(&self, at: Position) -> Result<Vec<f32>>;
}
