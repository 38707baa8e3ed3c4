//! Measurement progress and results.
//!
//! [`MeasurementProgress`] is the resumable checkpoint of a scan: the dense
//! payload array acquired so far plus the index of the last completed route
//! entry. [`MeasurementResult`] is the immutable snapshot produced when a
//! measurement is saved.

use crate::error::{RigError, RigResult};
use chrono::{DateTime, Utc};
use ndarray::{Array4, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::plan::MeasurementPlan;
use super::route::RouteStep;

/// Resumable state of one scan.
///
/// The payload is indexed `[iz][iy][ix][channel]` and zero-filled for points
/// not yet acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementProgress {
    data: Array4<f32>,
    percent_complete: u8,
    last_completed_index: Option<usize>,
}

impl MeasurementProgress {
    /// Fresh progress for a grid of `(nx, ny, nz)` points with `channels`
    /// values per point.
    pub fn new((nx, ny, nz): (usize, usize, usize), channels: usize) -> Self {
        Self {
            data: Array4::zeros((nz, ny, nx, channels)),
            percent_complete: 0,
            last_completed_index: None,
        }
    }

    /// Acquired payload, `[iz][iy][ix][channel]`.
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Payload recorded at one grid point.
    pub fn sample_at(&self, ix: usize, iy: usize, iz: usize) -> ArrayView1<'_, f32> {
        self.data.slice(ndarray::s![iz, iy, ix, ..])
    }

    /// Values per grid point.
    pub fn channels(&self) -> usize {
        self.data.shape()[3]
    }

    /// Total number of grid points.
    pub fn total_points(&self) -> usize {
        let shape = self.data.shape();
        shape[0] * shape[1] * shape[2]
    }

    /// Percentage of the route completed, `ceil(100 * (i + 1) / N)`.
    pub fn percent_complete(&self) -> u8 {
        self.percent_complete
    }

    /// Route index of the last recorded point, `None` before the first.
    pub fn last_completed_index(&self) -> Option<usize> {
        self.last_completed_index
    }

    /// Route index a resumed scan continues from.
    pub fn next_index(&self) -> usize {
        self.last_completed_index.map_or(0, |i| i + 1)
    }

    /// Whether every route point has been recorded.
    pub fn is_complete(&self) -> bool {
        self.next_index() >= self.total_points()
    }

    /// Record the sample for route entry `index`.
    ///
    /// Payload write and bookkeeping happen together so that a reader never
    /// observes a half-recorded point.
    ///
    /// # Errors
    ///
    /// Returns `AcquisitionFailure` if `sample` does not carry exactly
    /// [`channels`](Self::channels) values. Nothing is written in that case.
    pub fn record(&mut self, index: usize, step: &RouteStep, sample: &[f32]) -> RigResult<()> {
        if sample.len() != self.channels() {
            return Err(RigError::AcquisitionFailure {
                index,
                message: format!(
                    "expected {} values per point, acquisition returned {}",
                    self.channels(),
                    sample.len()
                ),
            });
        }
        debug_assert_eq!(index, self.next_index(), "progress must advance in route order");

        let mut point = self
            .data
            .slice_mut(ndarray::s![step.iz, step.iy, step.ix, ..]);
        for (slot, value) in point.iter_mut().zip(sample) {
            *slot = *value;
        }
        self.last_completed_index = Some(index);
        self.percent_complete = percent_after(index, self.total_points());
        Ok(())
    }
}

/// `ceil(100 * (index + 1) / total)`, clamped to 100.
pub fn percent_after(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = (index + 1).min(total);
    ((done * 100).div_ceil(total)) as u8
}

/// Snapshot of a measurement, produced by an explicit save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// Executed plan
    pub plan: MeasurementPlan,
    /// Time the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Completion of the plan when the snapshot was taken
    pub percent_complete: u8,
    /// Route index of the last recorded point
    pub last_completed_index: Option<usize>,
    /// Measurement data, `[iz][iy][ix][channel]`
    pub data: Array4<f32>,
}

impl MeasurementResult {
    /// Snapshot `progress` of `plan` at the current time.
    pub fn new(plan: MeasurementPlan, progress: &MeasurementProgress) -> Self {
        Self {
            plan,
            timestamp: Utc::now(),
            percent_complete: progress.percent_complete(),
            last_completed_index: progress.last_completed_index(),
            data: progress.data().clone(),
        }
    }

    /// Number of route points recorded in the snapshot.
    pub fn points_recorded(&self) -> usize {
        self.last_completed_index.map_or(0, |i| i + 1)
    }

    /// Whether the snapshot holds the full grid.
    ///
    /// Decided on the point count: `percent_complete` rounds up and reaches
    /// 100 before the last point on grids of more than 100 points.
    pub fn is_complete(&self) -> bool {
        self.points_recorded() >= self.plan.grid().num_points()
    }

    /// Save result to a JSON file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails or the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> RigResult<()> {
        let json = serde_json::to_string(self)?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(&path, json)?;
        Ok(())
    }

    /// Load a result previously written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not hold a result.
    pub fn load<P: AsRef<Path>>(path: P) -> RigResult<Self> {
        let json = fs::read_to_string(&path)?;
        let result: MeasurementResult = serde_json::from_str(&json)?;
        result.plan.validate()?;
        Ok(result)
    }

    /// Default filename based on plan name and timestamp.
    ///
    /// Format: `<plan>_<timestamp>.json`
    pub fn default_filename(&self) -> String {
        let name: String = self
            .plan
            .name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_{}.json", name, self.timestamp.format("%Y%m%d_%H%M%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::plan::{Grid, Position, Tank};
    use crate::experiment::route::plan_route;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn plan() -> MeasurementPlan {
        MeasurementPlan::new(
            "Example run",
            Arc::new(Tank::new("small_aquarium", [0.2, 0.1, 0.2]).unwrap()),
            Position::new(1e-3, 7e-3, 2e-3),
            Grid::with_counts(2, 2, 1).unwrap(),
            [1e-3, 1e-3, 1e-3],
        )
        .unwrap()
    }

    #[test]
    fn test_percent_is_ceiling() {
        let seq: Vec<u8> = (0..4).map(|i| percent_after(i, 4)).collect();
        assert_eq!(seq, vec![25, 50, 75, 100]);

        assert_eq!(percent_after(0, 3), 34);
        assert_eq!(percent_after(1, 3), 67);
        assert_eq!(percent_after(0, 1000), 1);
        assert_eq!(percent_after(998, 1000), 100);
        assert_eq!(percent_after(7, 4), 100);
    }

    #[test]
    fn test_record_writes_point_and_advances() {
        let plan = plan();
        let route = plan_route(plan.grid());
        let mut progress = MeasurementProgress::new(route.counts(), 2);
        assert_eq!(progress.next_index(), 0);
        assert_eq!(progress.data().shape(), &[1, 2, 2, 2]);

        let step = route.steps()[1];
        progress.record(0, &route.steps()[0], &[1.0, -1.0]).unwrap();
        progress.record(1, &step, &[2.0, -2.0]).unwrap();

        assert_eq!(progress.last_completed_index(), Some(1));
        assert_eq!(progress.percent_complete(), 50);
        assert_eq!(progress.next_index(), 2);
        assert!(!progress.is_complete());
        assert_eq!(
            progress.sample_at(step.ix, step.iy, step.iz).to_vec(),
            vec![2.0, -2.0]
        );
    }

    #[test]
    fn test_record_rejects_wrong_payload_width() {
        let route = plan_route(&Grid::with_counts(2, 1, 1).unwrap());
        let mut progress = MeasurementProgress::new(route.counts(), 2);
        let err = progress
            .record(0, &route.steps()[0], &[1.0, 2.0, 3.0])
            .unwrap_err();
        assert!(matches!(err, RigError::AcquisitionFailure { index: 0, .. }));
        assert_eq!(progress.last_completed_index(), None);
        assert!(progress.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_result_save_load() {
        let dir = tempdir().unwrap();
        let plan = plan();
        let route = plan_route(plan.grid());
        let mut progress = MeasurementProgress::new(route.counts(), 2);
        for (i, step) in route.iter().enumerate() {
            progress.record(i, step, &[i as f32, 0.0]).unwrap();
        }

        let result = MeasurementResult::new(plan, &progress);
        assert!(result.is_complete());
        assert_eq!(result.points_recorded(), 4);
        assert!(result.default_filename().starts_with("Example_run_"));

        let path = dir.path().join("nested").join("result.json");
        result.save(&path).unwrap();
        let loaded = MeasurementResult::load(&path).unwrap();

        assert_eq!(loaded, result);
        assert_eq!(loaded.plan.tank().name, "small_aquarium");
    }

    #[test]
    fn test_result_one_point_short_is_partial() {
        let plan = MeasurementPlan::new(
            "Long",
            Arc::new(Tank::new("small_aquarium", [0.2, 0.1, 0.2]).unwrap()),
            Position::default(),
            Grid::with_counts(11, 10, 1).unwrap(),
            [1e-3, 1e-3, 1e-3],
        )
        .unwrap();
        let route = plan_route(plan.grid());
        let mut progress = MeasurementProgress::new(route.counts(), 2);
        for (i, step) in route.iter().take(route.len() - 1).enumerate() {
            progress.record(i, step, &[1.0, -1.0]).unwrap();
        }

        // 109 of 110 points rounds up to 100%
        let result = MeasurementResult::new(plan, &progress);
        assert_eq!(result.percent_complete, 100);
        assert_eq!(result.last_completed_index, Some(108));
        assert_eq!(result.points_recorded(), 109);
        assert!(!result.is_complete());
        assert!(!progress.is_complete());
    }
}
