//! Measurement plan data model.
//!
//! A [`MeasurementPlan`] is the immutable, declarative description of one scan:
//! the tank it runs in, the 3D sample grid, the nominal grid spacing used for
//! relative motor moves and the reference position at which grid index
//! `(0, 0, 0)` sits.
//!
//! Plans are validated once, on construction. Everything downstream (route
//! planning, execution) relies on the invariants checked here.

use crate::error::{RigError, RigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::route::Axis;

/// Upper bound on the points of one grid axis.
pub const MAX_AXIS_POINTS: usize = 100_000;

/// Upper bound on the points of a whole grid.
pub const MAX_GRID_POINTS: usize = 10_000_000;

/// Absolute position of the probe along X, Y and Z.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Position {
    /// Create a position from its three coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Coordinate along a single axis. `Axis::None` has no coordinate.
    pub fn along(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => Some(self.x),
            Axis::Y => Some(self.y),
            Axis::Z => Some(self.z),
            Axis::None => None,
        }
    }

    /// Whether two positions agree within `tolerance` on every axis.
    pub fn approx_eq(&self, other: &Position, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

impl From<[f64; 3]> for Position {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6}, {:.6})", self.x, self.y, self.z)
    }
}

/// Tank (aquarium) the measurement takes place in. Purely descriptive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tank {
    /// Name of the tank
    pub name: String,
    /// Width (OX), depth (OY) and height (OZ)
    pub dimensions: [f64; 3],
}

impl Tank {
    /// Create a tank, rejecting non-positive dimensions.
    pub fn new(name: impl Into<String>, dimensions: [f64; 3]) -> RigResult<Self> {
        let tank = Self {
            name: name.into(),
            dimensions,
        };
        tank.validate()?;
        Ok(tank)
    }

    fn validate(&self) -> RigResult<()> {
        if self
            .dimensions
            .iter()
            .any(|d| !d.is_finite() || *d <= 0.0)
        {
            return Err(RigError::InvalidPlan(format!(
                "tank '{}' must have positive dimensions, got {:?}",
                self.name, self.dimensions
            )));
        }
        Ok(())
    }
}

/// Sample coordinates along one axis of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridAxis(Vec<f64>);

impl GridAxis {
    /// Wrap explicit coordinates. Validation happens in [`Grid::new`].
    pub fn from_points(points: Vec<f64>) -> Self {
        Self(points)
    }

    /// Half-open range `[start, stop)` sampled every `step`.
    ///
    /// Coordinates are computed as `start + i * step` rather than by repeated
    /// addition so that long axes do not accumulate rounding error.
    pub fn range(start: f64, stop: f64, step: f64) -> RigResult<Self> {
        if !start.is_finite() || !stop.is_finite() || !step.is_finite() || step == 0.0 {
            return Err(RigError::InvalidPlan(format!(
                "invalid axis range start={start} stop={stop} step={step}"
            )));
        }
        let span = (stop - start) / step;
        if span <= 0.0 {
            return Ok(Self(Vec::new()));
        }
        if !span.is_finite() || span > MAX_AXIS_POINTS as f64 {
            return Err(RigError::InvalidPlan(format!(
                "axis range start={start} stop={stop} step={step} exceeds {MAX_AXIS_POINTS} points"
            )));
        }
        // Tolerate rounding in `span` so that e.g. [-0.05, 0.05) by 1e-3 yields 100 points
        let count = (span - 1e-9).ceil() as usize;
        Ok(Self((0..count).map(|i| start + i as f64 * step).collect()))
    }

    /// Number of samples along this axis.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the axis has no samples.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Coordinates in scan order.
    pub fn points(&self) -> &[f64] {
        &self.0
    }

    fn validate(&self, name: &str) -> RigResult<()> {
        if self.0.is_empty() {
            return Err(RigError::InvalidPlan(format!(
                "grid axis {name} has zero extent"
            )));
        }
        if self.0.iter().any(|p| !p.is_finite()) {
            return Err(RigError::InvalidPlan(format!(
                "grid axis {name} contains non-finite coordinates"
            )));
        }
        let increasing = self.0.windows(2).all(|w| w[1] > w[0]);
        let decreasing = self.0.windows(2).all(|w| w[1] < w[0]);
        if !(increasing || decreasing) {
            return Err(RigError::InvalidPlan(format!(
                "grid axis {name} is not strictly monotonic"
            )));
        }
        Ok(())
    }
}

/// The 3D sample grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    x: GridAxis,
    y: GridAxis,
    z: GridAxis,
}

impl Grid {
    /// Build a grid from its three axes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPlan` if any axis is empty, contains non-finite values
    /// or is not strictly monotonic, or if the grid exceeds
    /// [`MAX_GRID_POINTS`].
    pub fn new(x: GridAxis, y: GridAxis, z: GridAxis) -> RigResult<Self> {
        let grid = Self { x, y, z };
        grid.validate()?;
        Ok(grid)
    }

    fn validate(&self) -> RigResult<()> {
        self.x.validate("X")?;
        self.y.validate("Y")?;
        self.z.validate("Z")?;
        let total = self
            .x
            .len()
            .checked_mul(self.y.len())
            .and_then(|n| n.checked_mul(self.z.len()));
        match total {
            Some(n) if n <= MAX_GRID_POINTS => Ok(()),
            _ => Err(RigError::InvalidPlan(format!(
                "grid of {:?} points exceeds {MAX_GRID_POINTS} points",
                self.counts()
            ))),
        }
    }

    /// Grid with `nx * ny * nz` unit-spaced points starting at zero.
    pub fn with_counts(nx: usize, ny: usize, nz: usize) -> RigResult<Self> {
        let axis = |n: usize| GridAxis::from_points((0..n).map(|i| i as f64).collect());
        Self::new(axis(nx), axis(ny), axis(nz))
    }

    /// Axis X coordinates.
    pub fn x(&self) -> &GridAxis {
        &self.x
    }

    /// Axis Y coordinates.
    pub fn y(&self) -> &GridAxis {
        &self.y
    }

    /// Axis Z coordinates.
    pub fn z(&self) -> &GridAxis {
        &self.z
    }

    /// Point counts `(nx, ny, nz)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.x.len(), self.y.len(), self.z.len())
    }

    /// Total number of grid points.
    pub fn num_points(&self) -> usize {
        self.x.len() * self.y.len() * self.z.len()
    }
}

/// A plan of measurement to execute on the rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPlan {
    name: String,
    tank: Arc<Tank>,
    reference_position: Position,
    grid: Grid,
    grid_precision: [f64; 3],
}

impl MeasurementPlan {
    /// Create and validate a measurement plan.
    ///
    /// # Arguments
    ///
    /// * `name` - Human-readable measurement name
    /// * `tank` - Tank the measurement runs in (shared, read-only)
    /// * `reference_position` - Absolute position of grid index `(0, 0, 0)`
    /// * `grid` - The sample grid
    /// * `grid_precision` - Nominal X/Y/Z spacing used for relative moves
    ///
    /// # Errors
    ///
    /// Returns `InvalidPlan` for non-positive precision, a non-finite reference
    /// position or an invalid tank.
    pub fn new(
        name: impl Into<String>,
        tank: Arc<Tank>,
        reference_position: Position,
        grid: Grid,
        grid_precision: [f64; 3],
    ) -> RigResult<Self> {
        let plan = Self {
            name: name.into(),
            tank,
            reference_position,
            grid,
            grid_precision,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Re-check the plan invariants.
    ///
    /// Plans built through [`MeasurementPlan::new`] always pass; this exists
    /// for plans that arrived through deserialization.
    pub fn validate(&self) -> RigResult<()> {
        self.tank.validate()?;
        if self
            .grid_precision
            .iter()
            .any(|p| !p.is_finite() || *p <= 0.0)
        {
            return Err(RigError::InvalidPlan(format!(
                "grid precision must be positive on every axis, got {:?}",
                self.grid_precision
            )));
        }
        let r = self.reference_position;
        if !(r.x.is_finite() && r.y.is_finite() && r.z.is_finite()) {
            return Err(RigError::InvalidPlan(format!(
                "reference position {r} is not finite"
            )));
        }
        self.grid.validate()
    }

    /// Measurement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tank the measurement runs in.
    pub fn tank(&self) -> &Tank {
        &self.tank
    }

    /// Absolute position of grid index `(0, 0, 0)`.
    pub fn reference_position(&self) -> Position {
        self.reference_position
    }

    /// The sample grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Nominal spacing along X, Y and Z.
    pub fn grid_precision(&self) -> [f64; 3] {
        self.grid_precision
    }

    /// Spacing along one axis (zero for `Axis::None`).
    pub fn precision_along(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.grid_precision[0],
            Axis::Y => self.grid_precision[1],
            Axis::Z => self.grid_precision[2],
            Axis::None => 0.0,
        }
    }

    /// Absolute motor position of a grid index, assuming uniform spacing.
    pub fn position_of(&self, ix: usize, iy: usize, iz: usize) -> Position {
        let [px, py, pz] = self.grid_precision;
        let r = self.reference_position;
        Position::new(
            r.x + ix as f64 * px,
            r.y + iy as f64 * py,
            r.z + iz as f64 * pz,
        )
    }
}
