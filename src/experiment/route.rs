//! Scan-route planning.
//!
//! [`plan_route`] turns a [`Grid`] into a [`ScanRoute`]: every grid point in
//! visiting order, each tagged with the single motor move that brings the
//! probe to it from the previous point.
//!
//! # Traversal
//!
//! The route is a boustrophedon ("lawnmower") pass with X as the fastest
//! axis, Y as the middle axis and Z as the slowest:
//!
//! ```text
//!  layer iz = 0 (Y forward)        layer iz = 1 (Y reverse)
//!
//!  iy=2  ●──▶●──▶●                 iy=2  ●◀──●◀──●  (enters from iz = 0)
//!        ▲                               │
//!  iy=1  ●◀──●◀──●                 iy=1  ●──▶●──▶●
//!                ▲                               │
//!  iy=0  ●──▶●──▶●                 iy=0  ●◀──●◀──●
//! ```
//!
//! - X direction alternates on every row, counted across layers, so X never
//!   has to return to its start.
//! - Y direction alternates on every layer for the same reason.
//! - Z is visited once, strictly increasing. There is no Z reversal.
//!
//! Consecutive points therefore always differ by exactly one step along
//! exactly one axis, and the executor never has to recompute geometry.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::plan::Grid;

/// One linear degree of freedom of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Fastest-varying axis
    X,
    /// Middle axis
    Y,
    /// Slowest axis, single forward pass
    Z,
    /// No axis (first route entry)
    None,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
            Axis::None => write!(f, "-"),
        }
    }
}

/// Direction of a single-axis move relative to the local origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Decreases the axis' absolute position
    TowardOrigin,
    /// Increases the axis' absolute position
    AwayFromOrigin,
    /// No move
    None,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::TowardOrigin => write!(f, "toward"),
            Direction::AwayFromOrigin => write!(f, "away"),
            Direction::None => write!(f, "none"),
        }
    }
}

/// A motor instruction: which axis moves and which way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Motion {
    /// Axis to move
    pub axis: Axis,
    /// Direction of the move
    pub direction: Direction,
}

impl Motion {
    /// No move at all. Only the first route entry carries it.
    pub const NONE: Motion = Motion {
        axis: Axis::None,
        direction: Direction::None,
    };

    /// End-of-route marker, reported after the last point.
    ///
    /// It names the Z axis but carries no direction: the single Z pass is
    /// complete and no motor moves.
    pub const TERMINAL: Motion = Motion {
        axis: Axis::Z,
        direction: Direction::None,
    };

    /// A one-step move along `axis`.
    pub const fn step(axis: Axis, direction: Direction) -> Self {
        Self { axis, direction }
    }

    /// Whether this instruction actually moves a motor.
    pub fn is_move(&self) -> bool {
        self.axis != Axis::None && self.direction != Direction::None
    }

    /// Whether this is the end-of-route marker.
    pub fn is_terminal(&self) -> bool {
        *self == Motion::TERMINAL
    }

    /// Signed distance for a move of one `precision` unit.
    pub fn signed_distance(&self, precision: f64) -> f64 {
        if !self.is_move() {
            return 0.0;
        }
        match self.direction {
            Direction::AwayFromOrigin => precision,
            Direction::TowardOrigin => -precision,
            Direction::None => 0.0,
        }
    }
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_terminal() {
            write!(f, "Z end")
        } else if self.is_move() {
            write!(f, "{} {}", self.axis, self.direction)
        } else {
            write!(f, "none")
        }
    }
}

/// One grid point of the route and the move that reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStep {
    /// X index
    pub ix: usize,
    /// Y index
    pub iy: usize,
    /// Z index
    pub iz: usize,
    /// Axis moved to reach this point from the previous one
    pub axis: Axis,
    /// Direction of that move
    pub direction: Direction,
}

impl RouteStep {
    /// Move that reaches this point from the previous one.
    pub fn arrival(&self) -> Motion {
        Motion::step(self.axis, self.direction)
    }

    /// Grid index triple `(ix, iy, iz)`.
    pub fn index(&self) -> (usize, usize, usize) {
        (self.ix, self.iy, self.iz)
    }
}

/// The fully materialized visiting order of a grid.
///
/// Derived once per configured plan and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRoute {
    steps: Vec<RouteStep>,
    counts: (usize, usize, usize),
}

impl ScanRoute {
    /// Number of points in the route (`nx * ny * nz`).
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the route has no points.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Grid counts `(nx, ny, nz)` the route was planned for.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.counts
    }

    /// All entries in visiting order.
    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    /// Entry at route index `i`.
    pub fn get(&self, i: usize) -> Option<&RouteStep> {
        self.steps.get(i)
    }

    /// Move to perform after recording the point at index `i`.
    ///
    /// This is the arrival move of the next entry, or [`Motion::TERMINAL`]
    /// after the last point. `None` if `i` is out of range.
    pub fn departure(&self, i: usize) -> Option<Motion> {
        if i >= self.steps.len() {
            return None;
        }
        Some(
            self.steps
                .get(i + 1)
                .map(RouteStep::arrival)
                .unwrap_or(Motion::TERMINAL),
        )
    }

    /// Iterate over the entries in visiting order.
    pub fn iter(&self) -> std::slice::Iter<'_, RouteStep> {
        self.steps.iter()
    }
}

impl<'a> IntoIterator for &'a ScanRoute {
    type Item = &'a RouteStep;
    type IntoIter = std::slice::Iter<'a, RouteStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Plan the visiting order of every point of `grid`.
///
/// Pure and deterministic; O(nx·ny·nz) time and space.
pub fn plan_route(grid: &Grid) -> ScanRoute {
    let (nx, ny, nz) = grid.counts();
    let mut steps = Vec::with_capacity(nx * ny * nz);

    // Rows are counted across layers so the X direction keeps alternating
    // when the probe climbs to the next layer.
    let mut row = 0usize;

    for iz in 0..nz {
        let y_forward = iz % 2 == 0;
        for k in 0..ny {
            let iy = if y_forward { k } else { ny - 1 - k };
            let x_forward = row % 2 == 0;
            for j in 0..nx {
                let ix = if x_forward { j } else { nx - 1 - j };

                let arrival = if j > 0 {
                    Motion::step(Axis::X, forward_direction(x_forward))
                } else if k > 0 {
                    Motion::step(Axis::Y, forward_direction(y_forward))
                } else if iz > 0 {
                    Motion::step(Axis::Z, Direction::AwayFromOrigin)
                } else {
                    Motion::NONE
                };

                steps.push(RouteStep {
                    ix,
                    iy,
                    iz,
                    axis: arrival.axis,
                    direction: arrival.direction,
                });
            }
            row += 1;
        }
    }

    ScanRoute {
        steps,
        counts: (nx, ny, nz),
    }
}

fn forward_direction(forward: bool) -> Direction {
    if forward {
        Direction::AwayFromOrigin
    } else {
        Direction::TowardOrigin
    }
}
