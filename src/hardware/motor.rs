//! Axis motors.
//!
//! The core models each linear axis as an absolute position tracker with a
//! relative-move primitive. Moves always succeed and are never clamped; range
//! limits and actuator faults belong to the physical motor driver.

use tracing::trace;

use crate::experiment::{Axis, Motion, Position};

/// Motor that moves the probe along one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMotor {
    axis: Axis,
    position: f64,
}

impl AxisMotor {
    /// Create a motor for `axis` at an absolute `position`.
    pub fn new(axis: Axis, position: f64) -> Self {
        Self { axis, position }
    }

    /// Axis this motor drives.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Current absolute position.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Move by exactly `distance` (negative moves toward the origin).
    pub fn move_by(&mut self, distance: f64) {
        self.position += distance;
        trace!(axis = %self.axis, distance, position = self.position, "motor moved");
    }

    /// Move to an absolute `target` with a single relative move.
    pub fn move_to(&mut self, target: f64) {
        let distance = target - self.position;
        if distance != 0.0 {
            self.move_by(distance);
        }
    }
}

/// The X, Y and Z motors of one rig.
#[derive(Debug, Clone, PartialEq)]
pub struct Motors {
    x: AxisMotor,
    y: AxisMotor,
    z: AxisMotor,
}

impl Motors {
    /// Motor triple parked at `position`.
    pub fn at(position: Position) -> Self {
        Self {
            x: AxisMotor::new(Axis::X, position.x),
            y: AxisMotor::new(Axis::Y, position.y),
            z: AxisMotor::new(Axis::Z, position.z),
        }
    }

    /// Motor driving `axis`, `None` for `Axis::None`.
    pub fn get(&self, axis: Axis) -> Option<&AxisMotor> {
        match axis {
            Axis::X => Some(&self.x),
            Axis::Y => Some(&self.y),
            Axis::Z => Some(&self.z),
            Axis::None => None,
        }
    }

    fn get_mut(&mut self, axis: Axis) -> Option<&mut AxisMotor> {
        match axis {
            Axis::X => Some(&mut self.x),
            Axis::Y => Some(&mut self.y),
            Axis::Z => Some(&mut self.z),
            Axis::None => None,
        }
    }

    /// Absolute positions of all three motors.
    pub fn position(&self) -> Position {
        Position::new(self.x.position(), self.y.position(), self.z.position())
    }

    /// Execute a route motion of one `precision` unit.
    ///
    /// Motions that do not move (`NONE`, the terminal marker) are ignored.
    /// Returns whether a motor moved.
    pub fn apply(&mut self, motion: Motion, precision: f64) -> bool {
        if !motion.is_move() {
            return false;
        }
        let distance = motion.signed_distance(precision);
        match self.get_mut(motion.axis) {
            Some(motor) => {
                motor.move_by(distance);
                true
            }
            None => false,
        }
    }

    /// Drive every axis from its current position to `target`.
    pub fn move_to(&mut self, target: Position) {
        self.x.move_to(target.x);
        self.y.move_to(target.y);
        self.z.move_to(target.z);
    }
}

impl Default for Motors {
    fn default() -> Self {
        Self::at(Position::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Direction;

    #[test]
    fn test_move_by_is_exact_and_unclamped() {
        let mut motor = AxisMotor::new(Axis::X, 5e-3);
        motor.move_by(-1.0);
        motor.move_by(0.25);
        assert!((motor.position() - (5e-3 - 0.75)).abs() < 1e-12);
        assert_eq!(motor.axis(), Axis::X);
    }

    #[test]
    fn test_apply_route_motion() {
        let mut motors = Motors::at(Position::new(1.0, 2.0, 3.0));

        assert!(motors.apply(Motion::step(Axis::X, Direction::AwayFromOrigin), 0.5));
        assert!(motors.apply(Motion::step(Axis::Y, Direction::TowardOrigin), 0.5));
        assert!(motors.apply(Motion::step(Axis::Z, Direction::AwayFromOrigin), 0.5));
        assert_eq!(motors.position(), Position::new(1.5, 1.5, 3.5));

        assert!(!motors.apply(Motion::NONE, 0.5));
        assert!(!motors.apply(Motion::TERMINAL, 0.5));
        assert_eq!(motors.position(), Position::new(1.5, 1.5, 3.5));
    }

    #[test]
    fn test_move_to_target() {
        let mut motors = Motors::at(Position::new(5e-3, 6e-3, 7e-3));
        motors.move_to(Position::new(1e-3, 7e-3, 2e-3));
        assert!(motors
            .position()
            .approx_eq(&Position::new(1e-3, 7e-3, 2e-3), 1e-12));
        assert_eq!(motors.get(Axis::None), None);
        assert_eq!(motors.get(Axis::Y).map(AxisMotor::axis), Some(Axis::Y));
    }
}
