//! Planar geometry primitives used by the particle filter.
//!
//! Two types are provided:
//! - [`XYPair`]: a point (or displacement) in map coordinates.
//! - [`PolarCoordinate`]: a velocity expressed as a heading angle `theta` (radians, measured
//!   counter-clockwise from the positive x-axis) and a magnitude `radius`.
//!
//! A polar velocity applied to a point for one unit of time translates the point by
//! `(radius * cos(theta), radius * sin(theta))`.
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A point in continuous 2-D map coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct XYPair {
    pub x: f64,
    pub y: f64,
}
impl Display for XYPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}
impl XYPair {
    pub fn new(x: f64, y: f64) -> XYPair {
        XYPair { x, y }
    }
    /// Squared euclidean distance to another point.
    pub fn distance_squared(&self, other: &XYPair) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
    pub fn distance(&self, other: &XYPair) -> f64 {
        self.distance_squared(other).sqrt()
    }
    /// Apply `speed` to this point for one unit of time.
    ///
    /// # Example
    /// ```rust
    /// use mcl::geometry::{PolarCoordinate, XYPair};
    ///
    /// let mut position = XYPair::new(1.0, 1.0);
    /// position.move_by(&PolarCoordinate::new(0.0, 2.0));
    /// assert!((position.x - 3.0).abs() < 1e-12);
    /// assert!((position.y - 1.0).abs() < 1e-12);
    /// ```
    pub fn move_by(&mut self, speed: &PolarCoordinate) {
        let displacement = speed.to_cartesian();
        self.x += displacement.x;
        self.y += displacement.y;
    }
    pub fn to_point(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}
impl From<Point2<f64>> for XYPair {
    fn from(point: Point2<f64>) -> Self {
        XYPair::new(point.x, point.y)
    }
}
impl From<Vector2<f64>> for XYPair {
    fn from(vector: Vector2<f64>) -> Self {
        XYPair::new(vector.x, vector.y)
    }
}
impl From<(f64, f64)> for XYPair {
    fn from(tuple: (f64, f64)) -> Self {
        XYPair::new(tuple.0, tuple.1)
    }
}

/// A velocity (or any planar vector) in polar form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolarCoordinate {
    /// Heading in radians
    pub theta: f64,
    /// Magnitude, in map units per tick for velocities
    pub radius: f64,
}
impl Display for PolarCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} @ {:.3} rad", self.radius, self.theta)
    }
}
impl PolarCoordinate {
    pub fn new(theta: f64, radius: f64) -> PolarCoordinate {
        PolarCoordinate { theta, radius }
    }
    pub fn x_coord(&self) -> f64 {
        self.radius * self.theta.cos()
    }
    pub fn y_coord(&self) -> f64 {
        self.radius * self.theta.sin()
    }
    pub fn to_cartesian(&self) -> Vector2<f64> {
        Vector2::new(self.x_coord(), self.y_coord())
    }
    /// Build a polar vector from cartesian components. A zero vector maps to `theta = 0`.
    pub fn from_cartesian(x: f64, y: f64) -> PolarCoordinate {
        PolarCoordinate::new(y.atan2(x), x.hypot(y))
    }
    /// Heading wrapped into `(-pi, pi]`.
    pub fn wrapped_theta(&self) -> f64 {
        wrap_angle(self.theta)
    }
}

/// Wrap an angle in radians into `(-pi, pi]`.
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    PI - (PI - angle).rem_euclid(TAU)
}
