//! Environment lookups: what a particle would sense if it were the true pose.
use crate::geometry::XYPair;
use crate::particle::Particle;
use crate::sensors::{MAX_BRIGHTNESS, SensorInput};

use serde::{Deserialize, Serialize};

pub trait NavigationMap {
    fn expected_sensor_value(&self, particle: &Particle) -> SensorInput;
}
impl<F: Fn(&Particle) -> SensorInput> NavigationMap for F {
    fn expected_sensor_value(&self, particle: &Particle) -> SensorInput {
        self(particle)
    }
}

/// Surface colour as seen by a downward-facing light sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    Black,
    White,
}
impl Color {
    pub fn brightness(&self) -> f64 {
        match self {
            Color::Black => 0.0,
            Color::White => MAX_BRIGHTNESS,
        }
    }
}

/// A white ring painted on a black floor.
///
/// Points strictly inside the outer circle but not strictly inside the inner circle are
/// white; everything else is black.
///
/// # Example
/// ```rust
/// use mcl::geometry::XYPair;
/// use mcl::map::{Color, RingMap};
///
/// let map = RingMap::new(XYPair::new(0.0, 0.0), 40.0, 60.0);
/// assert_eq!(map.color_at(&XYPair::new(50.0, 0.0)), Color::White);
/// assert_eq!(map.color_at(&XYPair::new(10.0, 0.0)), Color::Black);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RingMap {
    pub center: XYPair,
    pub inner_radius: f64,
    pub outer_radius: f64,
}
impl Default for RingMap {
    fn default() -> Self {
        RingMap::new(XYPair::default(), 40.0, 60.0)
    }
}
impl RingMap {
    pub fn new(center: XYPair, inner_radius: f64, outer_radius: f64) -> RingMap {
        RingMap {
            center,
            inner_radius,
            outer_radius,
        }
    }
    fn inside_circle(&self, point: &XYPair, radius: f64) -> bool {
        point.distance_squared(&self.center) < radius * radius
    }
    pub fn color_at(&self, position: &XYPair) -> Color {
        if !self.inside_circle(position, self.inner_radius)
            && self.inside_circle(position, self.outer_radius)
        {
            Color::White
        } else {
            Color::Black
        }
    }
}
impl NavigationMap for RingMap {
    /// Brightness of the floor under the particle; the particle's own speed is echoed back.
    fn expected_sensor_value(&self, particle: &Particle) -> SensorInput {
        SensorInput::new(
            self.color_at(&particle.position).brightness(),
            particle.speed,
        )
    }
}
