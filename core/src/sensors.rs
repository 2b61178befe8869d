//! Sensor readings and the collaborator traits the filter calls into.
//!
//! The filter is agnostic to how readings are produced or scored. It needs:
//! - a [`Sensor`] that is queried exactly once per tick,
//! - a [`SensorModel`] that scores how likely the actual reading is given what a particle
//!   would have seen,
//! - a [`ParticleFieldConsumer`] that receives the resampled field.
//!
//! The expected reading for a particle comes from a
//! [`NavigationMap`](crate::map::NavigationMap). Plain closures implement every trait, which
//! keeps tests and small programs short.
use crate::geometry::PolarCoordinate;
use crate::particle::Particle;
use crate::pool::WeightedPool;

use serde::{Deserialize, Serialize};

/// Largest value a brightness measurement takes.
pub const MAX_BRIGHTNESS: f64 = 255.0;

/// One reading, produced once per tick and shared read-only by the rest of that tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorInput {
    /// Reflected light intensity, `0` (black) to [`MAX_BRIGHTNESS`] (white)
    pub brightness: f64,
    /// Vehicle-relative velocity: heading change and distance travelled per tick
    pub speed: PolarCoordinate,
}
impl SensorInput {
    pub fn new(brightness: f64, speed: PolarCoordinate) -> SensorInput {
        SensorInput { brightness, speed }
    }
}

pub trait Sensor {
    fn sense(&mut self) -> SensorInput;
}
impl<F: FnMut() -> SensorInput> Sensor for F {
    fn sense(&mut self) -> SensorInput {
        self()
    }
}

pub trait SensorModel {
    /// Likelihood of `actual` given that `expected` was predicted. Must be non-negative.
    fn probability_of_measured_result_given_expected(
        &self,
        expected: &SensorInput,
        actual: &SensorInput,
    ) -> f64;
}
impl<F: Fn(&SensorInput, &SensorInput) -> f64> SensorModel for F {
    fn probability_of_measured_result_given_expected(
        &self,
        expected: &SensorInput,
        actual: &SensorInput,
    ) -> f64 {
        self(expected, actual)
    }
}

/// Receiver of each freshly resampled particle field.
///
/// The pool is handed out by shared reference. Its storage becomes the filter's "old" pool on
/// the next tick, so consumers that need the particles afterwards must copy them out
/// (for example with [`WeightedPool::snapshot`]).
pub trait ParticleFieldConsumer {
    fn consume(&mut self, field: &WeightedPool<Particle>);
}
impl<F: FnMut(&WeightedPool<Particle>)> ParticleFieldConsumer for F {
    fn consume(&mut self, field: &WeightedPool<Particle>) {
        self(field)
    }
}

/// Linear brightness likelihood of a downward-facing light sensor: one minus the normalized
/// absolute brightness difference.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReflectedLightModel;

impl SensorModel for ReflectedLightModel {
    fn probability_of_measured_result_given_expected(
        &self,
        expected: &SensorInput,
        actual: &SensorInput,
    ) -> f64 {
        let difference = (expected.brightness - actual.brightness).abs();
        (1.0 - difference / MAX_BRIGHTNESS).clamp(0.0, 1.0)
    }
}

/// Gaussian brightness likelihood, `exp(-0.5 * (difference / std_dev)^2)`.
///
/// Unlike [`ReflectedLightModel`] it never reaches exactly zero for realistic differences,
/// which keeps a filter alive through isolated bad readings.
#[derive(Clone, Copy, Debug)]
pub struct GaussianBrightnessModel {
    pub std_dev: f64,
}

impl GaussianBrightnessModel {
    pub fn new(std_dev: f64) -> Self {
        GaussianBrightnessModel { std_dev }
    }
}

impl SensorModel for GaussianBrightnessModel {
    fn probability_of_measured_result_given_expected(
        &self,
        expected: &SensorInput,
        actual: &SensorInput,
    ) -> f64 {
        let normalized = (expected.brightness - actual.brightness) / self.std_dev;
        (-0.5 * normalized * normalized).exp()
    }
}
