//! Particles and particle-field statistics.
//!
//! A [`Particle`] is one hypothesis of where the robot is and how it is moving. The filter keeps
//! a fixed number of them in a [`WeightedPool`](crate::pool::WeightedPool) and rewrites them in
//! place every tick. Any type implementing [`Weighted`] can live in a pool; the pool never looks
//! at anything else.
use crate::geometry::{PolarCoordinate, XYPair};

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Weight used for freshly allocated particles.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Capability required by [`WeightedPool`](crate::pool::WeightedPool).
pub trait Weighted {
    fn weight(&self) -> f64;
    fn set_weight(&mut self, weight: f64);
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Position in map coordinates
    pub position: XYPair,
    /// Velocity in map coordinates, heading and magnitude per tick
    pub speed: PolarCoordinate,
    pub weight: f64,
}
impl Default for Particle {
    fn default() -> Self {
        Particle {
            position: XYPair::default(),
            speed: PolarCoordinate::default(),
            weight: DEFAULT_WEIGHT,
        }
    }
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.position.x)
            .field("y", &self.position.y)
            .field("heading", &self.speed.theta)
            .field("speed", &self.speed.radius)
            .field("weight", &self.weight)
            .finish()
    }
}
impl Particle {
    pub fn new(position: XYPair, speed: PolarCoordinate, weight: f64) -> Particle {
        Particle {
            position,
            speed,
            weight,
        }
    }
    /// Copy position and speed into `destination`, leaving its weight alone.
    pub fn copy_to(&self, destination: &mut Particle) {
        destination.position = self.position;
        destination.speed = self.speed;
    }
}
impl Weighted for Particle {
    fn weight(&self) -> f64 {
        self.weight
    }
    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}

/// Summary statistics of a particle field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldEstimate {
    pub position: XYPair,
    /// Position covariance (map units squared)
    pub covariance: Matrix2<f64>,
    /// Circular mean of the particle headings, in `(-pi, pi]`
    pub heading: f64,
    pub speed: f64,
}
impl FieldEstimate {
    /// Square root of the covariance trace; a single-number spread of the field.
    pub fn spread(&self) -> f64 {
        self.covariance.trace().max(0.0).sqrt()
    }
}

/// How a particle field is collapsed into a single pose estimate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ParticleAveragingStrategy {
    /// Weighted mean; falls back to the unweighted mean when all weights are zero, which is
    /// the case for a freshly resampled field.
    WeightedAverage,
    #[default]
    UnweightedAverage,
    HighestWeight,
}

impl ParticleAveragingStrategy {
    /// Estimate the pose represented by `particles`. Returns `None` for an empty field.
    pub fn estimate(&self, particles: &[Particle]) -> Option<FieldEstimate> {
        if particles.is_empty() {
            return None;
        }
        match self {
            ParticleAveragingStrategy::WeightedAverage => {
                let total: f64 = particles.iter().map(|p| p.weight).sum();
                if total > 0.0 && total.is_finite() {
                    let weights: Vec<f64> = particles.iter().map(|p| p.weight / total).collect();
                    Some(Self::average(particles, &weights))
                } else {
                    Self::UnweightedAverage.estimate(particles)
                }
            }
            ParticleAveragingStrategy::UnweightedAverage => {
                let n = particles.len() as f64;
                let weights = vec![1.0 / n; particles.len()];
                Some(Self::average(particles, &weights))
            }
            ParticleAveragingStrategy::HighestWeight => {
                let best = particles
                    .iter()
                    .max_by(|a, b| a.weight.total_cmp(&b.weight))?;
                Some(FieldEstimate {
                    position: best.position,
                    covariance: Matrix2::zeros(),
                    heading: best.speed.wrapped_theta(),
                    speed: best.speed.radius,
                })
            }
        }
    }

    fn average(particles: &[Particle], weights: &[f64]) -> FieldEstimate {
        let mut mean = Vector2::<f64>::zeros();
        let mut sin_sum = 0.0;
        let mut cos_sum = 0.0;
        let mut speed = 0.0;
        for (particle, &w) in particles.iter().zip(weights) {
            mean += w * particle.position.to_vector();
            sin_sum += w * particle.speed.theta.sin();
            cos_sum += w * particle.speed.theta.cos();
            speed += w * particle.speed.radius;
        }
        let mut covariance = Matrix2::<f64>::zeros();
        for (particle, &w) in particles.iter().zip(weights) {
            let diff = particle.position.to_vector() - mean;
            covariance += w * diff * diff.transpose();
        }
        FieldEstimate {
            position: mean.into(),
            covariance,
            heading: PolarCoordinate::new(sin_sum.atan2(cos_sum), 1.0).wrapped_theta(),
            speed,
        }
    }
}
