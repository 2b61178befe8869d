//! Kinematic model used to advance resampled particles.
//!
//! The model is a first-order (Euler) integrator with a unit time step. The sensed speed is
//! relative to the vehicle: its heading is a change of heading and is added to the particle's
//! prior heading, its magnitude replaces the particle's speed. The resulting velocity is then
//! applied to the particle's position for one tick.
use crate::geometry::{PolarCoordinate, XYPair};
use crate::particle::Particle;

use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Advance `starting_point` by `sensed_speed` and store the result in `destination`.
///
/// The destination weight is reset to zero; it is derived again during the next tick.
///
/// # Example
/// ```rust
/// use mcl::estimation::estimate_new_particle;
/// use mcl::geometry::PolarCoordinate;
/// use mcl::particle::Particle;
///
/// let start = Particle::default();
/// let mut destination = Particle::default();
/// estimate_new_particle(
///     &mut destination,
///     &start,
///     &PolarCoordinate::new(std::f64::consts::FRAC_PI_2, 1.0),
/// );
/// assert!(destination.position.x.abs() < 1e-12);
/// assert!((destination.position.y - 1.0).abs() < 1e-12);
/// ```
pub fn estimate_new_particle(
    destination: &mut Particle,
    starting_point: &Particle,
    sensed_speed: &PolarCoordinate,
) {
    starting_point.copy_to(destination);
    destination.weight = 0.0;
    apply_movement(&mut destination.position, &mut destination.speed, sensed_speed);
}

/// Turn `speed` into map coordinates using the vehicle-relative `application_speed`, then move
/// `position` by it for one unit of time.
pub fn apply_movement(
    position: &mut XYPair,
    speed: &mut PolarCoordinate,
    application_speed: &PolarCoordinate,
) {
    speed.theta += application_speed.theta;
    speed.radius = application_speed.radius;
    position.move_by(speed);
}

/// Zero-mean Gaussian jitter applied before integration.
#[derive(Clone, Copy, Debug)]
pub struct Perturbation {
    position: Normal<f64>,
    heading: Normal<f64>,
}

/// Zero-mean normal distribution, or `None` if `std_dev` is negative or not finite.
///
/// `Normal::new` accepts a negative standard deviation (it mirrors the distribution), so the
/// sign is checked here.
pub fn zero_mean_normal(std_dev: f64) -> Option<Normal<f64>> {
    if !(std_dev >= 0.0 && std_dev.is_finite()) {
        return None;
    }
    Normal::new(0.0, std_dev).ok()
}

impl Perturbation {
    /// Returns `None` if either standard deviation is negative or not finite.
    pub fn new(position_std_dev: f64, heading_std_dev: f64) -> Option<Self> {
        Some(Perturbation {
            position: zero_mean_normal(position_std_dev)?,
            heading: zero_mean_normal(heading_std_dev)?,
        })
    }
    pub fn position_std_dev(&self) -> f64 {
        self.position.std_dev()
    }
    pub fn heading_std_dev(&self) -> f64 {
        self.heading.std_dev()
    }
}

/// [`estimate_new_particle`] with the copied position and the sensed heading jittered by
/// `perturbation` first.
pub fn estimate_perturbed_particle<R: Rng + ?Sized>(
    destination: &mut Particle,
    starting_point: &Particle,
    sensed_speed: &PolarCoordinate,
    perturbation: &Perturbation,
    rng: &mut R,
) {
    starting_point.copy_to(destination);
    destination.weight = 0.0;
    destination.position.x += perturbation.position.sample(rng);
    destination.position.y += perturbation.position.sample(rng);
    let jittered = PolarCoordinate::new(
        sensed_speed.theta + perturbation.heading.sample(rng),
        sensed_speed.radius,
    );
    apply_movement(&mut destination.position, &mut destination.speed, &jittered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn zero_speed_leaves_position_unchanged() {
        let origin = Particle::new(
            XYPair::new(3.0, -4.0),
            PolarCoordinate::new(0.7, 0.0),
            0.4,
        );
        let mut destination = Particle::default();
        estimate_new_particle(&mut destination, &origin, &PolarCoordinate::new(0.0, 0.0));
        assert_eq!(destination.position.distance_squared(&origin.position), 0.0);
        assert_eq!(destination.weight, 0.0);
    }

    #[test]
    fn moves_from_rest_along_sensed_heading() {
        let origin = Particle::default();
        let mut destination = Particle::default();
        estimate_new_particle(&mut destination, &origin, &PolarCoordinate::new(FRAC_PI_2, 1.0));
        assert_approx_eq!(destination.position.x, 0.0, 1e-12);
        assert_approx_eq!(destination.position.y, 1.0, 1e-12);
        assert_approx_eq!(destination.speed.theta, FRAC_PI_2, 1e-12);
        assert_approx_eq!(destination.speed.radius, 1.0, 1e-12);
    }

    #[test]
    fn sensed_heading_is_added_to_prior_heading() {
        let origin = Particle::new(XYPair::default(), PolarCoordinate::new(FRAC_PI_2, 0.0), 1.0);
        let mut destination = Particle::default();
        estimate_new_particle(&mut destination, &origin, &PolarCoordinate::new(PI, 1.0));
        let expected = PolarCoordinate::new(3.0 * FRAC_PI_2, 1.0);
        assert_approx_eq!(destination.position.x, expected.x_coord(), 1e-12);
        assert_approx_eq!(destination.position.y, expected.y_coord(), 1e-12);
        assert_approx_eq!(destination.position.y, -1.0, 1e-12);
        // the starting particle is left alone
        assert_eq!(origin.position, XYPair::default());
    }

    #[test]
    fn speed_magnitude_is_replaced() {
        let origin = Particle::new(XYPair::new(1.0, 1.0), PolarCoordinate::new(0.0, 9.0), 1.0);
        let mut destination = Particle::default();
        estimate_new_particle(&mut destination, &origin, &PolarCoordinate::new(0.0, 2.0));
        assert_approx_eq!(destination.position.x, 3.0, 1e-12);
        assert_approx_eq!(destination.speed.radius, 2.0, 1e-12);
    }

    #[test]
    fn perturbation_with_zero_noise_matches_plain_estimate() {
        let origin = Particle::new(XYPair::new(2.0, 0.0), PolarCoordinate::new(0.3, 1.0), 1.0);
        let sensed = PolarCoordinate::new(0.2, 1.5);
        let mut plain = Particle::default();
        estimate_new_particle(&mut plain, &origin, &sensed);

        let mut rng = StdRng::seed_from_u64(3);
        let perturbation = Perturbation::new(0.0, 0.0).unwrap();
        let mut jittered = Particle::default();
        estimate_perturbed_particle(&mut jittered, &origin, &sensed, &perturbation, &mut rng);
        assert_approx_eq!(plain.position.x, jittered.position.x, 1e-12);
        assert_approx_eq!(plain.position.y, jittered.position.y, 1e-12);
    }

    #[test]
    fn perturbation_spreads_positions() {
        let origin = Particle::default();
        let sensed = PolarCoordinate::new(0.0, 0.0);
        let perturbation = Perturbation::new(5.0, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let mut sum_sq = 0.0;
        for _ in 0..n {
            let mut destination = Particle::default();
            estimate_perturbed_particle(
                &mut destination,
                &origin,
                &sensed,
                &perturbation,
                &mut rng,
            );
            sum_sq += destination.position.x * destination.position.x;
        }
        let std_dev = (sum_sq / n as f64).sqrt();
        assert!((std_dev - 5.0).abs() < 0.25, "sample std dev {std_dev}");
    }

    #[test]
    fn perturbation_rejects_negative_std_dev() {
        assert!(Perturbation::new(-1.0, 0.1).is_none());
        assert!(Perturbation::new(1.0, f64::NAN).is_none());
        assert!(Perturbation::new(0.5, -0.01).is_none());
        assert!(zero_mean_normal(-2.0).is_none());
        assert!(zero_mean_normal(f64::INFINITY).is_none());
        assert_approx_eq!(zero_mean_normal(0.0).unwrap().std_dev(), 0.0, 1e-12);
        let ok = Perturbation::new(5.0, 0.05).unwrap();
        assert_approx_eq!(ok.position_std_dev(), 5.0, 1e-12);
        assert_approx_eq!(ok.heading_std_dev(), 0.05, 1e-12);
    }
}
