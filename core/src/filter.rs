//! Monte Carlo localization filter.
//!
//! The filter keeps two particle pools of equal, fixed size. At any time one of them is the
//! "new" pool, holding the most recently published particle field, and the other is the "old"
//! pool, whose storage is free to be overwritten. Every call to
//! [`ParticleFilter::sense_estimate`] runs one tick:
//!
//! 1. **Swap**: the new pool becomes the old pool and vice versa. Nothing is copied.
//! 2. **Sense**: the [`Sensor`] is queried once; the reading is used for the whole tick.
//! 3. **Weigh**: each old particle is scored by the [`SensorModel`] against what the
//!    [`NavigationMap`] says that particle should have sensed.
//! 4. **Normalize**: the weights are divided by their sum. A zero sum means every hypothesis
//!    was ruled out and the tick fails with [`FilterError::Diverged`].
//! 5. **Resample**: the old pool is turned into a cumulative table once, then each weighted
//!    draw seeds `replacement_factor` consecutive particles of the new pool, each advanced with
//!    the sensed speed (see [`crate::estimation`]). The new pool is always filled exactly.
//! 6. **Publish**: the new pool is handed to the [`ParticleFieldConsumer`].
//!
//! A failed tick publishes nothing, so the consumer keeps the last good field.
//!
//! # Example
//! ```rust
//! use mcl::config::FilterConfig;
//! use mcl::filter::ParticleFilter;
//! use mcl::geometry::PolarCoordinate;
//! use mcl::particle::Particle;
//! use mcl::pool::WeightedPool;
//! use mcl::sensors::SensorInput;
//!
//! let mut filter = ParticleFilter::builder()
//!     .config(FilterConfig::with_particle_count(10))
//!     .sensor(|| SensorInput::new(255.0, PolarCoordinate::new(0.0, 1.0)))
//!     .sensor_model(|expected: &SensorInput, actual: &SensorInput| {
//!         if expected.brightness == actual.brightness { 1.0 } else { 0.1 }
//!     })
//!     .navigation_map(|p: &Particle| SensorInput::new(255.0, p.speed))
//!     .consumer(|field: &WeightedPool<Particle>| assert_eq!(field.size(), 10))
//!     .build()
//!     .unwrap();
//! let report = filter.sense_estimate().unwrap();
//! assert_eq!(report.tick, 1);
//! ```
use crate::config::{FilterConfig, InitialDistribution};
use crate::error::{FilterError, Result};
use crate::estimation::{Perturbation, estimate_new_particle, estimate_perturbed_particle};
use crate::geometry::{PolarCoordinate, XYPair};
use crate::map::NavigationMap;
use crate::particle::{FieldEstimate, Particle, ParticleAveragingStrategy, Weighted};
use crate::pool::WeightedPool;
use crate::sensors::{ParticleFieldConsumer, Sensor, SensorModel};

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::TAU;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};

/// Where the filter is within a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPhase {
    Idle,
    Sensing,
    Weighing,
    Normalizing,
    Resampling,
    Published,
}

/// Diagnostics of one successful tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Sum of the un-normalized particle likelihoods
    pub weight_sum: f64,
    /// `1 / sum(w^2)` of the normalized weights, between 1 and the particle count
    pub effective_sample_size: f64,
}

/// Collects the collaborators and configuration of a [`ParticleFilter`].
#[derive(Default)]
pub struct ParticleFilterBuilder {
    config: FilterConfig,
    sensor: Option<Box<dyn Sensor>>,
    sensor_model: Option<Box<dyn SensorModel>>,
    navigation_map: Option<Box<dyn NavigationMap>>,
    consumer: Option<Box<dyn ParticleFieldConsumer>>,
}

impl ParticleFilterBuilder {
    pub fn config(mut self, config: FilterConfig) -> Self {
        self.config = config;
        self
    }
    pub fn particle_count(mut self, particle_count: usize) -> Self {
        self.config.particle_count = particle_count;
        self
    }
    pub fn sensor(mut self, sensor: impl Sensor + 'static) -> Self {
        self.sensor = Some(Box::new(sensor));
        self
    }
    pub fn sensor_model(mut self, sensor_model: impl SensorModel + 'static) -> Self {
        self.sensor_model = Some(Box::new(sensor_model));
        self
    }
    pub fn navigation_map(mut self, navigation_map: impl NavigationMap + 'static) -> Self {
        self.navigation_map = Some(Box::new(navigation_map));
        self
    }
    pub fn consumer(mut self, consumer: impl ParticleFieldConsumer + 'static) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }
    /// Validate the configuration, check every collaborator is present and allocate the pools.
    pub fn build(self) -> Result<ParticleFilter> {
        self.config.validate()?;
        let sensor = self
            .sensor
            .ok_or(FilterError::MissingCollaborator("sensor"))?;
        let sensor_model = self
            .sensor_model
            .ok_or(FilterError::MissingCollaborator("sensor model"))?;
        let navigation_map = self
            .navigation_map
            .ok_or(FilterError::MissingCollaborator("navigation map"))?;
        let consumer = self
            .consumer
            .ok_or(FilterError::MissingCollaborator("particle field consumer"))?;
        ParticleFilter::from_parts(self.config, sensor, sensor_model, navigation_map, consumer)
    }
}

pub struct ParticleFilter {
    config: FilterConfig,
    /// Double buffer; `pools[old]` is the old pool, `pools[1 - old]` the new one.
    pools: [WeightedPool<Particle>; 2],
    old: usize,
    sensor: Box<dyn Sensor>,
    sensor_model: Box<dyn SensorModel>,
    navigation_map: Box<dyn NavigationMap>,
    consumer: Box<dyn ParticleFieldConsumer>,
    perturbation: Option<Perturbation>,
    rng: StdRng,
    tick: u64,
    phase: FilterPhase,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.config.particle_count)
            .field("replacement_factor", &self.config.replacement_factor)
            .field("tick", &self.tick)
            .field("phase", &self.phase);
        if let Some(estimate) = self.estimate(&ParticleAveragingStrategy::UnweightedAverage) {
            s.field(
                "mean_position",
                &format_args!("({:.3}, {:.3})", estimate.position.x, estimate.position.y),
            )
            .field("spread", &format_args!("{:.3}", estimate.spread()));
        }
        s.finish()
    }
}

impl ParticleFilter {
    pub fn builder() -> ParticleFilterBuilder {
        ParticleFilterBuilder::default()
    }

    pub fn new(
        config: FilterConfig,
        sensor: impl Sensor + 'static,
        sensor_model: impl SensorModel + 'static,
        navigation_map: impl NavigationMap + 'static,
        consumer: impl ParticleFieldConsumer + 'static,
    ) -> Result<Self> {
        Self::builder()
            .config(config)
            .sensor(sensor)
            .sensor_model(sensor_model)
            .navigation_map(navigation_map)
            .consumer(consumer)
            .build()
    }

    fn from_parts(
        config: FilterConfig,
        sensor: Box<dyn Sensor>,
        sensor_model: Box<dyn SensorModel>,
        navigation_map: Box<dyn NavigationMap>,
        consumer: Box<dyn ParticleFieldConsumer>,
    ) -> Result<Self> {
        let n = config.particle_count;
        let (pools, rng) = match config.seed {
            Some(seed) => (
                [
                    WeightedPool::with_seed("a", n, seed),
                    WeightedPool::with_seed("b", n, seed.wrapping_add(1)),
                ],
                StdRng::seed_from_u64(seed.wrapping_add(2)),
            ),
            None => (
                [WeightedPool::new("a", n), WeightedPool::new("b", n)],
                StdRng::from_os_rng(),
            ),
        };
        let perturbation = if config.perturb {
            let perturbation = Perturbation::new(config.position_error, config.heading_error)
                .ok_or_else(|| {
                    FilterError::InvalidConfig("invalid perturbation magnitudes".to_string())
                })?;
            Some(perturbation)
        } else {
            None
        };
        let initial_distribution = config.initial_distribution.clone();
        let mut filter = ParticleFilter {
            config,
            pools,
            old: 0,
            sensor,
            sensor_model,
            navigation_map,
            consumer,
            perturbation,
            rng,
            tick: 0,
            phase: FilterPhase::Idle,
        };
        filter.initialize(&initial_distribution)?;
        debug!(
            "particle filter ready: {} particles, replacement factor {}, perturbation {}",
            filter.config.particle_count,
            filter.config.replacement_factor,
            if filter.perturbation.is_some() { "on" } else { "off" }
        );
        Ok(filter)
    }

    /// Overwrite the current particle field with a fresh population drawn from `distribution`.
    ///
    /// Every particle gets the configured default weight.
    pub fn initialize(&mut self, distribution: &InitialDistribution) -> Result<()> {
        let weight = self.config.default_weight;
        let field = &self.pools[1 - self.old];
        let rng = &mut self.rng;
        let gaussian = match distribution {
            InitialDistribution::Gaussian { std_dev, .. } => Some(
                Normal::new(0.0, *std_dev)
                    .map_err(|e| FilterError::InvalidConfig(e.to_string()))?,
            ),
            _ => None,
        };
        for i in 0..field.size() {
            let (position, speed) = match distribution {
                InitialDistribution::Origin => (XYPair::default(), PolarCoordinate::default()),
                InitialDistribution::Point { position } => (*position, PolarCoordinate::default()),
                InitialDistribution::Uniform { min, max } => (
                    XYPair::new(
                        rng.random_range(min.x..=max.x),
                        rng.random_range(min.y..=max.y),
                    ),
                    PolarCoordinate::new(rng.random_range(0.0..TAU), 0.0),
                ),
                InitialDistribution::Gaussian { center, .. } => {
                    let (dx, dy) = match &gaussian {
                        Some(normal) => (normal.sample(&mut *rng), normal.sample(&mut *rng)),
                        None => (0.0, 0.0),
                    };
                    (
                        XYPair::new(center.x + dx, center.y + dy),
                        PolarCoordinate::new(rng.random_range(0.0..TAU), 0.0),
                    )
                }
            };
            field.put(i, Particle::new(position, speed, weight));
        }
        trace!("initialized {} particles from {:?}", field.size(), distribution);
        Ok(())
    }

    /// Run one full tick. On error nothing is published, the pools are swapped back so
    /// [`current_field`](Self::current_field) is the last published field again, and the filter
    /// returns to [`FilterPhase::Idle`]. The weights of that field are left as the failed tick
    /// set them; positions and headings are untouched.
    pub fn sense_estimate(&mut self) -> Result<TickReport> {
        self.tick += 1;
        match self.tick_once() {
            Ok(report) => {
                debug!(
                    "tick {}: weight sum {:.4e}, effective sample size {:.1}",
                    report.tick, report.weight_sum, report.effective_sample_size
                );
                Ok(report)
            }
            Err(e) => {
                warn!("tick {} aborted in {:?}: {}", self.tick, self.phase, e);
                self.old = 1 - self.old;
                self.phase = FilterPhase::Idle;
                Err(e)
            }
        }
    }

    fn tick_once(&mut self) -> Result<TickReport> {
        let tick = self.tick;
        self.old = 1 - self.old;

        self.enter(FilterPhase::Sensing);
        let input = self.sensor.sense();

        self.enter(FilterPhase::Weighing);
        let old = &self.pools[self.old];
        let new = &self.pools[1 - self.old];
        let model = &self.sensor_model;
        let map = &self.navigation_map;
        let weight_sum = old.assign_weights(|particle| {
            model.probability_of_measured_result_given_expected(
                &map.expected_sensor_value(particle),
                &input,
            )
        })?;

        self.phase = FilterPhase::Normalizing;
        trace!("tick {tick}: {:?}", self.phase);
        if old.normalize_weights(weight_sum).is_err() {
            return Err(FilterError::Diverged {
                tick,
                sum: weight_sum,
            });
        }
        let effective_sample_size = old.effective_sample_size();

        self.phase = FilterPhase::Resampling;
        trace!("tick {tick}: {:?}", self.phase);
        old.sort_then_cumulate_weights();
        let n = self.config.particle_count;
        let replacement_factor = self.config.replacement_factor;
        let perturbation = &self.perturbation;
        let rng = &mut self.rng;
        let mut i = 0;
        while i < n {
            let starting_point = old.pick_instance_according_to_probability()?;
            for _ in 0..replacement_factor {
                if i >= n {
                    break;
                }
                new.update(i, |destination| match perturbation {
                    Some(perturbation) => estimate_perturbed_particle(
                        destination,
                        &starting_point,
                        &input.speed,
                        perturbation,
                        &mut *rng,
                    ),
                    None => estimate_new_particle(destination, &starting_point, &input.speed),
                });
                i += 1;
            }
        }

        self.consumer.consume(new);
        self.phase = FilterPhase::Published;
        trace!("tick {tick}: {:?}", self.phase);
        Ok(TickReport {
            tick,
            weight_sum,
            effective_sample_size,
        })
    }

    fn enter(&mut self, phase: FilterPhase) {
        self.phase = phase;
        trace!("tick {}: {:?}", self.tick, phase);
    }

    /// Tick until `stop` is raised. Returns the number of completed ticks, or the first error.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<u64> {
        let mut completed = 0;
        while !stop.load(Ordering::Acquire) {
            self.sense_estimate()?;
            completed += 1;
        }
        Ok(completed)
    }

    /// Run `ticks` ticks, stopping at the first error.
    pub fn run_ticks(&mut self, ticks: u64) -> Result<Vec<TickReport>> {
        (0..ticks).map(|_| self.sense_estimate()).collect()
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn phase(&self) -> FilterPhase {
        self.phase
    }
    /// Number of ticks attempted so far, including failed ones.
    pub fn ticks(&self) -> u64 {
        self.tick
    }
    /// The most recently published field (or the initial population before the first tick).
    pub fn current_field(&self) -> &WeightedPool<Particle> {
        &self.pools[1 - self.old]
    }
    /// The pool that will be overwritten by the next tick. After a tick it holds the cumulative
    /// weight table of the previous generation.
    pub fn old_particles(&self) -> &WeightedPool<Particle> {
        &self.pools[self.old]
    }
    pub fn estimate(&self, strategy: &ParticleAveragingStrategy) -> Option<FieldEstimate> {
        strategy.estimate(&self.current_field().read())
    }
    /// Reset every weight of the current field to the configured default.
    pub fn reset_weights(&self) {
        let weight = self.config.default_weight;
        let field = self.current_field();
        for i in 0..field.size() {
            field.update(i, |particle| particle.set_weight(weight));
        }
    }
}
