//! Closed-loop simulation of a light-sensing robot driving over a [`RingMap`].
//!
//! A [`SimulatedRobot`] follows a constant-curvature path and acts as the filter's [`Sensor`]:
//! each tick it reports the (noisy) floor brightness under its true position together with
//! (noisy) relative odometry for the move it is about to make, then makes that move. The filter
//! runs against the same map, and every tick is logged as a [`TickRecord`] comparing the
//! estimate with the truth.
use crate::config::{ConfigFile, FilterConfig};
use crate::error::{FilterError, Result};
use crate::estimation::zero_mean_normal;
use crate::filter::ParticleFilter;
use crate::geometry::{PolarCoordinate, XYPair, wrap_angle};
use crate::map::{NavigationMap, RingMap};
use crate::particle::{FieldEstimate, Particle, ParticleAveragingStrategy};
use crate::pool::WeightedPool;
use crate::sensors::{
    GaussianBrightnessModel, MAX_BRIGHTNESS, ParticleFieldConsumer, ReflectedLightModel, Sensor,
    SensorInput, SensorModel,
};

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io;
use std::path::Path;
use std::rc::Rc;

/// True pose of the simulated robot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    pub position: XYPair,
    /// Heading in radians, counter-clockwise from the x axis
    pub heading: f64,
}

/// Motion of the simulated robot. Distance and turn are per tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub start: RobotPose,
    pub speed: f64,
    pub turn_rate: f64,
}
impl Default for RobotConfig {
    /// A circle of radius 100 through the origin, crossing the default ring twice per lap.
    fn default() -> Self {
        RobotConfig {
            start: RobotPose::default(),
            speed: 1.0,
            turn_rate: 0.01,
        }
    }
}

/// Standard deviations of the simulated sensor noise. Zero disables a channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    pub brightness: f64,
    pub speed: f64,
    pub heading: f64,
}

/// Brightness likelihood used by the simulated filter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorModelKind {
    ReflectedLight,
    Gaussian { std_dev: f64 },
}
impl Default for SensorModelKind {
    fn default() -> Self {
        SensorModelKind::Gaussian { std_dev: 60.0 }
    }
}
impl SensorModelKind {
    pub fn validate(&self) -> Result<()> {
        match self {
            SensorModelKind::Gaussian { std_dev } if !(*std_dev > 0.0 && std_dev.is_finite()) => {
                Err(FilterError::InvalidConfig(format!(
                    "gaussian sensor model needs a positive std_dev, got {std_dev}"
                )))
            }
            _ => Ok(()),
        }
    }
}
impl SensorModel for SensorModelKind {
    fn probability_of_measured_result_given_expected(
        &self,
        expected: &SensorInput,
        actual: &SensorInput,
    ) -> f64 {
        match self {
            SensorModelKind::ReflectedLight => {
                ReflectedLightModel.probability_of_measured_result_given_expected(expected, actual)
            }
            SensorModelKind::Gaussian { std_dev } => GaussianBrightnessModel::new(*std_dev)
                .probability_of_measured_result_given_expected(expected, actual),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Seed of the robot's noise generator; OS entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub strategy: ParticleAveragingStrategy,
    #[serde(default)]
    pub sensor_model: SensorModelKind,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub map: RingMap,
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
}

fn default_ticks() -> u64 {
    200
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            ticks: default_ticks(),
            seed: None,
            strategy: ParticleAveragingStrategy::default(),
            sensor_model: SensorModelKind::default(),
            filter: FilterConfig::default(),
            map: RingMap::default(),
            robot: RobotConfig::default(),
            noise: NoiseConfig::default(),
        }
    }
}

impl ConfigFile for SimulationConfig {}

/// State the robot shares with whoever is watching the simulation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RobotState {
    /// Pose after the most recent move
    pub pose: RobotPose,
    /// Reading reported by the most recent call to [`Sensor::sense`]
    pub last_reading: SensorInput,
}

/// Ground-truth robot that doubles as the filter's sensor.
pub struct SimulatedRobot {
    map: RingMap,
    speed: f64,
    turn_rate: f64,
    brightness_noise: Normal<f64>,
    speed_noise: Normal<f64>,
    heading_noise: Normal<f64>,
    rng: StdRng,
    state: Rc<RefCell<RobotState>>,
}

impl SimulatedRobot {
    /// Returns `None` if a noise standard deviation is negative or not finite.
    pub fn new(
        map: RingMap,
        robot: &RobotConfig,
        noise: &NoiseConfig,
        seed: Option<u64>,
    ) -> Option<SimulatedRobot> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Some(SimulatedRobot {
            map,
            speed: robot.speed,
            turn_rate: robot.turn_rate,
            brightness_noise: zero_mean_normal(noise.brightness)?,
            speed_noise: zero_mean_normal(noise.speed)?,
            heading_noise: zero_mean_normal(noise.heading)?,
            rng,
            state: Rc::new(RefCell::new(RobotState {
                pose: robot.start,
                last_reading: SensorInput::default(),
            })),
        })
    }
    /// A handle that keeps observing the robot after it has been moved into a filter.
    pub fn state_handle(&self) -> Rc<RefCell<RobotState>> {
        Rc::clone(&self.state)
    }
    pub fn pose(&self) -> RobotPose {
        self.state.borrow().pose
    }
}

impl Sensor for SimulatedRobot {
    fn sense(&mut self) -> SensorInput {
        let mut state = self.state.borrow_mut();
        let brightness = self.map.color_at(&state.pose.position).brightness()
            + self.brightness_noise.sample(&mut self.rng);
        let odometry = PolarCoordinate::new(
            self.turn_rate + self.heading_noise.sample(&mut self.rng),
            self.speed + self.speed_noise.sample(&mut self.rng),
        );
        let reading = SensorInput::new(brightness.clamp(0.0, MAX_BRIGHTNESS), odometry);

        state.pose.heading = wrap_angle(state.pose.heading + self.turn_rate);
        let step = PolarCoordinate::new(state.pose.heading, self.speed);
        state.pose.position.move_by(&step);
        state.last_reading = reading;
        reading
    }
}

/// Keeps the estimate of every published field.
struct EstimateRecorder {
    strategy: ParticleAveragingStrategy,
    estimates: Rc<RefCell<Vec<FieldEstimate>>>,
}
impl ParticleFieldConsumer for EstimateRecorder {
    fn consume(&mut self, field: &WeightedPool<Particle>) {
        if let Some(estimate) = self.strategy.estimate(&field.read()) {
            self.estimates.borrow_mut().push(estimate);
        }
    }
}

/// One row of simulation output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick: u64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_heading: f64,
    pub sensed_brightness: f64,
    pub expected_brightness: f64,
    pub estimate_x: f64,
    pub estimate_y: f64,
    pub estimate_heading: f64,
    /// Square root of the trace of the particle position covariance
    pub spread: f64,
    /// Distance between the estimate and the true position
    pub error: f64,
    pub weight_sum: f64,
    pub effective_sample_size: f64,
}

impl TickRecord {
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    pub fn from_csv<P: AsRef<Path>>(path: P) -> io::Result<Vec<Self>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in reader.deserialize() {
            records.push(result?);
        }
        Ok(records)
    }
}

/// Build a filter around a [`SimulatedRobot`] and run it for `config.ticks` ticks.
///
/// Stops at the first failed tick and returns its error.
pub fn run_simulation(config: &SimulationConfig) -> Result<Vec<TickRecord>> {
    config.sensor_model.validate()?;
    let robot = SimulatedRobot::new(
        config.map.clone(),
        &config.robot,
        &config.noise,
        config.seed,
    )
    .ok_or_else(|| FilterError::InvalidConfig("invalid noise standard deviation".into()))?;
    let truth = robot.state_handle();
    let estimates = Rc::new(RefCell::new(Vec::new()));
    let recorder = EstimateRecorder {
        strategy: config.strategy.clone(),
        estimates: Rc::clone(&estimates),
    };
    let mut filter = ParticleFilter::new(
        config.filter.clone(),
        robot,
        config.sensor_model,
        config.map.clone(),
        recorder,
    )?;
    info!(
        "simulating {} ticks with {} particles",
        config.ticks, config.filter.particle_count
    );

    let mut records = Vec::with_capacity(config.ticks as usize);
    for _ in 0..config.ticks {
        let report = filter.sense_estimate()?;
        let state = *truth.borrow();
        let Some(estimate) = estimates.borrow().last().cloned() else {
            continue;
        };
        let at_estimate = Particle::new(estimate.position, PolarCoordinate::default(), 0.0);
        let expected = config.map.expected_sensor_value(&at_estimate);
        let error = estimate.position.distance(&state.pose.position);
        debug!(
            "tick {}: truth {} estimate {} error {:.2} spread {:.2}",
            report.tick,
            state.pose.position,
            estimate.position,
            error,
            estimate.spread()
        );
        records.push(TickRecord {
            tick: report.tick,
            true_x: state.pose.position.x,
            true_y: state.pose.position.y,
            true_heading: state.pose.heading,
            sensed_brightness: state.last_reading.brightness,
            expected_brightness: expected.brightness,
            estimate_x: estimate.position.x,
            estimate_y: estimate.position.y,
            estimate_heading: estimate.heading,
            spread: estimate.spread(),
            error,
            weight_sum: report.weight_sum,
            effective_sample_size: report.effective_sample_size,
        });
    }
    if let Some(last) = records.last() {
        info!(
            "finished after {} ticks, final error {:.2}, spread {:.2}",
            last.tick, last.error, last.spread
        );
    }
    Ok(records)
}
