//! Monte Carlo localization for small mobile robots
//!
//! This crate implements a particle filter that estimates where a robot is on a known map from a
//! stream of cheap sensor readings: a single downward-facing brightness value and relative
//! odometry (turn and distance per tick). Motion is a single Euler step per tick and the
//! particle count is fixed at construction.
//!
//! ## Crate overview
//!
//! - [geometry]: Cartesian and polar 2D coordinates.
//! - [particle]: The particle type, the [`particle::Weighted`] trait and field estimates.
//! - [pool]: A fixed-size, thread-safe pool of weighted items with normalization, cumulation and
//!   weighted random selection.
//! - [estimation]: The kinematic step that advances a resampled particle.
//! - [sensors]: Sensor readings, the collaborator traits and two brightness likelihood models.
//! - [map]: Navigation maps, including a black floor with a white ring.
//! - [filter]: The double-buffered sense/weigh/resample loop.
//! - [config]: Filter configuration and its file formats.
//! - [sim]: A simulated robot and a closed-loop simulation that records estimate against truth.
//! - [error]: Error types.
//!
//! ## Filter tick
//!
//! Each tick the filter queries the sensor once, weights every particle of the previous field by
//! how well its expected reading matches the actual one, normalizes those weights, and draws the
//! next field from them. Each draw seeds a small cluster of consecutive particles (three by
//! default), and each copy is advanced with the sensed odometry. The resulting field is handed
//! to a consumer.
//!
//! Collaborators are traits, and closures implement all of them:
//!
//! ```rust
//! use mcl::config::FilterConfig;
//! use mcl::filter::ParticleFilter;
//! use mcl::geometry::PolarCoordinate;
//! use mcl::map::RingMap;
//! use mcl::particle::{Particle, ParticleAveragingStrategy};
//! use mcl::pool::WeightedPool;
//! use mcl::sensors::{ReflectedLightModel, SensorInput};
//!
//! let mut filter = ParticleFilter::new(
//!     FilterConfig::with_particle_count(60),
//!     || SensorInput::new(0.0, PolarCoordinate::new(0.0, 0.5)),
//!     ReflectedLightModel,
//!     RingMap::default(),
//!     |field: &WeightedPool<Particle>| println!("{} particles published", field.size()),
//! )
//! .unwrap();
//! filter.run_ticks(3).unwrap();
//! let estimate = filter.estimate(&ParticleAveragingStrategy::UnweightedAverage).unwrap();
//! assert!((estimate.position.x - 1.5).abs() < 1e-9);
//! ```
pub mod config;
pub mod error;
pub mod estimation;
pub mod filter;
pub mod geometry;
pub mod map;
pub mod particle;
pub mod pool;
pub mod sensors;
pub mod sim;

pub use config::{ConfigFile, FilterConfig, InitialDistribution};
pub use error::{FilterError, PoolError, Result};
pub use filter::{FilterPhase, ParticleFilter, ParticleFilterBuilder, TickReport};
pub use geometry::{PolarCoordinate, XYPair};
pub use map::NavigationMap;
pub use particle::{Particle, Weighted};
pub use pool::WeightedPool;
pub use sensors::{ParticleFieldConsumer, Sensor, SensorInput, SensorModel};
