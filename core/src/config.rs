//! Construction-time configuration of the particle filter.
//!
//! Everything here is fixed once the filter is built. Configurations can be stored as JSON,
//! YAML or TOML through [`ConfigFile`], which picks the format from the file extension.
//!
//! ```
//! use mcl::config::{FilterConfig, InitialDistribution};
//! use mcl::geometry::XYPair;
//!
//! let cfg = FilterConfig {
//!     particle_count: 500,
//!     initial_distribution: InitialDistribution::Uniform {
//!         min: XYPair::new(-60.0, -60.0),
//!         max: XYPair::new(60.0, 60.0),
//!     },
//!     seed: Some(42),
//!     ..FilterConfig::default()
//! };
//! assert!(cfg.validate().is_ok());
//! assert_eq!(cfg.replacement_factor, 3);
//! ```
use crate::error::{FilterError, Result};
use crate::geometry::XYPair;
use crate::particle::DEFAULT_WEIGHT;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

pub const DEFAULT_PARTICLE_COUNT: usize = 300;
/// Number of output particles seeded by a single weighted draw.
pub const DEFAULT_REPLACEMENT_FACTOR: usize = 3;
/// Standard deviation (map units) of the optional position jitter.
pub const DEFAULT_POSITION_ERROR: f64 = 5.0;
/// Standard deviation (radians) of the optional heading jitter.
pub const DEFAULT_HEADING_ERROR: f64 = 0.05;

fn default_particle_count() -> usize {
    DEFAULT_PARTICLE_COUNT
}
fn default_replacement_factor() -> usize {
    DEFAULT_REPLACEMENT_FACTOR
}
fn default_position_error() -> f64 {
    DEFAULT_POSITION_ERROR
}
fn default_heading_error() -> f64 {
    DEFAULT_HEADING_ERROR
}
fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

/// Where the particles start before the first tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialDistribution {
    /// Every particle at the origin, at rest.
    #[default]
    Origin,
    /// Every particle at one known position, at rest.
    Point { position: XYPair },
    /// Positions uniform over an axis-aligned rectangle, headings uniform over a full turn.
    Uniform { min: XYPair, max: XYPair },
    /// Positions normally distributed around `center`, headings uniform over a full turn.
    Gaussian { center: XYPair, std_dev: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Particles per pool
    #[serde(default = "default_particle_count")]
    pub particle_count: usize,
    #[serde(default = "default_replacement_factor")]
    pub replacement_factor: usize,
    /// Position fudge magnitude, used when `perturb` is set
    #[serde(default = "default_position_error")]
    pub position_error: f64,
    /// Heading fudge magnitude, used when `perturb` is set
    #[serde(default = "default_heading_error")]
    pub heading_error: f64,
    /// Jitter resampled particles before integrating them. Off by default.
    #[serde(default)]
    pub perturb: bool,
    /// Weight given to particles when the pools are allocated
    #[serde(default = "default_weight")]
    pub default_weight: f64,
    /// Seed for the pools and the perturbation generator; OS entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub initial_distribution: InitialDistribution,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            particle_count: DEFAULT_PARTICLE_COUNT,
            replacement_factor: DEFAULT_REPLACEMENT_FACTOR,
            position_error: DEFAULT_POSITION_ERROR,
            heading_error: DEFAULT_HEADING_ERROR,
            perturb: false,
            default_weight: DEFAULT_WEIGHT,
            seed: None,
            initial_distribution: InitialDistribution::default(),
        }
    }
}

impl FilterConfig {
    pub fn with_particle_count(particle_count: usize) -> Self {
        FilterConfig {
            particle_count,
            ..FilterConfig::default()
        }
    }

    /// Check the configuration before any allocation happens.
    pub fn validate(&self) -> Result<()> {
        if self.particle_count == 0 {
            return Err(FilterError::InvalidParticleCount(self.particle_count));
        }
        if self.replacement_factor == 0 {
            return Err(FilterError::InvalidConfig(
                "replacement_factor must be at least 1".to_string(),
            ));
        }
        if !(self.default_weight > 0.0 && self.default_weight.is_finite()) {
            return Err(FilterError::InvalidConfig(format!(
                "default_weight must be positive, got {}",
                self.default_weight
            )));
        }
        if !(self.position_error >= 0.0 && self.position_error.is_finite()) {
            return Err(FilterError::InvalidConfig(format!(
                "position_error must be non-negative, got {}",
                self.position_error
            )));
        }
        if !(self.heading_error >= 0.0 && self.heading_error.is_finite()) {
            return Err(FilterError::InvalidConfig(format!(
                "heading_error must be non-negative, got {}",
                self.heading_error
            )));
        }
        match &self.initial_distribution {
            InitialDistribution::Uniform { min, max } if min.x > max.x || min.y > max.y => {
                Err(FilterError::InvalidConfig(format!(
                    "uniform initial distribution has min {min} above max {max}"
                )))
            }
            InitialDistribution::Gaussian { std_dev, .. }
                if !(*std_dev >= 0.0 && std_dev.is_finite()) =>
            {
                Err(FilterError::InvalidConfig(format!(
                    "gaussian initial distribution has invalid std_dev {std_dev}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// JSON, YAML and TOML persistence for serde configuration types.
///
/// [`ConfigFile::to_file`] and [`ConfigFile::from_file`] pick the format from the file
/// extension (`.json`, `.yaml`/`.yml` or `.toml`).
pub trait ConfigFile: Serialize + DeserializeOwned {
    /// Write the configuration to a JSON file (pretty-printed).
    fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        match extension_of(path.as_ref()).as_deref() {
            Some("json") => self.to_json(path),
            Some("yaml") | Some("yml") => self.to_yaml(path),
            Some("toml") => self.to_toml(path),
            _ => Err(unsupported_extension()),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        match extension_of(path.as_ref()).as_deref() {
            Some("json") => Self::from_json(path),
            Some("yaml") | Some("yml") => Self::from_yaml(path),
            Some("toml") => Self::from_toml(path),
            _ => Err(unsupported_extension()),
        }
    }
}

impl ConfigFile for FilterConfig {}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "unsupported file extension")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mcl_config_{}_{name}", std::process::id()))
    }

    fn sample_config() -> FilterConfig {
        FilterConfig {
            particle_count: 128,
            perturb: true,
            initial_distribution: InitialDistribution::Gaussian {
                center: XYPair::new(1.0, -2.0),
                std_dev: 3.5,
            },
            seed: Some(9),
            ..FilterConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let cfg = FilterConfig::default();
        assert_eq!(cfg.replacement_factor, 3);
        assert_eq!(cfg.position_error, 5.0);
        assert!(!cfg.perturb);
        assert!(cfg.default_weight > 0.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert_eq!(
            FilterConfig::with_particle_count(0).validate(),
            Err(FilterError::InvalidParticleCount(0))
        );
        let bad = [
            FilterConfig {
                replacement_factor: 0,
                ..FilterConfig::default()
            },
            FilterConfig {
                default_weight: 0.0,
                ..FilterConfig::default()
            },
            FilterConfig {
                position_error: -1.0,
                ..FilterConfig::default()
            },
            FilterConfig {
                heading_error: f64::NAN,
                ..FilterConfig::default()
            },
            FilterConfig {
                initial_distribution: InitialDistribution::Uniform {
                    min: XYPair::new(1.0, 0.0),
                    max: XYPair::new(0.0, 1.0),
                },
                ..FilterConfig::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(FilterError::InvalidConfig(_))));
        }
    }

    #[test]
    fn file_round_trips() {
        let cfg = sample_config();
        for ext in ["json", "yaml", "toml"] {
            let path = temp_path(&format!("roundtrip.{ext}"));
            cfg.to_file(&path).unwrap();
            let loaded = FilterConfig::from_file(&path).unwrap();
            assert_eq!(loaded, cfg, "round trip through {ext}");
            let _ = std::fs::remove_file(&path);
        }
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: FilterConfig = serde_json::from_str(r#"{ "particle_count": 10 }"#).unwrap();
        assert_eq!(cfg.particle_count, 10);
        assert_eq!(cfg.replacement_factor, DEFAULT_REPLACEMENT_FACTOR);
        assert_eq!(cfg.initial_distribution, InitialDistribution::Origin);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let path = temp_path("config.ini");
        let err = FilterConfig::default().to_file(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(FilterConfig::from_file(&path).is_err());
    }
}
