//! Error types for the localization core.
//!
//! Two layers are distinguished. [`PoolError`] covers numerical preconditions of the
//! [`WeightedPool`](crate::pool::WeightedPool) operations. [`FilterError`] covers construction
//! problems and per-tick failures of the [`ParticleFilter`](crate::filter::ParticleFilter). Out
//! of range indexing is not represented here; it panics like slice indexing does.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("pool '{name}' is empty")]
    Empty { name: String },

    #[error("cannot normalize pool '{name}' with weight sum {sum}")]
    NonPositiveWeightSum { name: String, sum: f64 },

    #[error("invalid weight {weight} for slot {index} of pool '{name}'")]
    InvalidWeight {
        name: String,
        index: usize,
        weight: f64,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("particle count must be at least 1, got {0}")]
    InvalidParticleCount(usize),

    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// Every particle was assigned zero likelihood; the filter lost track of the robot.
    #[error("tick {tick}: particle weights sum to {sum}, filter has diverged")]
    Diverged { tick: u64, sum: f64 },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type Result<T> = std::result::Result<T, FilterError>;
