// src/error.rs

use thiserror::Error;

/// Failure of an energy computation. Every variant aborts the whole call;
/// no partially filled result is ever returned alongside one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnergyError {
    /// Bad input detected before any worker starts (invalid state id,
    /// missing scratch buffer, mis-sized array, unsorted fixed-cell list).
    #[error("precondition violation: {0}")]
    Precondition(String),

    /// A raw torque component is itself non-finite, so rescaling cannot help.
    #[error("numeric overflow at cell {index}: torque component {component} is not finite")]
    NumericOverflow { index: usize, component: f64 },

    /// An orchestrator or term bug, e.g. the one-shot fill handoff firing twice.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl From<rayon::ThreadPoolBuildError> for EnergyError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        EnergyError::ThreadPool(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EnergyError>;
