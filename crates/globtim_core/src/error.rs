use thiserror::Error;

/// Errors surfaced by the approximation pipeline.
///
/// Only caller mistakes and unrecoverable numerical situations end up here.
/// Soft diagnostics (conditioning, failed samples, non-converged walks) are
/// reported as fields on the returned result types instead.
#[derive(Debug, Error)]
pub enum GlobtimError {
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient valid samples: {valid} of {total} usable, at least {required} required")]
    InsufficientSamples {
        valid: usize,
        total: usize,
        required: usize,
    },

    #[error("linear algebra failure: {0}")]
    LinearAlgebra(String),

    #[error("polynomial system solver failed: {0}")]
    SolverFailure(String),

    #[error("expression error: {0}")]
    Expression(String),
}

pub type Result<T> = std::result::Result<T, GlobtimError>;

/// Shorthand used by validation code paths.
pub(crate) fn ensure_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(GlobtimError::DimensionMismatch { expected, actual });
    }
    Ok(())
}
