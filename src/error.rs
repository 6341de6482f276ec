//! Errors raised by the radiation engine.

use thiserror::Error;

/// Failure conditions surfaced to the caller of a computation.
///
/// Numerical non-convergence is not an error: quadratures return their
/// best estimate instead, and kinematically forbidden states contribute zero.
#[derive(Debug, Error)]
pub enum RadiationError {
    /// The job was stopped on request through its [CancellationToken](crate::parallel::CancellationToken).
    #[error("computation cancelled")]
    Cancelled,

    /// A configuration value was rejected when it was set.
    #[error("invalid configuration for '{parameter}': {reason}")]
    InvalidConfiguration {
        parameter: &'static str,
        reason: String,
    },

    /// The ray sink refused a record because it is not open.
    #[error("ray sink is not open")]
    SinkNotOpen,

    /// The ray sink failed to write a record.
    #[error("ray sink i/o failure: {0}")]
    SinkIo(#[from] std::io::Error),

    /// The ray sink could not encode a record in its output format.
    #[error("malformed ray record: {0}")]
    MalformedRecord(String),

    /// The bounded worker pool could not be created.
    #[error("unable to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl RadiationError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        RadiationError::InvalidConfiguration {
            parameter,
            reason: reason.into(),
        }
    }

    /// True for the cancellation condition, which callers treat as a deliberate stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RadiationError::Cancelled)
    }
}

impl From<csv::Error> for RadiationError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io) => RadiationError::SinkIo(io),
                other => RadiationError::MalformedRecord(format!("{:?}", other)),
            }
        } else {
            RadiationError::MalformedRecord(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, RadiationError>;
