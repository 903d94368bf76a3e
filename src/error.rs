//! Error taxonomy for the acquisition and integration core
//!
//! Transient outcomes (not enough buffered samples, integration idle, a weak
//! calibration peak) are not errors and never show up here.

use thiserror::Error;

use crate::{calibration::CalibrationError, device::ApiStatus};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The vendor API could not be opened
    #[error("failed to open radio API: {status}")]
    ApiOpen { status: ApiStatus },
    /// Enumeration succeeded but produced nothing usable
    #[error("no radio device found")]
    DeviceNotFound,
    /// A vendor lifecycle call (enumerate, select, uninit, release, ...) failed
    #[error("device operation `{op}` failed: {status}")]
    Device { op: &'static str, status: ApiStatus },
    /// The device rejected a parameter write or the streaming start
    #[error("device rejected `{op}`: {status}")]
    Configuration { op: &'static str, status: ApiStatus },
    /// An operation was requested in a state that doesn't allow it
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: String },
    /// A spectrum didn't match the length captured at the start of integration
    #[error("spectrum length {got} does not match integration length {expected}")]
    SpectrumLength { expected: usize, got: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn invalid_state(op: &'static str, state: impl std::fmt::Display) -> Self {
        Error::InvalidState {
            op,
            state: state.to_string(),
        }
    }
}
