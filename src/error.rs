//! Error types shared by every stage of the trial pipeline.
//!
//! ```text
//! Error (top-level)
//! ├── ConfigError  (config loading / validation)
//! └── FetchError   (recording sources)
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::config::Session;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied value is outside what the operation accepts.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An array does not have the shape the pipeline expects.
    #[error("Data shape error: {0}")]
    DataShape(String),

    /// A recording source could not deliver data for a subject.
    #[error("Failed to fetch subject {subject} ({session}): {source}")]
    DataFetch {
        subject: u32,
        session: Session,
        #[source]
        source: FetchError,
    },

    /// A channel name that is not part of the recording.
    #[error("Unknown channel `{0}`")]
    UnknownChannel(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A BrainVision header, marker or data file that cannot be interpreted.
    #[error("Malformed recording file: {0}")]
    Format(String),

    /// Filter design failed for the requested band.
    #[error("Filter error: {0}")]
    Filter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn data_shape<S: Into<String>>(msg: S) -> Self {
        Error::DataShape(msg.into())
    }

    /// Shape mismatch with both shapes in the message.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Error::DataShape(format!("expected {expected:?}, got {actual:?}"))
    }
}

/// Errors produced when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

/// Errors returned by a [`RecordingSource`](crate::fetch::RecordingSource).
#[derive(Debug, Error)]
pub enum FetchError {
    /// Nothing is stored for the requested subject/session.
    #[error("no recordings at `{path}`")]
    SubjectNotFound { path: PathBuf },

    /// A run exists but could not be read.
    #[error("cannot read `{path}`: {message}")]
    Read { path: PathBuf, message: String },
}
