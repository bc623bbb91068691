#![warn(clippy::all, rust_2018_idioms)]
//! Trial segmentation, spectral preprocessing and plotting for
//! motor-imagery EEG recordings.
use ndarray::{Array1, Array2, Array3};

pub mod config;
pub mod epochs;
pub mod error;
pub mod fetch;
pub mod io;
pub mod signal;
pub mod stft;
pub mod vis;

pub use config::{AppConfig, DatasetConfig, DatasetKind, Session, ShortTrialPolicy};
pub use error::{ConfigError, Error, FetchError, Result};
pub use fetch::{BrainVisionSource, RecordingSource, SyntheticSource};

/// Sample layout of a BrainVision binary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrientation {
    Multiplexed,
    Vectorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Int16,
    Float32,
}

/// Contents of a `.vhdr` header.
#[derive(Debug, Clone)]
pub struct EEGInfo {
    pub num_ch: usize,
    pub ch_names: Vec<String>,
    /// Per-channel scale from stored value to physical unit.
    pub resolutions: Vec<f64>,
    pub sfreq: f64,
    /// Microseconds between samples.
    pub sampling_interval: f64,
    pub data_orientation: DataOrientation,
    pub binary_format: BinaryFormat,
    pub data_file: String,
    pub marker_file: Option<String>,
}

/// Trial onset inside a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMarker {
    /// Sample index of the onset.
    pub onset: usize,
    pub label: u32,
}

/// One continuous run: channels x samples plus its events.
#[derive(Debug, Clone)]
pub struct Recording {
    pub data: Array2<f64>,
    pub sfreq: f64,
    pub ch_names: Vec<String>,
    pub events: Vec<EventMarker>,
}

impl Recording {
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }
}

/// Trials x channels x samples, with one label per trial.
#[derive(Debug, Clone)]
pub struct TrialSet {
    pub trials: Array3<f64>,
    pub labels: Array1<u32>,
    pub ch_names: Vec<String>,
    pub sfreq: f64,
}

/// Trials of a single subject for one session.
#[derive(Debug, Clone)]
pub struct SubjectTrials {
    pub subject: u32,
    pub trials: TrialSet,
}

/// Average of all trials carrying one label.
#[derive(Debug, Clone)]
pub struct EvokedData {
    pub evoked: Array2<f64>,
    pub label: u32,
    pub n_trials: usize,
    pub ch_names: Vec<String>,
    pub sfreq: f64,
}
