//! Sources that hand out the raw runs of a subject's session.
//!
//! The pipeline only needs [`RecordingSource::fetch`]. [`BrainVisionSource`]
//! reads a local dataset tree, [`SyntheticSource`] generates deterministic
//! recordings for tests and dry runs.
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::debug;

use crate::config::Session;
use crate::error::FetchError;
use crate::io;
use crate::{EventMarker, Recording};

/// Channels of the BCI Competition IV 2a montage: 22 EEG then 3 EOG.
pub const BNCI2014001_CHANNELS: [&str; 25] = [
    "Fz", "FC3", "FC1", "FCz", "FC2", "FC4", "C5", "C3", "C1", "Cz", "C2", "C4", "C6", "CP3",
    "CP1", "CPz", "CP2", "CP4", "P1", "Pz", "P2", "POz", "EOG1", "EOG2", "EOG3",
];

pub trait RecordingSource {
    /// All runs of `subject` in `session`, in acquisition order.
    fn fetch(&self, subject: u32, session: Session) -> Result<Vec<Recording>, FetchError>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Local BrainVision dataset laid out as
///
/// ```text
/// <root>/S01/session_T/run_0.vhdr (+ .vmrk, .eeg)
/// <root>/S01/session_E/...
/// ```
#[derive(Debug, Clone)]
pub struct BrainVisionSource {
    root: PathBuf,
}

impl BrainVisionSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, subject: u32, session: Session) -> PathBuf {
        self.root.join(format!("S{subject:02}")).join(session.dir_name())
    }

    fn run_headers(dir: &Path) -> Result<Vec<PathBuf>, FetchError> {
        let entries = fs::read_dir(dir).map_err(|_| FetchError::SubjectNotFound { path: dir.to_path_buf() })?;
        let mut headers = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| FetchError::Read { path: dir.to_path_buf(), message: e.to_string() })?
                .path();
            if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("vhdr")) {
                headers.push(path);
            }
        }
        headers.sort();
        Ok(headers)
    }
}

impl RecordingSource for BrainVisionSource {
    fn fetch(&self, subject: u32, session: Session) -> Result<Vec<Recording>, FetchError> {
        let dir = self.session_dir(subject, session);
        let headers = Self::run_headers(&dir)?;
        if headers.is_empty() {
            return Err(FetchError::SubjectNotFound { path: dir });
        }
        headers
            .iter()
            .map(|path| {
                debug!("Reading run {:?}", path);
                io::read_recording(path)
                    .map_err(|e| FetchError::Read { path: path.clone(), message: e.to_string() })
            })
            .collect()
    }

    fn name(&self) -> &str {
        "brainvision"
    }
}

/// Shape of the generated recordings.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub ch_names: Vec<String>,
    pub sfreq: f64,
    pub runs: usize,
    pub trials_per_run: usize,
    /// Seconds between consecutive onsets.
    pub trial_spacing: f64,
    /// Seconds before the first onset.
    pub lead_in: f64,
    pub n_classes: u32,
    /// Subjects that exist; others fail like a missing download.
    pub subjects: Vec<u32>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            ch_names: BNCI2014001_CHANNELS.iter().map(|s| s.to_string()).collect(),
            sfreq: 250.0,
            runs: 2,
            trials_per_run: 12,
            trial_spacing: 7.5,
            lead_in: 2.0,
            n_classes: 4,
            subjects: (1..=9).collect(),
        }
    }
}

/// Deterministic recordings: per-channel sinusoids whose frequency and
/// amplitude depend on the class of the current trial. Labels cycle `1..=n_classes`.
#[derive(Debug, Clone, Default)]
pub struct SyntheticSource {
    config: SyntheticConfig,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn run(&self, subject: u32, session: Session, run: usize) -> Recording {
        let cfg = &self.config;
        let n_ch = cfg.ch_names.len();
        let spacing = (cfg.trial_spacing * cfg.sfreq).round() as usize;
        let lead_in = (cfg.lead_in * cfg.sfreq).round() as usize;
        let n_samples = lead_in + spacing * cfg.trials_per_run;
        let n_classes = cfg.n_classes.max(1);

        let offset = match session {
            Session::Train => 0,
            Session::Test => 1,
        };
        let events: Vec<EventMarker> = (0..cfg.trials_per_run)
            .map(|i| EventMarker {
                onset: lead_in + i * spacing,
                label: ((i + run + offset) as u32 % n_classes) + 1,
            })
            .collect();

        let label_at = |s: usize| -> Option<u32> {
            if s < lead_in {
                return None;
            }
            events.get((s - lead_in) / spacing.max(1)).map(|e| e.label)
        };
        let data = Array2::from_shape_fn((n_ch, n_samples), |(c, s)| {
            let t = s as f64 / cfg.sfreq;
            let base = 0.5 * (2.0 * PI * 10.0 * t + c as f64).sin() + 0.01 * f64::from(subject);
            match label_at(s) {
                Some(label) => {
                    let gain = if c % n_classes as usize == (label - 1) as usize { 2.0 } else { 1.0 };
                    base + gain * (2.0 * PI * (12.0 + 2.0 * f64::from(label)) * t).sin()
                }
                None => base,
            }
        });

        Recording { data, sfreq: cfg.sfreq, ch_names: cfg.ch_names.clone(), events }
    }
}

impl RecordingSource for SyntheticSource {
    fn fetch(&self, subject: u32, session: Session) -> Result<Vec<Recording>, FetchError> {
        if !self.config.subjects.contains(&subject) {
            return Err(FetchError::SubjectNotFound {
                path: PathBuf::from(format!("synthetic/S{subject:02}/{}", session.dir_name())),
            });
        }
        Ok((0..self.config.runs).map(|run| self.run(subject, session, run)).collect())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
