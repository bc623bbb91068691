//! Typed configuration for dataset preparation and plotting.
//!
//! A whole run is described by an [`AppConfig`], normally read from a TOML
//! file. Every section is optional and falls back to its `Default`:
//!
//! ```toml
//! [dataset]
//! dataset = "bnci2014001"
//! subjects_list = [3]
//! length_trial = 4.0
//! filter_data = true
//! fmin = 0.5
//! fmax = 38.0
//!
//! [plot.average]
//! ch_to_plot = ["C3", "Cz", "C4"]
//! label_to_plot = [1, 2, 3]
//!
//! [plot.average.figure]
//! show_fig = false
//! ```
//!
//! Unknown keys are rejected. A `figure` table replaces the plot's default
//! figure options as a whole, so keys it omits take the `FigureConfig` defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Train/test split of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Train,
    Test,
}

impl Session {
    /// Directory holding the runs of this session.
    pub fn dir_name(self) -> &'static str {
        match self {
            Session::Train => "session_T",
            Session::Test => "session_E",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Session::Train => f.write_str("train"),
            Session::Test => f.write_str("test"),
        }
    }
}

impl FromStr for Session {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Session::Train),
            "test" => Ok(Session::Test),
            other => Err(Error::invalid_argument(format!(
                "type_dataset must be `train` or `test`, got `{other}`"
            ))),
        }
    }
}

/// Public dataset the recordings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// BCI Competition IV 2a: 22 EEG channels followed by 3 EOG channels.
    Bnci2014001,
    /// BCI Competition IV 2b: 3 bipolar EEG channels followed by 3 EOG channels.
    Bnci2014004,
    Custom { data_channels: Option<usize> },
}

impl DatasetKind {
    /// Number of leading channels that carry EEG, if the dataset appends
    /// non-data channels.
    pub fn data_channels(self) -> Option<usize> {
        match self {
            DatasetKind::Bnci2014001 => Some(22),
            DatasetKind::Bnci2014004 => Some(3),
            DatasetKind::Custom { data_channels } => data_channels,
        }
    }
}

/// What to do with a trial whose window is shorter than `length_trial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortTrialPolicy {
    /// Abort with [`Error::DataShape`].
    #[default]
    Error,
    /// Skip the trial and its label.
    Drop,
    /// Pad the missing tail with zeros.
    ZeroPad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    pub dataset: DatasetKind,
    pub subjects_list: Vec<u32>,
    pub n_classes: usize,
    /// Band-pass the continuous runs before segmentation.
    pub filter_data: bool,
    pub fmin: f64,
    pub fmax: f64,
    pub filter_order: usize,
    pub resample_data: bool,
    pub resample_freq: f64,
    /// Trial length in seconds.
    pub length_trial: f64,
    /// Reference interval (seconds from trial start) for spectral baseline removal.
    pub baseline: Option<(f64, f64)>,
    pub short_trial_policy: ShortTrialPolicy,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Bnci2014001,
            subjects_list: (1..=9).collect(),
            n_classes: 4,
            filter_data: false,
            fmin: 0.5,
            fmax: 38.0,
            filter_order: 4,
            resample_data: false,
            resample_freq: 128.0,
            length_trial: 4.0,
            baseline: None,
            short_trial_policy: ShortTrialPolicy::Error,
        }
    }
}

impl DatasetConfig {
    pub fn for_subjects(subjects_list: Vec<u32>) -> Self {
        Self { subjects_list, ..Self::default() }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.subjects_list.is_empty() {
            return Err(ConfigError::invalid_value("subjects_list", "must not be empty"));
        }
        if self.n_classes == 0 {
            return Err(ConfigError::invalid_value("n_classes", "must be > 0"));
        }
        if self.filter_data {
            if !(self.fmin > 0.0 && self.fmin < self.fmax && self.fmax.is_finite()) {
                return Err(ConfigError::invalid_value(
                    "fmin / fmax",
                    format!("need 0 < fmin < fmax, got {} / {}", self.fmin, self.fmax),
                ));
            }
            if self.filter_order == 0 {
                return Err(ConfigError::invalid_value("filter_order", "must be > 0"));
            }
        }
        if self.resample_data && !is_positive(self.resample_freq) {
            return Err(ConfigError::invalid_value("resample_freq", "must be > 0.0"));
        }
        if !is_positive(self.length_trial) {
            return Err(ConfigError::invalid_value("length_trial", "must be > 0.0"));
        }
        if let Some((start, end)) = self.baseline {
            if !(start >= 0.0 && start < end && end.is_finite()) {
                return Err(ConfigError::invalid_value(
                    "baseline",
                    format!("need 0 <= start < end, got ({start}, {end})"),
                ));
            }
        }
        Ok(())
    }
}

/// Figure options shared by every plot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FigureConfig {
    /// Width and height in inches.
    pub figsize: [f64; 2],
    pub fontsize: usize,
    pub show_fig: bool,
    pub save_plot: bool,
    pub output_dir: PathBuf,
}

impl Default for FigureConfig {
    fn default() -> Self {
        Self {
            figsize: [15.0, 10.0],
            fontsize: 12,
            show_fig: true,
            save_plot: true,
            output_dir: PathBuf::from("plots"),
        }
    }
}

impl FigureConfig {
    const PX_PER_INCH: f64 = 100.0;

    pub fn width_px(&self) -> usize {
        (self.figsize[0] * Self::PX_PER_INCH).round() as usize
    }

    pub fn height_px(&self) -> usize {
        (self.figsize[1] * Self::PX_PER_INCH).round() as usize
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.figsize.iter().all(|&v| is_positive(v)) {
            return Err(ConfigError::invalid_value("figsize", "must be positive"));
        }
        if self.fontsize == 0 {
            return Err(ConfigError::invalid_value("fontsize", "must be > 0"));
        }
        Ok(())
    }
}

/// Class-average grid: one subplot per (label, channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AverageChannelPlotConfig {
    pub ch_to_plot: Vec<String>,
    pub label_to_plot: Vec<u32>,
    pub figure: FigureConfig,
}

impl Default for AverageChannelPlotConfig {
    fn default() -> Self {
        Self {
            ch_to_plot: vec!["C3".into(), "Cz".into(), "C4".into()],
            label_to_plot: vec![1, 2, 3],
            figure: FigureConfig { figsize: [18.0, 12.0], ..FigureConfig::default() },
        }
    }
}

impl AverageChannelPlotConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.ch_to_plot.is_empty() {
            return Err(ConfigError::invalid_value("ch_to_plot", "must not be empty"));
        }
        if self.label_to_plot.is_empty() {
            return Err(ConfigError::invalid_value("label_to_plot", "must not be empty"));
        }
        self.figure.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RandomTrialPlotConfig {
    pub n_trials_to_plot: usize,
    pub ch_to_plot: String,
    /// Seconds from trial start.
    pub t_start: f64,
    pub t_end: f64,
    pub seed: u64,
    pub figure: FigureConfig,
}

impl Default for RandomTrialPlotConfig {
    fn default() -> Self {
        Self {
            n_trials_to_plot: 3,
            ch_to_plot: "C3".into(),
            t_start: 0.0,
            t_end: 6.0,
            seed: 42,
            figure: FigureConfig::default(),
        }
    }
}

impl RandomTrialPlotConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.n_trials_to_plot == 0 {
            return Err(ConfigError::invalid_value("n_trials_to_plot", "must be > 0"));
        }
        validate_window(self.t_start, self.t_end)?;
        self.figure.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AverageStftPlotConfig {
    pub ch_to_plot: String,
    pub t_start: f64,
    pub t_end: f64,
    /// Frequency band in Hz, both ends included.
    pub band_start: f64,
    pub band_end: f64,
    pub n_trials_to_average: usize,
    pub figure: FigureConfig,
}

impl Default for AverageStftPlotConfig {
    fn default() -> Self {
        Self {
            ch_to_plot: "C3".into(),
            t_start: 0.0,
            t_end: 6.0,
            band_start: 8.0,
            band_end: 13.0,
            n_trials_to_average: 20,
            figure: FigureConfig::default(),
        }
    }
}

impl AverageStftPlotConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.n_trials_to_average == 0 {
            return Err(ConfigError::invalid_value("n_trials_to_average", "must be > 0"));
        }
        if !(self.band_start >= 0.0 && self.band_start <= self.band_end && self.band_end.is_finite()) {
            return Err(ConfigError::invalid_value(
                "band_start / band_end",
                format!("need 0 <= start <= end, got {} / {}", self.band_start, self.band_end),
            ));
        }
        validate_window(self.t_start, self.t_end)?;
        self.figure.validate()
    }
}

/// Consecutive trials of one channel drawn back to back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrialSequencePlotConfig {
    pub idx_start: usize,
    /// Exclusive.
    pub idx_end: usize,
    pub idx_ch: usize,
    pub add_trial_line: bool,
    pub figure: FigureConfig,
}

impl Default for TrialSequencePlotConfig {
    fn default() -> Self {
        Self {
            idx_start: 166,
            idx_end: 172,
            idx_ch: 6,
            add_trial_line: true,
            figure: FigureConfig { fontsize: 15, ..FigureConfig::default() },
        }
    }
}

impl TrialSequencePlotConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.idx_start >= self.idx_end {
            return Err(ConfigError::invalid_value("idx_start / idx_end", "need idx_start < idx_end"));
        }
        self.figure.validate()
    }
}

/// Finite and strictly positive; NaN fails.
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn validate_window(t_start: f64, t_end: f64) -> std::result::Result<(), ConfigError> {
    if !(t_start >= 0.0 && t_start < t_end && t_end.is_finite()) {
        return Err(ConfigError::invalid_value(
            "t_start / t_end",
            format!("need 0 <= t_start < t_end, got {t_start} / {t_end}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlotsConfig {
    pub average: AverageChannelPlotConfig,
    pub random_trials: RandomTrialPlotConfig,
    pub average_stft: AverageStftPlotConfig,
    pub sequence: TrialSequencePlotConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    pub plot: PlotsConfig,
}

impl AppConfig {
    pub fn from_toml(path: &Path) -> std::result::Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.dataset.validate()?;
        self.plot.average.validate()?;
        self.plot.random_trials.validate()?;
        self.plot.average_stft.validate()?;
        self.plot.sequence.validate()
    }
}

/// Channel names resolved to row indices of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelection {
    pub names: Vec<String>,
    pub indices: Vec<usize>,
}

impl ChannelSelection {
    /// Exact-match lookup; the first name not in `ch_names` is an error.
    pub fn resolve<S: AsRef<str>>(wanted: &[S], ch_names: &[String]) -> Result<Self> {
        let mut names = Vec::with_capacity(wanted.len());
        let mut indices = Vec::with_capacity(wanted.len());
        for name in wanted {
            let name = name.as_ref();
            let idx = ch_names
                .iter()
                .position(|ch| ch == name)
                .ok_or_else(|| Error::UnknownChannel(name.to_string()))?;
            names.push(name.to_string());
            indices.push(idx);
        }
        Ok(Self { names, indices })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_parsing() {
        assert_eq!("train".parse::<Session>().unwrap(), Session::Train);
        assert_eq!("TEST".parse::<Session>().unwrap(), Session::Test);
        assert!(matches!("valid".parse::<Session>(), Err(Error::InvalidArgument(_))));
        assert_eq!(Session::Test.dir_name(), "session_E");
    }

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().expect("default config should be valid");
    }

    #[test]
    fn rejects_inverted_band() {
        let cfg = DatasetConfig { filter_data: true, fmin: 40.0, fmax: 8.0, ..DatasetConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { field: "fmin / fmax", .. })));

        // Band is ignored unless filtering is enabled.
        let cfg = DatasetConfig { filter_data: false, ..cfg };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_baseline() {
        let cfg = DatasetConfig { baseline: Some((1.0, 0.5)), ..DatasetConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [dataset]
            dataset = { custom = { data_channels = 2 } }
            subjects_list = [3]
            length_trial = 3.0
            baseline = [0.0, 1.0]
            short_trial_policy = "zero_pad"

            [plot.average]
            ch_to_plot = ["C3"]
            label_to_plot = [1, 2]

            [plot.average.figure]
            show_fig = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.dataset.subjects_list, vec![3]);
        assert_eq!(cfg.dataset.dataset.data_channels(), Some(2));
        assert_eq!(cfg.dataset.baseline, Some((0.0, 1.0)));
        assert_eq!(cfg.dataset.short_trial_policy, ShortTrialPolicy::ZeroPad);
        assert_eq!(cfg.dataset.n_classes, 4);
        assert!(!cfg.plot.average.figure.show_fig);
        assert_eq!(cfg.plot.average.figure.figsize, [15.0, 10.0]);
        // an omitted figure table keeps the plot's own defaults
        assert_eq!(cfg.plot.sequence.figure.fontsize, 15);
        assert_eq!(cfg.plot.random_trials.ch_to_plot, "C3");
    }

    #[test]
    fn invalid_toml_value_is_reported() {
        let err = AppConfig::from_toml_str("[dataset]\nlength_trial = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "length_trial", .. }));
    }

    #[test]
    fn misspelled_key_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[dataset]\nlenght_trial = 3.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        // figure options live in their own table
        let err = AppConfig::from_toml_str("[plot.average]\nshow_fig = false\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = AppConfig::from_toml_str("[plot.sequence.figure]\nfont_size = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn nan_values_fail_validation() {
        let err = AppConfig::from_toml_str("[dataset]\nlength_trial = nan\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "length_trial", .. }));

        let cfg = DatasetConfig { filter_data: true, fmax: f64::NAN, ..DatasetConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { field: "fmin / fmax", .. })));

        let cfg = DatasetConfig { baseline: Some((0.0, f64::NAN)), ..DatasetConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { field: "baseline", .. })));

        let figure = FigureConfig { figsize: [f64::NAN, 10.0], ..FigureConfig::default() };
        assert!(matches!(figure.validate(), Err(ConfigError::InvalidValue { field: "figsize", .. })));
    }

    #[test]
    fn channel_selection_resolves_indices() {
        let ch_names: Vec<String> = ["Fz", "C3", "Cz", "C4"].iter().map(|s| s.to_string()).collect();
        let sel = ChannelSelection::resolve(&["C4", "C3"], &ch_names).unwrap();
        assert_eq!(sel.indices, vec![3, 1]);

        let err = ChannelSelection::resolve(&["C5"], &ch_names).unwrap_err();
        assert!(matches!(err, Error::UnknownChannel(name) if name == "C5"));
    }

    #[test]
    fn figure_size_in_pixels() {
        let fig = FigureConfig::default();
        assert_eq!((fig.width_px(), fig.height_px()), (1500, 1000));
    }
}
