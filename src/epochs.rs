//! Event-based trial segmentation and trial averaging.
use std::collections::BTreeSet;

use ndarray::{concatenate, s, stack, Array1, Array2, Array3, Array4, ArrayView2, Axis};
use tracing::{debug, info, warn};

use crate::config::{ChannelSelection, DatasetConfig, Session, ShortTrialPolicy};
use crate::error::{Error, Result};
use crate::fetch::RecordingSource;
use crate::signal;
use crate::{EvokedData, Recording, SubjectTrials, TrialSet};

/// Samples in one trial of `length_trial` seconds.
pub fn trial_samples(sfreq: f64, length_trial: f64) -> usize {
    (sfreq * length_trial).round() as usize
}

impl TrialSet {
    pub fn n_trials(&self) -> usize {
        self.trials.shape()[0]
    }

    pub fn n_channels(&self) -> usize {
        self.trials.shape()[1]
    }

    pub fn n_samples(&self) -> usize {
        self.trials.shape()[2]
    }

    /// Fails with [`Error::DataShape`] unless every trial is `channels x samples`
    /// and there is one label per trial.
    pub fn check_shape(&self, channels: usize, samples: usize) -> Result<()> {
        let (n, c, t) = self.trials.dim();
        if (c, t) != (channels, samples) {
            return Err(Error::shape_mismatch(&[n, channels, samples], &[n, c, t]));
        }
        if self.labels.len() != n {
            return Err(Error::data_shape(format!("{} labels for {n} trials", self.labels.len())));
        }
        if self.ch_names.len() != c {
            return Err(Error::data_shape(format!("{} channel names for {c} channels", self.ch_names.len())));
        }
        Ok(())
    }

    /// Trial indices carrying `label`, in trial order.
    pub fn indices_for_label(&self, label: u32) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, &l)| (l == label).then_some(i))
            .collect()
    }

    /// Distinct labels, ascending.
    pub fn classes(&self) -> Vec<u32> {
        self.labels.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Keep the first `n` channels.
    pub fn truncate_channels(self, n: usize) -> Result<TrialSet> {
        if n > self.n_channels() {
            return Err(Error::data_shape(format!(
                "cannot keep {n} data channels of {}",
                self.n_channels()
            )));
        }
        Ok(TrialSet {
            trials: self.trials.slice(s![.., 0..n, ..]).to_owned(),
            labels: self.labels,
            ch_names: self.ch_names.into_iter().take(n).collect(),
            sfreq: self.sfreq,
        })
    }
}

/// Cut one trial per event: from its onset up to the next onset (or the end of
/// the recording), truncated to `length_trial` seconds.
pub fn divide_by_event(
    recording: &Recording,
    length_trial: f64,
    policy: ShortTrialPolicy,
) -> Result<TrialSet> {
    let n_trial_samples = trial_samples(recording.sfreq, length_trial);
    if n_trial_samples == 0 {
        return Err(Error::invalid_argument(format!(
            "length_trial {length_trial} s is shorter than one sample at {} Hz",
            recording.sfreq
        )));
    }
    if let Some(w) = recording.events.windows(2).find(|w| w[0].onset >= w[1].onset) {
        return Err(Error::data_shape(format!(
            "event onsets must be strictly increasing, found {} then {}",
            w[0].onset, w[1].onset
        )));
    }

    let n_samples = recording.n_samples();
    let n_channels = recording.n_channels();
    let mut windows: Vec<(ArrayView2<'_, f64>, u32)> = Vec::with_capacity(recording.events.len());

    for (i, event) in recording.events.iter().enumerate() {
        let start = event.onset.min(n_samples);
        let end = recording.events.get(i + 1).map_or(n_samples, |next| next.onset.min(n_samples));
        let available = end - start;

        if available < n_trial_samples {
            match policy {
                ShortTrialPolicy::Error => {
                    return Err(Error::data_shape(format!(
                        "trial {i} at sample {} has {available} of {n_trial_samples} samples",
                        event.onset
                    )));
                }
                ShortTrialPolicy::Drop => {
                    warn!(
                        "Dropping trial {i} at sample {}: {available} of {n_trial_samples} samples",
                        event.onset
                    );
                    continue;
                }
                ShortTrialPolicy::ZeroPad => {
                    debug!("Zero-padding trial {i}: {available} of {n_trial_samples} samples");
                }
            }
        }
        let stop = start + available.min(n_trial_samples);
        windows.push((recording.data.slice(s![.., start..stop]), event.label));
    }

    let mut trials = Array3::<f64>::zeros((windows.len(), n_channels, n_trial_samples));
    let mut labels = Vec::with_capacity(windows.len());
    for (mut trial, (window, label)) in trials.outer_iter_mut().zip(windows) {
        trial.slice_mut(s![.., 0..window.ncols()]).assign(&window);
        labels.push(label);
    }

    Ok(TrialSet {
        trials,
        labels: Array1::from(labels),
        ch_names: recording.ch_names.clone(),
        sfreq: recording.sfreq,
    })
}

/// Filter and resample a run as requested by `config`.
pub fn preprocess_run(mut recording: Recording, config: &DatasetConfig) -> Result<Recording> {
    if config.filter_data {
        recording.data = signal::bandpass_filter(
            &recording.data,
            recording.sfreq,
            config.fmin,
            config.fmax,
            config.filter_order,
        )?;
    }
    if config.resample_data && (recording.sfreq - config.resample_freq).abs() > 1e-3 {
        recording.data = signal::resample(&recording.data, recording.sfreq, config.resample_freq)?;
        recording.events = signal::rescale_events(&recording.events, recording.sfreq, config.resample_freq);
        recording.sfreq = config.resample_freq;
    }
    Ok(recording)
}

/// Join trial sets along the trial axis. All sets must agree on channels,
/// trial length and sampling rate.
pub fn concatenate_trials(sets: &[TrialSet]) -> Result<TrialSet> {
    let first = sets
        .first()
        .ok_or_else(|| Error::invalid_argument("no trial sets to concatenate"))?;
    for set in &sets[1..] {
        if set.ch_names != first.ch_names {
            return Err(Error::data_shape("runs have different channel lists"));
        }
        if (set.sfreq - first.sfreq).abs() > 1e-9 {
            return Err(Error::data_shape(format!(
                "runs sampled at {} Hz and {} Hz",
                first.sfreq, set.sfreq
            )));
        }
        set.check_shape(first.n_channels(), first.n_samples())?;
    }

    let trial_views: Vec<_> = sets.iter().map(|s| s.trials.view()).collect();
    let label_views: Vec<_> = sets.iter().map(|s| s.labels.view()).collect();
    let trials = concatenate(Axis(0), &trial_views).map_err(|e| Error::data_shape(e.to_string()))?;
    let labels = concatenate(Axis(0), &label_views).map_err(|e| Error::data_shape(e.to_string()))?;

    Ok(TrialSet { trials, labels, ch_names: first.ch_names.clone(), sfreq: first.sfreq })
}

/// All trials of one subject's session, runs in order.
pub fn trials_for_session(runs: Vec<Recording>, config: &DatasetConfig) -> Result<TrialSet> {
    if runs.is_empty() {
        return Err(Error::invalid_argument("session has no runs"));
    }
    let mut per_run = Vec::with_capacity(runs.len());
    let mut n_events = 0;
    for (i, run) in runs.into_iter().enumerate() {
        let run = preprocess_run(run, config)?;
        n_events += run.events.len();
        let set = divide_by_event(&run, config.length_trial, config.short_trial_policy)?;
        debug!("Run {i}: {} trials of {:?}", set.n_trials(), &set.trials.shape()[1..]);
        per_run.push(set);
    }

    let mut set = concatenate_trials(&per_run)?;
    if let Some(n) = config.dataset.data_channels() {
        set = set.truncate_channels(n)?;
    }
    if set.n_trials() != n_events {
        debug!("{} of {n_events} events produced trials", set.n_trials());
    }
    let n_classes = set.classes().len();
    if n_classes != config.n_classes {
        warn!("Found {n_classes} classes, expected {}", config.n_classes);
    }
    Ok(set)
}

/// Fetch and segment every subject in `config.subjects_list`.
pub fn load_subjects(
    source: &dyn RecordingSource,
    config: &DatasetConfig,
    session: Session,
) -> Result<Vec<SubjectTrials>> {
    config.validate()?;
    let mut subjects = Vec::with_capacity(config.subjects_list.len());
    for &subject in &config.subjects_list {
        let runs = source
            .fetch(subject, session)
            .map_err(|err| Error::DataFetch { subject, session, source: err })?;
        info!("Subject {subject} ({session}): {} runs from {}", runs.len(), source.name());
        let trials = trials_for_session(runs, config)?;
        info!("Subject {subject}: trials {:?}", trials.trials.shape());
        subjects.push(SubjectTrials { subject, trials });
    }
    Ok(subjects)
}

/// Stack subjects into `[subjects, trials, channels, samples]` and
/// `[subjects, trials]`. Every subject must have the same shape.
pub fn stack_subjects(subjects: &[SubjectTrials]) -> Result<(Array4<f64>, Array2<u32>)> {
    let first = subjects
        .first()
        .ok_or_else(|| Error::invalid_argument("no subjects to stack"))?;
    let shape = first.trials.trials.shape().to_vec();
    for s in subjects {
        if s.trials.trials.shape() != shape.as_slice() {
            return Err(Error::shape_mismatch(&shape, s.trials.trials.shape()));
        }
    }
    let trials: Vec<_> = subjects.iter().map(|s| s.trials.trials.view()).collect();
    let labels: Vec<_> = subjects.iter().map(|s| s.trials.labels.view()).collect();
    let trials = stack(Axis(0), &trials).map_err(|e| Error::data_shape(e.to_string()))?;
    let labels = stack(Axis(0), &labels).map_err(|e| Error::data_shape(e.to_string()))?;
    Ok((trials, labels))
}

/// Mean over all trials carrying `label`.
pub fn class_average(set: &TrialSet, label: u32) -> Result<EvokedData> {
    let idx = set.indices_for_label(label);
    if idx.is_empty() {
        return Err(Error::invalid_argument(format!("no trials with label {label}")));
    }
    let evoked = set
        .trials
        .select(Axis(0), &idx)
        .mean_axis(Axis(0))
        .ok_or_else(|| Error::invalid_argument(format!("no trials with label {label}")))?;
    Ok(EvokedData {
        evoked,
        label,
        n_trials: idx.len(),
        ch_names: set.ch_names.clone(),
        sfreq: set.sfreq,
    })
}

/// Average waveform for every `[label][channel]` pair.
pub fn extract_data_to_plot(
    set: &TrialSet,
    labels: &[u32],
    channels: &ChannelSelection,
) -> Result<Vec<Vec<Array1<f64>>>> {
    labels
        .iter()
        .map(|&label| {
            let average = class_average(set, label)?;
            Ok(channels
                .indices
                .iter()
                .map(|&ch| average.evoked.row(ch).to_owned())
                .collect())
        })
        .collect()
}
