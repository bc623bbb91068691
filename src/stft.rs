//! Short-time Fourier transform of trials and spectral baseline removal.
//!
//! The analysis window is one second long (`nperseg = sfreq`), giving 1 Hz
//! bins. Windows are periodic Hann with 50 % overlap; each signal is extended
//! with `nperseg / 2` zeros on both ends and zero padded to a whole number of
//! hops, so frame `k` is centred at `k * hop / sfreq` seconds.
use ndarray::{s, Array1, Array3, Array4, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

use crate::error::{Error, Result};

/// Complex STFT coefficients, `[trials, channels, freqs, frames]`.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub coefficients: Array4<Complex<f64>>,
    /// Bin frequencies in Hz.
    pub freqs: Array1<f64>,
    /// Frame centres in seconds from trial start.
    pub times: Array1<f64>,
}

/// Real-valued spectrogram with the same layout as [`Spectrum`].
#[derive(Debug, Clone)]
pub struct PowerSpectrogram {
    pub power: Array4<f64>,
    pub freqs: Array1<f64>,
    pub times: Array1<f64>,
}

impl Spectrum {
    /// `|Z|^2` per coefficient.
    pub fn power(&self) -> PowerSpectrogram {
        PowerSpectrogram {
            power: self.coefficients.mapv(|c| c.norm_sqr()),
            freqs: self.freqs.clone(),
            times: self.times.clone(),
        }
    }
}

fn hann_periodic(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos())
        .collect()
}

/// Frame layout for one signal of `n_samples`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Framing {
    nperseg: usize,
    hop: usize,
    edge: usize,
    padded_len: usize,
    n_frames: usize,
}

impl Framing {
    fn new(n_samples: usize, nperseg: usize) -> Self {
        let hop = nperseg - nperseg / 2;
        let edge = nperseg / 2;
        let extended = n_samples + 2 * edge;
        let overhang = (extended - nperseg) % hop;
        let padded_len = extended + if overhang == 0 { 0 } else { hop - overhang };
        let n_frames = (padded_len - nperseg) / hop + 1;
        Self { nperseg, hop, edge, padded_len, n_frames }
    }
}

/// STFT of every channel of every trial.
pub fn compute_stft(trials: &Array3<f64>, sfreq: f64) -> Result<Spectrum> {
    let nperseg = sfreq.round() as usize;
    if nperseg < 2 {
        return Err(Error::invalid_argument(format!("sampling rate {sfreq} Hz is too low for a 1 s window")));
    }
    let (n_trials, n_channels, n_samples) = trials.dim();
    if n_samples == 0 {
        return Err(Error::invalid_argument("trials have no samples"));
    }

    let framing = Framing::new(n_samples, nperseg);
    let n_freqs = nperseg / 2 + 1;
    let window = hann_periodic(nperseg);
    let scale = 1.0 / window.iter().sum::<f64>();
    debug!(
        "STFT: {n_trials} trials x {n_channels} channels, {n_freqs} bins x {} frames",
        framing.n_frames
    );

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nperseg);
    let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    let mut buffer = vec![Complex::new(0.0, 0.0); nperseg];
    let mut padded = vec![0.0; framing.padded_len];

    let mut coefficients = Array4::<Complex<f64>>::zeros((n_trials, n_channels, n_freqs, framing.n_frames));
    for (trial_idx, trial) in trials.outer_iter().enumerate() {
        for (ch_idx, channel) in trial.outer_iter().enumerate() {
            padded.fill(0.0);
            for (dst, &src) in padded[framing.edge..framing.edge + n_samples].iter_mut().zip(channel) {
                *dst = src;
            }
            for frame in 0..framing.n_frames {
                let start = frame * framing.hop;
                let segment = &padded[start..start + framing.nperseg];
                for ((b, &x), &w) in buffer.iter_mut().zip(segment).zip(&window) {
                    *b = Complex::new(x * w, 0.0);
                }
                fft.process_with_scratch(&mut buffer, &mut scratch);
                let mut column = coefficients.slice_mut(s![trial_idx, ch_idx, .., frame]);
                for (dst, src) in column.iter_mut().zip(&buffer[..n_freqs]) {
                    *dst = *src * scale;
                }
            }
        }
    }

    let freqs = Array1::from_iter((0..n_freqs).map(|k| k as f64 * sfreq / nperseg as f64));
    let times = Array1::from_iter((0..framing.n_frames).map(|k| (k * framing.hop) as f64 / sfreq));
    Ok(Spectrum { coefficients, freqs, times })
}

/// `(P - B) / B` per trial, channel and frequency, where `B` is the mean
/// power over the frames inside `baseline` (seconds, both ends included).
/// Bins with zero baseline power become 0.
pub fn normalize_baseline(spec: &PowerSpectrogram, baseline: (f64, f64)) -> Result<PowerSpectrogram> {
    let (t0, t1) = baseline;
    let eps = 1e-9;
    let frames: Vec<usize> = spec
        .times
        .iter()
        .enumerate()
        .filter_map(|(i, &t)| (t >= t0 - eps && t <= t1 + eps).then_some(i))
        .collect();
    if frames.is_empty() {
        return Err(Error::invalid_argument(format!(
            "baseline interval ({t0}, {t1}) s contains no STFT frame"
        )));
    }

    let reference = spec
        .power
        .select(Axis(3), &frames)
        .mean_axis(Axis(3))
        .ok_or_else(|| Error::invalid_argument("empty baseline"))?;

    let mut power = spec.power.clone();
    for (mut bins, &base) in power.lanes_mut(Axis(3)).into_iter().zip(reference.iter()) {
        if base == 0.0 {
            bins.fill(0.0);
        } else {
            bins.mapv_inplace(|p| (p - base) / base);
        }
    }
    Ok(PowerSpectrogram { power, freqs: spec.freqs.clone(), times: spec.times.clone() })
}

/// STFT power of `trials` normalised to the `baseline` reference interval.
pub fn baseline_removal(trials: &Array3<f64>, sfreq: f64, baseline: (f64, f64)) -> Result<PowerSpectrogram> {
    let spectrum = compute_stft(trials, sfreq)?;
    normalize_baseline(&spectrum.power(), baseline)
}

/// Mean power over the bins in `[band_start, band_end]` Hz,
/// `[trials, channels, frames]`.
pub fn band_power_over_time(spec: &PowerSpectrogram, band_start: f64, band_end: f64) -> Result<Array3<f64>> {
    let bins: Vec<usize> = spec
        .freqs
        .iter()
        .enumerate()
        .filter_map(|(i, &f)| (f >= band_start && f <= band_end).then_some(i))
        .collect();
    if bins.is_empty() {
        return Err(Error::invalid_argument(format!("no frequency bin in {band_start}-{band_end} Hz")));
    }
    spec.power
        .select(Axis(2), &bins)
        .mean_axis(Axis(2))
        .ok_or_else(|| Error::invalid_argument("empty band"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn sine_trials(n_trials: usize, n_channels: usize, n_samples: usize, freq: f64, sfreq: f64) -> Array3<f64> {
        Array3::from_shape_fn((n_trials, n_channels, n_samples), |(_, c, s)| {
            (2.0 * PI * freq * s as f64 / sfreq + c as f64).sin()
        })
    }

    #[test]
    fn framing_matches_zero_extended_layout() {
        let f = Framing::new(300, 100);
        assert_eq!((f.hop, f.edge, f.padded_len, f.n_frames), (50, 50, 400, 7));
        let f = Framing::new(1000, 250);
        // 1250 extended, 125-sample hop needs no padding
        assert_eq!((f.hop, f.padded_len, f.n_frames), (125, 1250, 9));
        let f = Framing::new(310, 100);
        assert_eq!((f.padded_len, f.n_frames), (450, 8));
    }

    #[test]
    fn output_shape_is_uniform() {
        let trials = sine_trials(4, 3, 300, 10.0, 100.0);
        let spec = compute_stft(&trials, 100.0).unwrap();
        assert_eq!(spec.coefficients.shape(), &[4, 3, 51, 7]);
        assert_eq!(spec.freqs.len(), 51);
        assert_abs_diff_eq!(spec.freqs[1], 1.0);
        assert_abs_diff_eq!(spec.freqs[50], 50.0);
        assert_eq!(spec.times.to_vec(), vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let trials = sine_trials(1, 1, 300, 10.0, 100.0);
        let spec = compute_stft(&trials, 100.0).unwrap();
        // frame 3 lies entirely inside the signal
        let frame: ndarray::ArrayView1<'_, Complex<f64>> = spec.coefficients.slice(s![0, 0, .., 3]);
        assert_abs_diff_eq!(frame[10].norm(), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(frame[11].norm(), 0.25, epsilon = 1e-9);
        assert_abs_diff_eq!(frame[20].norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn constant_signal_is_dc() {
        let trials = Array3::from_elem((1, 1, 400), 2.0);
        let spec = compute_stft(&trials, 100.0).unwrap();
        let frame: ndarray::ArrayView1<'_, Complex<f64>> = spec.coefficients.slice(s![0, 0, .., 4]);
        assert_abs_diff_eq!(frame[0].re, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(frame[5].norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn too_low_sampling_rate() {
        let trials = Array3::zeros((1, 1, 10));
        assert!(matches!(compute_stft(&trials, 1.0), Err(Error::InvalidArgument(_))));
    }

    fn spectrogram(values: &[f64]) -> PowerSpectrogram {
        let n = values.len();
        PowerSpectrogram {
            power: Array4::from_shape_vec((1, 1, 1, n), values.to_vec()).unwrap(),
            freqs: Array1::from(vec![10.0]),
            times: Array1::from_iter((0..n).map(|k| k as f64 * 0.5)),
        }
    }

    #[test]
    fn baseline_normalisation() {
        let spec = spectrogram(&[1.0, 3.0, 4.0, 8.0]);
        let out = normalize_baseline(&spec, (0.0, 0.5)).unwrap();
        // baseline = mean(1, 3) = 2
        assert_eq!(out.power.iter().copied().collect::<Vec<_>>(), vec![-0.5, 0.5, 1.0, 3.0]);
    }

    #[test]
    fn zero_baseline_gives_zero() {
        let spec = spectrogram(&[0.0, 0.0, 4.0]);
        let out = normalize_baseline(&spec, (0.0, 0.5)).unwrap();
        assert!(out.power.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn baseline_outside_frames() {
        let spec = spectrogram(&[1.0, 2.0]);
        assert!(matches!(normalize_baseline(&spec, (5.0, 6.0)), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn baseline_removal_per_trial() {
        let mut trials = sine_trials(2, 2, 400, 10.0, 100.0);
        // second trial twice as loud: normalised power must not change
        trials.slice_mut(s![1, .., ..]).mapv_inplace(|v| v * 2.0);
        let out = baseline_removal(&trials, 100.0, (1.0, 2.0)).unwrap();
        assert_eq!(out.power.shape(), &[2, 2, 51, 9]);
        for (a, b) in out.power.slice(s![0, .., 10, ..]).iter().zip(out.power.slice(s![1, .., 10, ..]).iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
        // inside the reference interval the tone is stationary
        assert_abs_diff_eq!(out.power[[0, 0, 10, 3]], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn alpha_band_power() {
        let trials = sine_trials(1, 1, 300, 10.0, 100.0);
        let power = compute_stft(&trials, 100.0).unwrap().power();
        let band = band_power_over_time(&power, 8.0, 12.0).unwrap();
        assert_eq!(band.shape(), &[1, 1, 7]);
        // 0.25 + 2 * 0.0625 over 5 bins
        assert_abs_diff_eq!(band[[0, 0, 3]], 0.375 / 5.0, epsilon = 1e-9);
        assert!(band_power_over_time(&power, 60.0, 70.0).is_err());
    }
}
