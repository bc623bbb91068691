use std::iter::Sum;
use std::sync::Arc;

use ndarray::Array2;
use num_traits::{Float, Zero};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use sci_rs::na::RealField;
use sci_rs::signal::filter::{design::*, sosfiltfilt_dyn};
use tracing::debug;

use crate::error::{Error, Result};
use crate::EventMarker;

/// Stack equally long rows into a channels x samples array.
pub fn rows_to_array2(rows: Vec<Vec<f64>>, n_cols: usize) -> Result<Array2<f64>> {
    let n_rows = rows.len();
    let mut flat = Vec::with_capacity(n_rows * n_cols);
    for row in rows {
        if row.len() != n_cols {
            return Err(Error::shape_mismatch(&[n_cols], &[row.len()]));
        }
        flat.extend(row);
    }
    Array2::from_shape_vec((n_rows, n_cols), flat).map_err(|e| Error::data_shape(e.to_string()))
}

pub fn design_butter_bandpass<F>(order: usize, lowcut: F, highcut: F, fs: F) -> Result<Vec<Sos<F>>>
where
    F: Float + RealField + Sum,
{
    // Second Order Sections, `order` of them for a band-pass.
    let filter = butter_dyn(
        order,
        [lowcut, highcut].to_vec(),
        Some(FilterBandType::Bandpass),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(fs),
    );
    let DigitalFilter::Sos(SosFormatFilter { sos }) = filter else {
        return Err(Error::Filter("Butterworth design did not return second-order sections".into()));
    };
    Ok(sos)
}

/// Zero-phase Butterworth band-pass of every channel.
pub fn bandpass_filter(
    data: &Array2<f64>,
    sfreq: f64,
    fmin: f64,
    fmax: f64,
    order: usize,
) -> Result<Array2<f64>> {
    if data.is_empty() {
        return Ok(data.clone());
    }
    let nyquist = sfreq / 2.0;
    if !(fmin > 0.0 && fmin < fmax && fmax < nyquist) {
        return Err(Error::invalid_argument(format!(
            "band {fmin}-{fmax} Hz must satisfy 0 < fmin < fmax < {nyquist} Hz"
        )));
    }
    let n_samples = data.ncols();
    // filtfilt pads each edge with 3 * (2 * sections + 1) samples
    let padlen = 3 * (2 * order + 1);
    if n_samples <= padlen {
        return Err(Error::invalid_argument(format!(
            "{n_samples} samples are too few for an order-{order} zero-phase filter (need > {padlen})"
        )));
    }

    let sos = design_butter_bandpass(order, fmin, fmax, sfreq)?;
    debug!("Band-pass {fmin}-{fmax} Hz, {} sections, {} channels", sos.len(), data.nrows());

    let filtered: Vec<Vec<f64>> = (0..data.nrows())
        .into_par_iter()
        .map(|ch_idx| sosfiltfilt_dyn(data.row(ch_idx).iter().copied(), &sos))
        .collect();

    rows_to_array2(filtered, n_samples)
}

fn resample_channel(
    x: &[f64],
    target_length: usize,
    fft: &Arc<dyn Fft<f64>>,
    ifft: &Arc<dyn Fft<f64>>,
    scratch: &mut [Complex<f64>],
) -> Vec<f64> {
    let input_length = x.len();
    let mut spectrum: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process_with_scratch(&mut spectrum, scratch);

    let mut y = vec![Complex::zero(); target_length];
    let n = input_length.min(target_length);
    let nyq = n / 2 + 1;

    // DC and positive frequencies
    y[..nyq].copy_from_slice(&spectrum[..nyq]);
    // negative frequencies
    if n > 2 {
        let tail = n - nyq;
        y[target_length - tail..].copy_from_slice(&spectrum[input_length - tail..]);
    }
    // split or join the Nyquist bin
    if n % 2 == 0 {
        if target_length < input_length {
            y[target_length - n / 2] += spectrum[input_length - n / 2];
        } else if input_length < target_length {
            y[n / 2] *= 0.5;
            y[target_length - n / 2] = y[n / 2];
        }
    }

    ifft.process_with_scratch(&mut y, scratch);

    // rustfft leaves the inverse unnormalised
    let scale = 1.0 / input_length as f64;
    y.iter().map(|c| c.re * scale).collect()
}

/// Fourier resampling of every channel to `target_sfreq`.
pub fn resample(data: &Array2<f64>, sfreq: f64, target_sfreq: f64) -> Result<Array2<f64>> {
    if sfreq <= 0.0 || target_sfreq <= 0.0 {
        return Err(Error::invalid_argument("sampling rates must be positive"));
    }
    let original_length = data.ncols();
    let target_length = resampled_length(original_length, sfreq, target_sfreq);
    if data.is_empty() || target_length == 0 {
        return Ok(Array2::zeros((data.nrows(), target_length)));
    }
    debug!(
        "Resampling {} channels from {sfreq} Hz ({original_length} samples) to {target_sfreq} Hz ({target_length} samples)",
        data.nrows()
    );

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(original_length);
    let ifft = planner.plan_fft_inverse(target_length);
    let scratch_length = fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len());

    let resampled: Vec<Vec<f64>> = (0..data.nrows())
        .into_par_iter()
        .map(|ch_idx| {
            let mut scratch = vec![Complex::zero(); scratch_length];
            let channel = data.row(ch_idx).to_vec();
            resample_channel(&channel, target_length, &fft, &ifft, &mut scratch)
        })
        .collect();

    rows_to_array2(resampled, target_length)
}

pub fn resampled_length(n_samples: usize, sfreq: f64, target_sfreq: f64) -> usize {
    (n_samples as f64 * target_sfreq / sfreq).round() as usize
}

/// Move event onsets onto the resampled time grid.
pub fn rescale_events(events: &[EventMarker], sfreq: f64, target_sfreq: f64) -> Vec<EventMarker> {
    let ratio = target_sfreq / sfreq;
    events
        .iter()
        .map(|e| EventMarker { onset: (e.onset as f64 * ratio).round() as usize, label: e.label })
        .collect()
}
