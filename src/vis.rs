use std::fs;
use std::path::PathBuf;

use ndarray::{s, Array, Array1, Axis, Ix1};
use plotly::common::{Anchor, Font, Mode};
use plotly::layout::{Annotation, GridPattern, LayoutGrid};
use plotly::{Layout, Plot, Scatter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::{
    AverageChannelPlotConfig, AverageStftPlotConfig, ChannelSelection, FigureConfig,
    RandomTrialPlotConfig, TrialSequencePlotConfig,
};
use crate::epochs::extract_data_to_plot;
use crate::error::{Error, Result};
use crate::stft::{band_power_over_time, PowerSpectrogram};
use crate::TrialSet;

/// A built figure and where it was written, if saving was requested.
pub struct Figure {
    pub plot: Plot,
    pub path: Option<PathBuf>,
}

fn base_layout(title: String, figure: &FigureConfig) -> Layout {
    Layout::new()
        .title(title)
        .width(figure.width_px())
        .height(figure.height_px())
        .font(Font::new().size(figure.fontsize))
}

/// Save and/or show `plot` according to `figure`.
fn render(plot: Plot, figure: &FigureConfig, file_stem: &str) -> Result<Figure> {
    let mut path = None;
    if figure.save_plot {
        fs::create_dir_all(&figure.output_dir)?;
        let file = figure.output_dir.join(format!("{file_stem}.html"));
        fs::write(&file, plot.to_html())?;
        info!("Plot written to {:?}", file);
        path = Some(file);
    }
    if figure.show_fig {
        plot.show();
    }
    Ok(Figure { plot, path })
}

fn time_axis(n_samples: usize, sfreq: f64, offset: f64) -> Array<f64, Ix1> {
    Array1::from_iter((0..n_samples).map(|i| offset + i as f64 / sfreq))
}

/// Sample range covering `[t_start, t_end]` seconds, clipped to the trial.
fn sample_window(t_start: f64, t_end: f64, sfreq: f64, n_samples: usize) -> Result<(usize, usize)> {
    let start = ((t_start * sfreq).round() as usize).min(n_samples);
    let end = ((t_end * sfreq).round() as usize).min(n_samples);
    if start >= end {
        return Err(Error::invalid_argument(format!(
            "time window {t_start}-{t_end} s is outside trials of {n_samples} samples"
        )));
    }
    Ok((start, end))
}

fn axis_ref(prefix: char, idx: usize) -> String {
    if idx == 0 {
        prefix.to_string()
    } else {
        format!("{prefix}{}", idx + 1)
    }
}

/// Title centred above the subplot drawn on axes `cell`.
fn subplot_title(text: String, cell: usize) -> Annotation {
    Annotation::new()
        .text(text)
        .x_ref(format!("{} domain", axis_ref('x', cell)))
        .y_ref(format!("{} domain", axis_ref('y', cell)))
        .x(0.5)
        .y(1.0)
        .x_anchor(Anchor::Center)
        .y_anchor(Anchor::Bottom)
        .show_arrow(false)
}

/// Grid of class averages, one row per label and one column per channel.
pub fn visualize_single_subject_average_channel(
    set: &TrialSet,
    config: &AverageChannelPlotConfig,
    file_stem: &str,
) -> Result<Figure> {
    let channels = ChannelSelection::resolve(&config.ch_to_plot, &set.ch_names)?;
    let extracted = extract_data_to_plot(set, &config.label_to_plot, &channels)?;
    let t = time_axis(set.n_samples(), set.sfreq, 0.0);

    let mut plot = Plot::new();
    let mut titles = Vec::with_capacity(config.label_to_plot.len() * channels.len());
    for (i, (label, per_channel)) in config.label_to_plot.iter().zip(&extracted).enumerate() {
        for (j, (ch_name, ys)) in channels.names.iter().zip(per_channel).enumerate() {
            let cell = i * channels.len() + j;
            let title = format!("{label} - {ch_name}");
            let trace = Scatter::from_array(t.clone(), ys.clone())
                .mode(Mode::Lines)
                .name(&title)
                .x_axis(axis_ref('x', cell))
                .y_axis(axis_ref('y', cell));
            plot.add_trace(trace);
            titles.push(subplot_title(title, cell));
        }
    }

    let mut layout = base_layout(
        format!("<b>Class average</b> ({} labels x {} channels)", config.label_to_plot.len(), channels.len()),
        &config.figure,
    )
    .grid(
        LayoutGrid::new()
            .rows(config.label_to_plot.len())
            .columns(channels.len())
            .pattern(GridPattern::Independent),
    );
    for title in titles {
        layout.add_annotation(title);
    }
    plot.set_layout(layout);
    render(plot, &config.figure, file_stem)
}

/// A few randomly chosen trials of one channel.
pub fn plot_random_trials(set: &TrialSet, config: &RandomTrialPlotConfig, file_stem: &str) -> Result<Figure> {
    let channel = ChannelSelection::resolve(&[config.ch_to_plot.as_str()], &set.ch_names)?.indices[0];
    if set.n_trials() == 0 {
        return Err(Error::invalid_argument("no trials to plot"));
    }
    let (start, end) = sample_window(config.t_start, config.t_end, set.sfreq, set.n_samples())?;
    let t = time_axis(end - start, set.sfreq, start as f64 / set.sfreq);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let amount = config.n_trials_to_plot.min(set.n_trials());
    let mut picked = rand::seq::index::sample(&mut rng, set.n_trials(), amount).into_vec();
    picked.sort_unstable();

    let mut plot = Plot::new();
    for idx in picked {
        let ys = set.trials.slice(s![idx, channel, start..end]).to_owned();
        let trace = Scatter::from_array(t.clone(), ys)
            .mode(Mode::Lines)
            .name(format!("Trial {idx} (label {})", set.labels[idx]));
        plot.add_trace(trace);
    }
    plot.set_layout(base_layout(format!("<b>Random trials</b> (Channel: {})", config.ch_to_plot), &config.figure));
    render(plot, &config.figure, file_stem)
}

/// Trials `idx_start..idx_end` of one channel drawn back to back.
pub fn plot_trial_sequence(set: &TrialSet, config: &TrialSequencePlotConfig, file_stem: &str) -> Result<Figure> {
    if config.idx_end > set.n_trials() || config.idx_start >= config.idx_end {
        return Err(Error::invalid_argument(format!(
            "trial range {}..{} is outside 0..{}",
            config.idx_start,
            config.idx_end,
            set.n_trials()
        )));
    }
    if config.idx_ch >= set.n_channels() {
        return Err(Error::invalid_argument(format!(
            "channel index {} must be less than {}",
            config.idx_ch,
            set.n_channels()
        )));
    }
    let n_samples = set.n_samples();
    let selected = set.trials.slice(s![config.idx_start..config.idx_end, config.idx_ch, ..]);
    let ys = Array1::from_iter(selected.iter().copied());
    let t = time_axis(ys.len(), set.sfreq, 0.0);
    let (y_min, y_max) = ys
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let ch_name = &set.ch_names[config.idx_ch];
    let mut plot = Plot::new();
    plot.add_trace(Scatter::from_array(t, ys).mode(Mode::Lines).name(ch_name));

    if config.add_trial_line {
        for k in 1..selected.len_of(Axis(0)) {
            let x = (k * n_samples) as f64 / set.sfreq;
            let line = Scatter::new(vec![x, x], vec![y_min, y_max])
                .mode(Mode::Lines)
                .name(format!("Trial {}", config.idx_start + k))
                .show_legend(false);
            plot.add_trace(line);
        }
    }
    plot.set_layout(base_layout(
        format!("<b>Trials {}-{}</b> (Channel: {ch_name})", config.idx_start, config.idx_end - 1),
        &config.figure,
    ));
    render(plot, &config.figure, file_stem)
}

/// Band power of one channel over time, averaged over the first trials.
pub fn plot_average_band_power(
    spec: &PowerSpectrogram,
    ch_names: &[String],
    config: &AverageStftPlotConfig,
    file_stem: &str,
) -> Result<Figure> {
    let channel = ChannelSelection::resolve(&[config.ch_to_plot.as_str()], ch_names)?.indices[0];
    let band = band_power_over_time(spec, config.band_start, config.band_end)?;
    let n_trials = config.n_trials_to_average.min(band.len_of(Axis(0)));
    if n_trials == 0 {
        return Err(Error::invalid_argument("no trials to average"));
    }
    let average = band
        .slice(s![0..n_trials, channel, ..])
        .mean_axis(Axis(0))
        .ok_or_else(|| Error::invalid_argument("no trials to average"))?;

    let (times, values): (Vec<f64>, Vec<f64>) = spec
        .times
        .iter()
        .zip(average.iter())
        .filter(|&(&t, _)| t >= config.t_start && t <= config.t_end)
        .map(|(&t, &v)| (t, v))
        .unzip();
    if times.is_empty() {
        return Err(Error::invalid_argument(format!(
            "no STFT frame in {}-{} s",
            config.t_start, config.t_end
        )));
    }

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(times, values)
            .mode(Mode::LinesMarkers)
            .name(format!("{}-{} Hz", config.band_start, config.band_end)),
    );
    plot.set_layout(base_layout(
        format!(
            "<b>Average band power</b> (Channel: {}, {n_trials} trials)",
            config.ch_to_plot
        ),
        &config.figure,
    ));
    render(plot, &config.figure, file_stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stft::compute_stft;
    use ndarray::Array3;

    fn trial_set() -> TrialSet {
        TrialSet {
            trials: Array3::from_shape_fn((6, 3, 200), |(n, c, s)| ((n + c + s) as f64 * 0.1).sin()),
            labels: Array1::from(vec![0, 1, 2, 0, 1, 2]),
            ch_names: vec!["C3".into(), "Cz".into(), "C4".into()],
            sfreq: 100.0,
        }
    }

    fn figure(dir: &std::path::Path) -> FigureConfig {
        FigureConfig { show_fig: false, save_plot: true, output_dir: dir.to_path_buf(), ..FigureConfig::default() }
    }

    #[test]
    fn average_grid_writes_html() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AverageChannelPlotConfig {
            ch_to_plot: vec!["C3".into(), "C4".into()],
            label_to_plot: vec![1, 2],
            figure: figure(tmp.path()),
        };
        let fig = visualize_single_subject_average_channel(&trial_set(), &config, "average").unwrap();
        let path = fig.path.unwrap();
        assert!(path.ends_with("average.html"));
        assert!(path.exists());
        let json = fig.plot.to_json();
        assert!(json.contains("2 - C4"));
        assert!(json.contains("\"x4\""));
        // one title per cell, above its own axes
        assert_eq!(json.matches("\"showarrow\":false").count(), 4);
        assert!(json.contains("\"xref\":\"x4 domain\""));
        assert!(json.contains("\"text\":\"1 - C3\""));
    }

    #[test]
    fn unwritable_output_dir_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("taken");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = TrialSequencePlotConfig {
            idx_start: 0,
            idx_end: 2,
            idx_ch: 0,
            figure: figure(&blocker.join("plots")),
            ..TrialSequencePlotConfig::default()
        };
        let result = plot_trial_sequence(&trial_set(), &config, "sequence");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let config = AverageChannelPlotConfig {
            ch_to_plot: vec!["O1".into()],
            label_to_plot: vec![0],
            figure: FigureConfig { show_fig: false, save_plot: false, ..FigureConfig::default() },
        };
        let err = visualize_single_subject_average_channel(&trial_set(), &config, "x").err().unwrap();
        assert!(matches!(err, Error::UnknownChannel(name) if name == "O1"));
    }

    #[test]
    fn random_trials_are_seeded() {
        let config = RandomTrialPlotConfig {
            n_trials_to_plot: 3,
            t_end: 1.0,
            figure: FigureConfig { show_fig: false, save_plot: false, ..FigureConfig::default() },
            ..RandomTrialPlotConfig::default()
        };
        let a = plot_random_trials(&trial_set(), &config, "random").unwrap();
        let b = plot_random_trials(&trial_set(), &config, "random").unwrap();
        assert!(a.path.is_none());
        assert_eq!(a.plot.to_json(), b.plot.to_json());
    }

    #[test]
    fn trial_sequence_bounds() {
        let mut config = TrialSequencePlotConfig {
            idx_start: 1,
            idx_end: 4,
            idx_ch: 2,
            figure: FigureConfig { show_fig: false, save_plot: false, ..FigureConfig::default() },
            ..TrialSequencePlotConfig::default()
        };
        let fig = plot_trial_sequence(&trial_set(), &config, "sequence").unwrap();
        assert!(fig.plot.to_json().contains("Trial 3"));

        config.idx_end = 10;
        assert!(matches!(plot_trial_sequence(&trial_set(), &config, "sequence"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn band_power_plot() {
        let set = trial_set();
        let power = compute_stft(&set.trials, set.sfreq).unwrap().power();
        let config = AverageStftPlotConfig {
            t_end: 1.5,
            figure: FigureConfig { show_fig: false, save_plot: false, ..FigureConfig::default() },
            ..AverageStftPlotConfig::default()
        };
        let fig = plot_average_band_power(&power, &set.ch_names, &config, "stft").unwrap();
        assert!(fig.plot.to_json().contains("8-13 Hz"));
    }
}
