use approx::assert_abs_diff_eq;
use eegtrials::config::{AverageChannelPlotConfig, AverageStftPlotConfig, FigureConfig};
use eegtrials::epochs::{class_average, load_subjects, stack_subjects};
use eegtrials::stft::baseline_removal;
use eegtrials::{io, vis};
use eegtrials::{BrainVisionSource, DatasetConfig, Error, RecordingSource, Session, SyntheticSource};

fn quiet_figure(dir: &std::path::Path) -> FigureConfig {
    FigureConfig { show_fig: false, save_plot: true, output_dir: dir.to_path_buf(), ..FigureConfig::default() }
}

#[test]
fn synthetic_session_to_subject_tensor() {
    let source = SyntheticSource::default();
    let config = DatasetConfig::for_subjects(vec![1, 2]);
    let subjects = load_subjects(&source, &config, Session::Train).unwrap();

    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[1].subject, 2);
    let (trials, labels) = stack_subjects(&subjects).unwrap();
    // 2 runs of 12 trials, EOG channels dropped, 4 s at 250 Hz
    assert_eq!(trials.shape(), &[2, 24, 22, 1000]);
    assert_eq!(labels.shape(), &[2, 24]);
    assert_eq!(labels.row(0).to_vec()[..5], [1, 2, 3, 4, 1]);
    // second run starts one class later
    assert_eq!(labels[[0, 12]], 2);

    let evoked = class_average(&subjects[0].trials, 3).unwrap();
    assert_eq!(evoked.n_trials, 6);
    assert_eq!(evoked.evoked.dim(), (22, 1000));
}

#[test]
fn filtered_and_resampled_trials() {
    let source = SyntheticSource::default();
    let config = DatasetConfig {
        filter_data: true,
        fmin: 4.0,
        fmax: 30.0,
        resample_data: true,
        resample_freq: 128.0,
        ..DatasetConfig::for_subjects(vec![3])
    };
    let subjects = load_subjects(&source, &config, Session::Test).unwrap();
    let set = &subjects[0].trials;
    assert_eq!(set.trials.shape(), &[24, 22, 512]);
    assert_eq!(set.sfreq, 128.0);
    assert!(set.trials.iter().all(|v| v.is_finite()));
}

#[test]
fn missing_subject_reports_fetch_error() {
    let source = SyntheticSource::default();
    let config = DatasetConfig::for_subjects(vec![1, 10]);
    let err = load_subjects(&source, &config, Session::Train).unwrap_err();
    assert!(matches!(err, Error::DataFetch { subject: 10, session: Session::Train, .. }));
}

#[test]
fn brainvision_export_matches_synthetic_trials() {
    let tmp = tempfile::tempdir().unwrap();
    let synthetic = SyntheticSource::default();
    let disk = BrainVisionSource::new(tmp.path());
    for (i, run) in synthetic.fetch(4, Session::Train).unwrap().iter().enumerate() {
        io::write_recording(&disk.session_dir(4, Session::Train), &format!("run_{i}"), run).unwrap();
    }

    let config = DatasetConfig::for_subjects(vec![4]);
    let from_memory = load_subjects(&synthetic, &config, Session::Train).unwrap();
    let from_disk = load_subjects(&disk, &config, Session::Train).unwrap();

    let a = &from_memory[0].trials;
    let b = &from_disk[0].trials;
    assert_eq!(a.labels, b.labels);
    assert_eq!(a.ch_names, b.ch_names);
    assert_eq!(a.trials.dim(), b.trials.dim());
    // stored as float32
    for (&x, &y) in a.trials.iter().zip(b.trials.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    }
}

#[test]
fn baseline_spectrogram_and_plots() {
    let tmp = tempfile::tempdir().unwrap();
    let source = SyntheticSource::default();
    let config = DatasetConfig::for_subjects(vec![1]);
    let subjects = load_subjects(&source, &config, Session::Train).unwrap();
    let set = &subjects[0].trials;

    let power = baseline_removal(&set.trials, set.sfreq, (0.0, 0.5)).unwrap();
    assert_eq!(power.power.shape()[..2], [24, 22]);
    assert_eq!(power.power.shape()[2], power.freqs.len());
    assert_eq!(power.power.shape()[3], power.times.len());

    let stft_config = AverageStftPlotConfig {
        t_end: 4.0,
        figure: quiet_figure(tmp.path()),
        ..AverageStftPlotConfig::default()
    };
    let fig = vis::plot_average_band_power(&power, &set.ch_names, &stft_config, "S01_stft").unwrap();
    assert!(fig.path.unwrap().exists());

    let average_config = AverageChannelPlotConfig { figure: quiet_figure(tmp.path()), ..AverageChannelPlotConfig::default() };
    let fig = vis::visualize_single_subject_average_channel(set, &average_config, "S01_average").unwrap();
    assert_eq!(fig.path.unwrap(), tmp.path().join("S01_average.html"));
}
