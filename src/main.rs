use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eegtrials::epochs::load_subjects;
use eegtrials::fetch::SyntheticConfig;
use eegtrials::stft::baseline_removal;
use eegtrials::{io, vis};
use eegtrials::{AppConfig, BrainVisionSource, RecordingSource, Session, SubjectTrials, SyntheticSource};

// underscores will be converted to "-" when clap parses the arguments
#[derive(Parser)]
#[command(name = "eegtrials")]
#[command(version = "0.1.0")]
#[command(about = "Segments motor-imagery EEG sessions into trials and plots them", long_about = None)]
pub struct Cli {
    /// TOML configuration; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset root holding S01/session_T/*.vhdr and friends
    #[arg(long, required_unless_present = "synthetic")]
    root: Option<PathBuf>,

    /// Session to load (train or test)
    #[arg(short, long, default_value = "train")]
    session: String,

    /// Use generated recordings instead of files on disk
    #[arg(long)]
    synthetic: bool,

    /// Plot class averages
    #[arg(long)]
    average: bool,

    /// Plot randomly chosen trials
    #[arg(long)]
    random_trials: bool,

    /// Plot a run of consecutive trials
    #[arg(long)]
    sequence: bool,

    /// Plot baseline-normalised band power (needs `baseline` in the config)
    #[arg(long)]
    stft: bool,

    /// Write the fetched runs as BrainVision files under this directory
    #[arg(long)]
    export: Option<PathBuf>,
}

fn export_runs(source: &dyn RecordingSource, config: &AppConfig, session: Session, dir: &Path) -> Result<()> {
    let target = BrainVisionSource::new(dir);
    for &subject in &config.dataset.subjects_list {
        let runs = source
            .fetch(subject, session)
            .with_context(|| format!("fetching subject {subject} for export"))?;
        let session_dir = target.session_dir(subject, session);
        for (i, run) in runs.iter().enumerate() {
            let header = io::write_recording(&session_dir, &format!("run_{i}"), run)?;
            info!("Exported {:?}", header);
        }
    }
    Ok(())
}

fn plot_subject(cli: &Cli, config: &AppConfig, subject: &SubjectTrials) -> Result<()> {
    let set = &subject.trials;
    let stem = |kind: &str| format!("S{:02}_{kind}", subject.subject);

    if cli.average {
        vis::visualize_single_subject_average_channel(set, &config.plot.average, &stem("average"))?;
    }
    if cli.random_trials {
        vis::plot_random_trials(set, &config.plot.random_trials, &stem("random_trials"))?;
    }
    if cli.sequence {
        vis::plot_trial_sequence(set, &config.plot.sequence, &stem("sequence"))?;
    }
    if cli.stft {
        let Some(baseline) = config.dataset.baseline else {
            bail!("--stft needs `baseline` in the dataset config");
        };
        let power = baseline_removal(&set.trials, set.sfreq, baseline)?;
        info!("Subject {}: power spectrogram {:?}", subject.subject, power.power.shape());
        vis::plot_average_band_power(&power, &set.ch_names, &config.plot.average_stft, &stem("stft"))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("eegtrials=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_toml(path).with_context(|| format!("loading {path:?}"))?,
        None => AppConfig::default(),
    };
    let session = Session::from_str(&cli.session)?;

    let source: Box<dyn RecordingSource> = if cli.synthetic {
        Box::new(SyntheticSource::new(SyntheticConfig::default()))
    } else {
        match &cli.root {
            Some(root) => Box::new(BrainVisionSource::new(root)),
            None => bail!("--root is required unless --synthetic is given"),
        }
    };
    info!("Loading subjects {:?} ({session}) from {}", config.dataset.subjects_list, source.name());

    if let Some(dir) = &cli.export {
        export_runs(source.as_ref(), &config, session, dir)?;
    }

    let subjects = load_subjects(source.as_ref(), &config.dataset, session)?;
    if subjects.is_empty() {
        warn!("No subjects selected");
    }
    for subject in &subjects {
        plot_subject(&cli, &config, subject)
            .with_context(|| format!("plotting subject {}", subject.subject))?;
    }
    Ok(())
}
