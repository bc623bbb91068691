//! BrainVision reader and writer (`.vhdr` header, `.vmrk` markers, binary `.eeg`).
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};
use crate::{BinaryFormat, DataOrientation, EEGInfo, EventMarker, Recording};

fn format_err<S: Into<String>>(msg: S) -> Error {
    Error::Format(msg.into())
}

/// Iterate `(section, key, value)` over an INI-style BrainVision file.
fn entries(content: &str) -> impl Iterator<Item = (&str, &str, &str)> {
    let mut section = "";
    content.lines().filter_map(move |line| {
        let line = line.trim_end_matches('\r').trim();
        if line.is_empty() || line.starts_with(';') {
            return None;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = &line[1..line.len() - 1];
            return None;
        }
        let (key, value) = line.split_once('=')?;
        Some((section, key.trim(), value.trim()))
    })
}

pub fn parse_header(header: &str) -> Result<EEGInfo> {
    let mut num_ch: Option<usize> = None;
    let mut sampling_interval: Option<f64> = None;
    let mut data_orientation = DataOrientation::Multiplexed;
    let mut binary_format = BinaryFormat::Int16;
    let mut data_file: Option<String> = None;
    let mut marker_file: Option<String> = None;
    let mut channels: Vec<(usize, String, f64)> = Vec::new();

    for (section, key, value) in entries(header) {
        match (section, key) {
            ("Common Infos", "DataFile") => data_file = Some(value.to_string()),
            ("Common Infos", "MarkerFile") => marker_file = Some(value.to_string()),
            ("Common Infos", "NumberOfChannels") => {
                num_ch = Some(value.parse().map_err(|_| format_err(format!("NumberOfChannels `{value}`")))?);
            }
            ("Common Infos", "SamplingInterval") => {
                sampling_interval =
                    Some(value.parse().map_err(|_| format_err(format!("SamplingInterval `{value}`")))?);
            }
            ("Common Infos", "DataOrientation") => {
                data_orientation = match value {
                    "MULTIPLEXED" => DataOrientation::Multiplexed,
                    "VECTORIZED" => DataOrientation::Vectorized,
                    other => return Err(format_err(format!("unsupported DataOrientation `{other}`"))),
                };
            }
            ("Common Infos", "DataFormat") if value != "BINARY" => {
                return Err(format_err(format!("unsupported DataFormat `{value}`")));
            }
            ("Binary Infos", "BinaryFormat") => {
                binary_format = match value {
                    "INT_16" => BinaryFormat::Int16,
                    "IEEE_FLOAT_32" => BinaryFormat::Float32,
                    other => return Err(format_err(format!("unsupported BinaryFormat `{other}`"))),
                };
            }
            ("Channel Infos", key) if key.starts_with("Ch") => {
                let number: usize = key[2..]
                    .parse()
                    .map_err(|_| format_err(format!("channel key `{key}`")))?;
                // <name>,<reference>,<resolution>,<unit>
                let mut fields = value.split(',');
                let name = fields.next().unwrap_or_default().replace("\\1", ",");
                let _reference = fields.next();
                let resolution = match fields.next().map(str::trim) {
                    None | Some("") => 1.0,
                    Some(res) => res.parse().map_err(|_| format_err(format!("resolution `{res}` of {name}")))?,
                };
                channels.push((number, name, resolution));
            }
            _ => {}
        }
    }

    let num_ch = num_ch.ok_or_else(|| format_err("NumberOfChannels missing"))?;
    let sampling_interval = sampling_interval.ok_or_else(|| format_err("SamplingInterval missing"))?;
    if !(sampling_interval.is_finite() && sampling_interval > 0.0) {
        return Err(format_err("SamplingInterval must be positive"));
    }
    let data_file = data_file.ok_or_else(|| format_err("DataFile missing"))?;

    channels.sort_by_key(|(number, _, _)| *number);
    if channels.len() != num_ch {
        return Err(format_err(format!(
            "header declares {num_ch} channels but lists {}",
            channels.len()
        )));
    }
    let (ch_names, resolutions): (Vec<String>, Vec<f64>) = channels.into_iter().map(|(_, name, res)| (name, res)).unzip();

    Ok(EEGInfo {
        num_ch,
        ch_names,
        resolutions,
        sfreq: 1e6 / sampling_interval,
        sampling_interval,
        data_orientation,
        binary_format,
        data_file,
        marker_file,
    })
}

/// Stimulus markers in marker-number order. Positions become 0-based;
/// responses, comments and segment markers are skipped.
pub fn parse_markers(vmrk: &str) -> Result<Vec<EventMarker>> {
    let mut markers: Vec<(usize, EventMarker)> = Vec::new();
    for (section, key, value) in entries(vmrk) {
        if section != "Marker Infos" || !key.starts_with("Mk") {
            continue;
        }
        let number: usize = key[2..].parse().map_err(|_| format_err(format!("marker key `{key}`")))?;
        let fields: Vec<&str> = value.split(',').collect();
        if fields.len() < 3 {
            return Err(format_err(format!("marker `{key}` has {} fields", fields.len())));
        }
        if fields[0] != "Stimulus" {
            continue;
        }
        let code = fields[1].trim_start_matches(|c: char| !c.is_ascii_digit());
        let Ok(label) = code.parse::<u32>() else {
            debug!("Skipping marker {key} without numeric code: {:?}", fields[1]);
            continue;
        };
        let position: usize = fields[2]
            .trim()
            .parse()
            .map_err(|_| format_err(format!("marker `{key}` position `{}`", fields[2])))?;
        if position == 0 {
            return Err(format_err(format!("marker `{key}` has position 0")));
        }
        markers.push((number, EventMarker { onset: position - 1, label }));
    }
    markers.sort_by_key(|(number, _)| *number);
    Ok(markers.into_iter().map(|(_, m)| m).collect())
}

/// Decode little-endian samples as stored, without resolution scaling.
pub fn parse_samples(bytes: &[u8], eeg_info: &EEGInfo) -> Result<Vec<f64>> {
    let width = match eeg_info.binary_format {
        BinaryFormat::Int16 => 2,
        BinaryFormat::Float32 => 4,
    };
    let chunks = bytes.chunks_exact(width);
    if !chunks.remainder().is_empty() {
        return Err(Error::data_shape(format!(
            "{} bytes is not a whole number of {width}-byte samples",
            bytes.len()
        )));
    }
    let samples = match eeg_info.binary_format {
        BinaryFormat::Int16 => chunks
            .map(|c| f64::from(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        BinaryFormat::Float32 => chunks
            .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
    };
    Ok(samples)
}

/// Arrange flat samples as channels x samples and apply channel resolutions.
pub fn demultiplex(samples: Vec<f64>, eeg_info: &EEGInfo) -> Result<Array2<f64>> {
    let n_ch = eeg_info.num_ch;
    if n_ch == 0 {
        return Err(Error::data_shape("Number of channels cannot be zero"));
    }
    if samples.len() % n_ch != 0 {
        return Err(Error::data_shape(format!(
            "{} samples do not divide evenly into {n_ch} channels",
            samples.len()
        )));
    }
    let n_samples = samples.len() / n_ch;
    let mut data = match eeg_info.data_orientation {
        DataOrientation::Multiplexed => Array2::from_shape_vec((n_samples, n_ch), samples)
            .map_err(|e| Error::data_shape(e.to_string()))?
            .reversed_axes()
            .as_standard_layout()
            .into_owned(),
        DataOrientation::Vectorized => Array2::from_shape_vec((n_ch, n_samples), samples)
            .map_err(|e| Error::data_shape(e.to_string()))?,
    };
    for (mut row, &res) in data.outer_iter_mut().zip(&eeg_info.resolutions) {
        row *= res;
    }
    Ok(data)
}

/// Read one run given the path of its `.vhdr` file.
pub fn read_recording(vhdr_path: &Path) -> Result<Recording> {
    let header = fs::read_to_string(vhdr_path)?;
    let eeg_info = parse_header(&header)?;
    let dir = vhdr_path.parent().unwrap_or_else(|| Path::new("."));

    let bytes = fs::read(dir.join(&eeg_info.data_file))?;
    let samples = parse_samples(&bytes, &eeg_info)?;
    let data = demultiplex(samples, &eeg_info)?;

    let events = match &eeg_info.marker_file {
        Some(marker_file) => parse_markers(&fs::read_to_string(dir.join(marker_file))?)?,
        None => Vec::new(),
    };
    debug!(
        "Read {:?}: {} channels, {} samples at {} Hz, {} events",
        vhdr_path,
        data.nrows(),
        data.ncols(),
        eeg_info.sfreq,
        events.len()
    );

    Ok(Recording { data, sfreq: eeg_info.sfreq, ch_names: eeg_info.ch_names, events })
}

/// Write `recording` as `<dir>/<stem>.{vhdr,vmrk,eeg}` (float32, multiplexed).
/// Returns the header path.
pub fn write_recording(dir: &Path, stem: &str, recording: &Recording) -> Result<PathBuf> {
    if recording.ch_names.len() != recording.n_channels() {
        return Err(Error::data_shape(format!(
            "{} channel names for {} channels",
            recording.ch_names.len(),
            recording.n_channels()
        )));
    }
    fs::create_dir_all(dir)?;
    let data_name = format!("{stem}.eeg");
    let marker_name = format!("{stem}.vmrk");

    let mut header = String::new();
    header.push_str("Brain Vision Data Exchange Header File Version 1.0\n\n");
    header.push_str("[Common Infos]\nCodepage=UTF-8\n");
    let _ = writeln!(header, "DataFile={data_name}");
    let _ = writeln!(header, "MarkerFile={marker_name}");
    header.push_str("DataFormat=BINARY\nDataOrientation=MULTIPLEXED\n");
    let _ = writeln!(header, "NumberOfChannels={}", recording.n_channels());
    let _ = writeln!(header, "SamplingInterval={}", 1e6 / recording.sfreq);
    header.push_str("\n[Binary Infos]\nBinaryFormat=IEEE_FLOAT_32\n\n[Channel Infos]\n");
    for (i, name) in recording.ch_names.iter().enumerate() {
        let _ = writeln!(header, "Ch{}={},,1,µV", i + 1, name.replace(',', "\\1"));
    }

    let mut markers = String::new();
    markers.push_str("Brain Vision Data Exchange Marker File Version 1.0\n\n");
    markers.push_str("[Common Infos]\nCodepage=UTF-8\n");
    let _ = writeln!(markers, "DataFile={data_name}");
    markers.push_str("\n[Marker Infos]\nMk1=New Segment,,1,1,0\n");
    for (i, event) in recording.events.iter().enumerate() {
        let _ = writeln!(markers, "Mk{}=Stimulus,S{:>3},{},1,0", i + 2, event.label, event.onset + 1);
    }

    let mut bytes = Vec::with_capacity(recording.data.len() * 4);
    for frame in recording.data.columns() {
        for &v in frame {
            bytes.extend_from_slice(&(v as f32).to_le_bytes());
        }
    }

    let vhdr_path = dir.join(format!("{stem}.vhdr"));
    fs::write(&vhdr_path, header)?;
    fs::write(dir.join(&marker_name), markers)?;
    fs::write(dir.join(&data_name), bytes)?;
    Ok(vhdr_path)
}
