//! WAV helpers for chunked audio stages.
//!
//! All functions are blocking and meant to run on the blocking pool.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("{path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("{path} does not match the format of the first chunk ({expected:?} vs {found:?})")]
    SpecMismatch {
        path: PathBuf,
        expected: WavSpec,
        found: WavSpec,
    },

    #[error("{0} contains no audio frames")]
    Empty(PathBuf),

    #[error("nothing to concatenate")]
    NoInput,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn wav_err(path: &Path) -> impl FnOnce(hound::Error) -> AudioError + '_ {
    move |source| AudioError::Wav {
        path: path.to_path_buf(),
        source,
    }
}

/// Format and length of a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub spec: WavSpec,
    pub frames: u32,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f64 {
        f64::from(self.frames) / f64::from(self.spec.sample_rate)
    }
}

/// Opens the file as WAV and checks it holds at least one frame.
pub fn verify_wav(path: &Path) -> Result<WavInfo, AudioError> {
    let reader = WavReader::open(path).map_err(wav_err(path))?;
    let info = WavInfo {
        spec: reader.spec(),
        frames: reader.duration(),
    };
    if info.frames == 0 {
        return Err(AudioError::Empty(path.to_path_buf()));
    }
    Ok(info)
}

enum Samples {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

fn read_samples(path: &Path) -> Result<(WavSpec, Samples), AudioError> {
    let mut reader = WavReader::open(path).map_err(wav_err(path))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Int => Samples::Int(
            reader
                .samples::<i32>()
                .collect::<Result<_, _>>()
                .map_err(wav_err(path))?,
        ),
        SampleFormat::Float => Samples::Float(
            reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(wav_err(path))?,
        ),
    };
    Ok((spec, samples))
}

/// Linear crossfade of the tail of `acc` into the head of `next`, then
/// appends the rest of `next`.
fn append_with_crossfade<T: Copy>(
    acc: &mut Vec<T>,
    next: &[T],
    overlap: usize,
    channels: usize,
    mix: impl Fn(T, T, f64) -> T,
) {
    let overlap = overlap.min(acc.len()).min(next.len());
    let overlap = overlap - overlap % channels.max(1);
    let frames = overlap / channels.max(1);
    let start = acc.len() - overlap;
    for i in 0..overlap {
        let t = ((i / channels.max(1)) as f64 + 1.0) / (frames as f64 + 1.0);
        acc[start + i] = mix(acc[start + i], next[i], t);
    }
    acc.extend_from_slice(&next[overlap..]);
}

/// Concatenates WAV files in order into `output`.
///
/// All inputs must share the same format. With `crossfade_ms > 0` adjacent
/// chunks overlap by that much with a linear fade; with 0 the samples are
/// copied unchanged.
pub fn concat_wav(inputs: &[PathBuf], output: &Path, crossfade_ms: u32) -> Result<WavInfo, AudioError> {
    let (first, rest) = inputs.split_first().ok_or(AudioError::NoInput)?;
    let (spec, mut acc) = read_samples(first)?;
    let channels = usize::from(spec.channels);
    let overlap = (u64::from(crossfade_ms) * u64::from(spec.sample_rate) / 1000) as usize * channels;
    let int_max = if spec.bits_per_sample >= 32 {
        i32::MAX as f64
    } else {
        ((1i64 << (spec.bits_per_sample - 1)) - 1) as f64
    };

    for path in rest {
        let (found, samples) = read_samples(path)?;
        if found != spec {
            return Err(AudioError::SpecMismatch {
                path: path.clone(),
                expected: spec,
                found,
            });
        }
        match (&mut acc, samples) {
            (Samples::Int(acc), Samples::Int(next)) => {
                append_with_crossfade(acc, &next, overlap, channels, |a, b, t| {
                    let mixed = f64::from(a) * (1.0 - t) + f64::from(b) * t;
                    mixed.round().clamp(-int_max - 1.0, int_max) as i32
                })
            }
            (Samples::Float(acc), Samples::Float(next)) => {
                append_with_crossfade(acc, &next, overlap, channels, |a, b, t| {
                    (f64::from(a) * (1.0 - t) + f64::from(b) * t) as f32
                })
            }
            _ => {
                return Err(AudioError::SpecMismatch {
                    path: path.clone(),
                    expected: spec,
                    found,
                })
            }
        }
    }

    let mut writer = WavWriter::create(output, spec).map_err(wav_err(output))?;
    let written = match &acc {
        Samples::Int(samples) => {
            for s in samples {
                writer.write_sample(*s).map_err(wav_err(output))?;
            }
            samples.len()
        }
        Samples::Float(samples) => {
            for s in samples {
                writer.write_sample(*s).map_err(wav_err(output))?;
            }
            samples.len()
        }
    };
    writer.finalize().map_err(wav_err(output))?;

    Ok(WavInfo {
        spec,
        frames: (written / channels.max(1)) as u32,
    })
}

/// One window of a split recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    pub path: PathBuf,
    /// Start of the window in the original recording, in seconds.
    pub offset_secs: f64,
}

/// Splits a WAV file into consecutive windows of `window_secs` written to
/// `out_dir` as `0000.wav`, `0001.wav`, ...
pub fn split_wav(input: &Path, out_dir: &Path, window_secs: u64) -> Result<Vec<AudioWindow>, AudioError> {
    fs::create_dir_all(out_dir).map_err(|source| AudioError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let mut reader = WavReader::open(input).map_err(wav_err(input))?;
    let spec = reader.spec();
    match spec.sample_format {
        SampleFormat::Int => write_windows(reader.samples::<i32>(), spec, input, out_dir, window_secs),
        SampleFormat::Float => write_windows(reader.samples::<f32>(), spec, input, out_dir, window_secs),
    }
}

fn write_windows<S, I>(
    samples: I,
    spec: WavSpec,
    input: &Path,
    out_dir: &Path,
    window_secs: u64,
) -> Result<Vec<AudioWindow>, AudioError>
where
    S: hound::Sample,
    I: Iterator<Item = hound::Result<S>>,
{
    let channels = u64::from(spec.channels).max(1);
    let per_window = (window_secs.max(1) * u64::from(spec.sample_rate) * channels) as usize;

    let mut windows = Vec::new();
    let mut writer: Option<(PathBuf, WavWriter<std::io::BufWriter<fs::File>>)> = None;
    let mut in_window = 0usize;

    for sample in samples {
        let sample = sample.map_err(wav_err(input))?;
        if writer.is_none() {
            let index = windows.len();
            let path = out_dir.join(format!("{:04}.wav", index));
            let w = WavWriter::create(&path, spec).map_err(wav_err(&path))?;
            windows.push(AudioWindow {
                path: path.clone(),
                offset_secs: (index as u64 * window_secs.max(1)) as f64,
            });
            writer = Some((path, w));
        }
        if let Some((path, w)) = writer.as_mut() {
            w.write_sample(sample).map_err(wav_err(path))?;
        }
        in_window += 1;
        if in_window == per_window {
            if let Some((path, w)) = writer.take() {
                w.finalize().map_err(wav_err(&path))?;
            }
            in_window = 0;
        }
    }
    if let Some((path, w)) = writer.take() {
        w.finalize().map_err(wav_err(&path))?;
    }
    Ok(windows)
}
