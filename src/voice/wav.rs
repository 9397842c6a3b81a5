//! WAV encoding and transient segment files

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::segment::Segment;
use crate::{Error, Result};

/// Encode 16-bit mono samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Read a 16-bit WAV file as mono samples
///
/// Multi-channel files are averaged down to mono.
///
/// # Errors
///
/// Returns error if the file cannot be read, is not 16-bit PCM, or was
/// recorded at a different sample rate
pub fn read_wav_mono(path: &Path, sample_rate: u32) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::Audio(format!(
            "{}: expected 16-bit PCM, got {}-bit {:?}",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        )));
    }
    if spec.sample_rate != sample_rate {
        return Err(Error::Audio(format!(
            "{}: expected {sample_rate} Hz, got {} Hz",
            path.display(),
            spec.sample_rate
        )));
    }

    let interleaved = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let channels = usize::from(spec.channels.max(1));
    if channels == 1 {
        return Ok(interleaved);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let mono = interleaved
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().copied().map(i32::from).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect();

    Ok(mono)
}

/// A segment written to a temporary WAV file
///
/// The file is complete before the path is handed out and is deleted when
/// the value is dropped.
pub struct SegmentFile {
    file: NamedTempFile,
}

impl SegmentFile {
    /// Write `segment` to a new temporary file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn write(segment: &Segment) -> Result<Self> {
        let wav = samples_to_wav(&segment.samples(), segment.sample_rate())?;

        let mut file = tempfile::Builder::new()
            .prefix("navi-segment-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(&wav)?;
        file.flush()?;
        file.as_file().sync_all()?;

        tracing::debug!(
            path = %file.path().display(),
            bytes = wav.len(),
            epoch = segment.epoch(),
            "segment written"
        );

        Ok(Self { file })
    }

    /// Path of the WAV file
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
