//! Audio capture from microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};

use super::source::{EventSender, FrameSource, SourceEvent};
use crate::{Error, Result};

/// A running device is presumed dead after this long without a chunk
const STALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Resampler input block size at the device rate
const RESAMPLE_CHUNK: usize = 1024;

/// Captures audio from the default input device
pub struct CpalSource {
    sample_rate: u32,
    stream: Option<Stream>,
    dropped: Arc<AtomicU64>,
}

impl CpalSource {
    /// Create a capture source delivering mono samples at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            stream: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Chunks dropped because the queue was full
    #[must_use]
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Pick a stream config, preferring native mono at the target rate
    fn select_config(&self, device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let target = SampleRate(self.sample_rate);

        let exact = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
            .find(|c| {
                c.channels() == 1 && c.min_sample_rate() <= target && c.max_sample_rate() >= target
            });

        if let Some(supported) = exact {
            let format = supported.sample_format();
            return Ok((supported.with_sample_rate(target).config(), format));
        }

        // Fall back to the device default and convert in the callback
        let default = device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        tracing::info!(
            device_rate = default.sample_rate().0,
            channels = default.channels(),
            target_rate = self.sample_rate,
            "no native mono config, resampling"
        );
        Ok((default.config(), default.sample_format()))
    }
}

impl FrameSource for CpalSource {
    fn name(&self) -> &'static str {
        "microphone"
    }

    fn start(&mut self, events: EventSender) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let (config, format) = self.select_config(&device)?;
        let converter = InputConverter::new(
            usize::from(config.channels),
            config.sample_rate.0,
            self.sample_rate,
        )?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?format,
            "audio capture initialized"
        );

        let stream = match format {
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, converter, events, &self.dropped)?
            }
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, converter, events, &self.dropped)?
            }
            other => {
                return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!(dropped_chunks = self.dropped_chunks(), "audio capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    fn stall_timeout(&self) -> Option<Duration> {
        Some(STALL_TIMEOUT)
    }
}

/// Build an input stream that converts to mono i16 and never blocks
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut converter: InputConverter,
    events: EventSender,
    dropped: &Arc<AtomicU64>,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let dropped = Arc::clone(dropped);
    let fault_events = events.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let chunk = converter.process(data.iter().map(|s| s.to_sample::<f32>()));
                if chunk.is_empty() {
                    return;
                }
                if events.try_send(SourceEvent::Chunk(chunk)).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                let _ = fault_events.try_send(SourceEvent::Fault(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Downmixes and resamples device audio to mono i16 at the target rate
pub struct InputConverter {
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl InputConverter {
    /// Create a converter from `channels` at `from_rate` to mono at `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for the rate pair
    pub fn new(channels: usize, from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = if from_rate == to_rate {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    from_rate as usize,
                    to_rate as usize,
                    RESAMPLE_CHUNK,
                    1,
                    1,
                )
                .map_err(|e| Error::Audio(format!("resampler: {e}")))?,
            )
        };

        Ok(Self {
            channels: channels.max(1),
            resampler,
            pending: Vec::new(),
        })
    }

    /// Convert interleaved samples, returning whatever output is ready
    pub fn process(&mut self, interleaved: impl Iterator<Item = f32>) -> Vec<i16> {
        let mono = downmix(interleaved, self.channels);

        let Some(resampler) = self.resampler.as_mut() else {
            return mono.into_iter().map(to_i16).collect();
        };

        self.pending.extend(mono);
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[block], None) {
                Ok(resampled) => {
                    if let Some(channel) = resampled.first() {
                        out.extend(channel.iter().copied().map(to_i16));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "resampling failed, dropping block");
                }
            }
        }
        out
    }
}

/// Average interleaved channels into mono
fn downmix(interleaved: impl Iterator<Item = f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.collect();
    }

    let samples: Vec<f32> = interleaved.collect();
    #[allow(clippy::cast_precision_loss)]
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Convert f32 [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
