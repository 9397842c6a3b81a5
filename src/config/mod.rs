//! Configuration management for Navi
//!
//! Values are layered `env > toml > default`.

pub mod file;

use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

use file::NaviConfigFile;

/// Default capture sample rate (16kHz for speech)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Navi configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Capture format
    pub audio: AudioConfig,

    /// Wake detection and utterance segmentation
    pub segmentation: SegmentationConfig,

    /// Device fault recovery
    pub recovery: RecoveryConfig,

    /// Speech-to-text configuration
    pub stt: SttConfig,

    /// Text-to-speech configuration
    pub tts: TtsConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Capture format configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate delivered to the segmentation core
    pub sample_rate: u32,

    /// Length of one analysis frame
    pub frame: Duration,
}

impl AudioConfig {
    /// Number of samples in one analysis frame
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn frame_samples(&self) -> usize {
        (u128::from(self.sample_rate) * self.frame.as_millis() / 1000).max(1) as usize
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame: Duration::from_millis(100),
        }
    }
}

/// Wake detection and segmentation tuning
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// RMS energy (16-bit scale) above which a frame counts as voice
    pub voice_threshold: f32,

    /// Contiguous silence that ends a command
    pub silence_timeout: Duration,

    /// Hard cap on one command recording
    pub max_command_duration: Duration,

    /// Age horizon of the wake detection window
    pub wake_window: Duration,

    /// Samples required in the window before the wake test runs
    pub min_wake_samples: usize,

    /// Frames above `2 × voice_threshold` required for a wake pattern
    pub min_wake_spikes: usize,

    /// Sample rate, used to size the utterance sanity cap
    pub sample_rate: u32,
}

impl SegmentationConfig {
    /// Utterance size (in samples) treated as a runaway buffer
    ///
    /// One and a half times the max command duration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn overrun_cap_samples(&self) -> usize {
        let max_ms = self.max_command_duration.as_millis();
        (u128::from(self.sample_rate) * max_ms * 3 / 2000) as usize
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            voice_threshold: 300.0,
            silence_timeout: Duration::from_millis(700),
            max_command_duration: Duration::from_millis(8000),
            wake_window: Duration::from_millis(2000),
            min_wake_samples: 10,
            min_wake_spikes: 2,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Device fault recovery
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Delay before a faulted device is restarted
    pub restart_backoff: Duration,

    /// Upper bound on restarts per minute
    pub restarts_per_minute: u32,

    /// Consecutive failed restarts before the process gives up
    pub max_restart_failures: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_millis(1500),
            restarts_per_minute: 10,
            max_restart_failures: 5,
        }
    }
}

/// STT backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    /// `OpenAI` Whisper API
    Whisper,
    /// Deepgram API
    Deepgram,
    /// Local program fed a transient WAV file
    Command,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            "command" | "local" => Ok(Self::Command),
            other => Err(Error::Config(format!("unknown stt provider: {other}"))),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Backend
    pub provider: SttProvider,

    /// Model identifier for hosted backends
    pub model: String,

    /// Program and arguments for the command backend
    pub command: Vec<String>,

    /// Upper bound on one transcription
    pub timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::Whisper,
            model: "whisper-1".to_string(),
            command: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Speak responses through the speaker (false logs them)
    pub enabled: bool,

    /// TTS model (e.g. "tts-1")
    pub model: String,

    /// TTS voice identifier
    pub voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("openai", &self.openai.as_ref().map(|_| "<redacted>"))
            .field("deepgram", &self.deepgram.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            segmentation: SegmentationConfig::default(),
            recovery: RecoveryConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            api_keys: ApiKeys::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if an environment value cannot be parsed or the result is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed or the result is invalid
    pub fn from_sources<F>(fc: NaviConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let sample_rate = env_parse(&env, "NAVI_SAMPLE_RATE")?
            .or(fc.audio.sample_rate)
            .unwrap_or(defaults.audio.sample_rate);

        let audio = AudioConfig {
            sample_rate,
            frame: env_millis(&env, "NAVI_FRAME_MS")?
                .or_else(|| fc.audio.frame_ms.map(Duration::from_millis))
                .unwrap_or(defaults.audio.frame),
        };

        let seg = fc.segmentation;
        let segmentation = SegmentationConfig {
            voice_threshold: env_parse(&env, "NAVI_VOICE_THRESHOLD")?
                .or(seg.voice_threshold)
                .unwrap_or(defaults.segmentation.voice_threshold),
            silence_timeout: env_millis(&env, "NAVI_SILENCE_TIMEOUT_MS")?
                .or_else(|| seg.silence_timeout_ms.map(Duration::from_millis))
                .unwrap_or(defaults.segmentation.silence_timeout),
            max_command_duration: env_millis(&env, "NAVI_MAX_COMMAND_DURATION_MS")?
                .or_else(|| seg.max_command_duration_ms.map(Duration::from_millis))
                .unwrap_or(defaults.segmentation.max_command_duration),
            wake_window: env_millis(&env, "NAVI_WAKE_WINDOW_MS")?
                .or_else(|| seg.wake_window_ms.map(Duration::from_millis))
                .unwrap_or(defaults.segmentation.wake_window),
            min_wake_samples: seg
                .min_wake_samples
                .unwrap_or(defaults.segmentation.min_wake_samples),
            min_wake_spikes: seg
                .min_wake_spikes
                .unwrap_or(defaults.segmentation.min_wake_spikes),
            sample_rate,
        };

        let recovery = RecoveryConfig {
            restart_backoff: env_millis(&env, "NAVI_RESTART_BACKOFF_MS")?
                .or_else(|| fc.recovery.restart_backoff_ms.map(Duration::from_millis))
                .unwrap_or(defaults.recovery.restart_backoff),
            restarts_per_minute: fc
                .recovery
                .restarts_per_minute
                .unwrap_or(defaults.recovery.restarts_per_minute),
            max_restart_failures: fc
                .recovery
                .max_restart_failures
                .unwrap_or(defaults.recovery.max_restart_failures),
        };

        let provider = match env("NAVI_STT_PROVIDER").or(fc.stt.provider) {
            Some(p) => p.parse()?,
            None => defaults.stt.provider,
        };
        let stt = SttConfig {
            provider,
            model: env("NAVI_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or(defaults.stt.model),
            command: env("NAVI_STT_COMMAND")
                .map(|c| c.split_whitespace().map(ToString::to_string).collect())
                .or(fc.stt.command)
                .unwrap_or(defaults.stt.command),
            timeout: fc
                .stt
                .timeout_ms
                .map_or(defaults.stt.timeout, Duration::from_millis),
        };

        let tts = TtsConfig {
            enabled: fc.tts.enabled.unwrap_or(defaults.tts.enabled),
            model: env("NAVI_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or(defaults.tts.model),
            voice: env("NAVI_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or(defaults.tts.voice),
            speed: fc.tts.speed.unwrap_or(defaults.tts.speed),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
        };

        let config = Self {
            audio,
            segmentation,
            recovery,
            stt,
            tts,
            api_keys,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the values describe a workable pipeline
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmentation;

        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }
        if self.audio.frame.is_zero() {
            return Err(Error::Config("frame length must be positive".to_string()));
        }
        if !seg.voice_threshold.is_finite() || seg.voice_threshold <= 0.0 {
            return Err(Error::Config(format!(
                "voice threshold must be positive, got {}",
                seg.voice_threshold
            )));
        }
        if seg.silence_timeout.is_zero() {
            return Err(Error::Config("silence timeout must be positive".to_string()));
        }
        if seg.silence_timeout >= seg.max_command_duration {
            return Err(Error::Config(format!(
                "silence timeout ({}ms) must be shorter than max command duration ({}ms)",
                seg.silence_timeout.as_millis(),
                seg.max_command_duration.as_millis()
            )));
        }
        if seg.min_wake_samples == 0 || seg.min_wake_spikes > seg.min_wake_samples {
            return Err(Error::Config(
                "min wake spikes must not exceed min wake samples".to_string(),
            ));
        }

        // The window has to be able to hold the minimum number of frames
        let frames_in_window = seg.wake_window.as_millis() / self.audio.frame.as_millis().max(1);
        if frames_in_window < seg.min_wake_samples as u128 {
            return Err(Error::Config(format!(
                "wake window of {}ms holds only {frames_in_window} frames, need {}",
                seg.wake_window.as_millis(),
                seg.min_wake_samples
            )));
        }

        if self.recovery.restarts_per_minute == 0 {
            return Err(Error::Config("restarts per minute must be positive".to_string()));
        }

        Ok(())
    }
}

/// Parse an optional environment value
fn env_parse<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("invalid {key}={raw}: {e}")))
        })
        .transpose()
}

/// Parse an optional millisecond environment value
fn env_millis<F>(env: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(env_parse::<u64, F>(env, key)?.map(Duration::from_millis))
}
