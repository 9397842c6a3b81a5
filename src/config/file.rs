//! TOML configuration file loading
//!
//! Supports `~/.config/navi/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NaviConfigFile {
    /// Capture format
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake detection and utterance segmentation
    #[serde(default)]
    pub segmentation: SegmentationFileConfig,

    /// Device fault recovery
    #[serde(default)]
    pub recovery: RecoveryFileConfig,

    /// Speech-to-text backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech output
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Capture format configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Length of one analysis frame in milliseconds
    pub frame_ms: Option<u64>,
}

/// Segmentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct SegmentationFileConfig {
    /// RMS energy above which a frame counts as voice
    pub voice_threshold: Option<f32>,

    /// Silence that ends a command, in milliseconds
    pub silence_timeout_ms: Option<u64>,

    /// Hard cap on one command recording, in milliseconds
    pub max_command_duration_ms: Option<u64>,

    /// Horizon of the wake detection window, in milliseconds
    pub wake_window_ms: Option<u64>,

    /// Minimum energy samples in the window before testing for a wake pattern
    pub min_wake_samples: Option<usize>,

    /// Minimum frames above twice the threshold within the window
    pub min_wake_spikes: Option<usize>,
}

/// Device fault recovery configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecoveryFileConfig {
    /// Delay before restarting a faulted capture device, in milliseconds
    pub restart_backoff_ms: Option<u64>,

    /// Upper bound on device restarts per minute
    pub restarts_per_minute: Option<u32>,

    /// Consecutive failed restarts before giving up
    pub max_restart_failures: Option<u32>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Backend: "whisper", "deepgram" or "command"
    pub provider: Option<String>,

    /// Model identifier (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// External transcriber program and arguments, `{file}` is replaced by the WAV path
    pub command: Option<Vec<String>>,

    /// Transcription timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Speak responses (false logs them instead)
    pub enabled: Option<bool>,

    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// TTS speed multiplier
    pub speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `NaviConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NaviConfigFile {
    let Some(path) = config_file_path() else {
        return NaviConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Falls back to defaults when the file is missing or malformed.
pub fn load_config_file_from(path: &Path) -> NaviConfigFile {
    if !path.exists() {
        return NaviConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                NaviConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            NaviConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/navi/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("navi").join("config.toml"))
}
