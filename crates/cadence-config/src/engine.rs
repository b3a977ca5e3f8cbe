//! Engine configuration file format.

use cadence_core::{AudioConfig, SampleFormat};
use cadence_thread::TreeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::validation::{
    MAX_AUDIO_CHANNELS, MAX_BUFFER_SIZE, MAX_PRECISION, MAX_SAMPLERATE, MIN_BUFFER_SIZE, MIN_FREQ,
    MIN_SAMPLERATE, ValidationError, check_range,
};

/// Top-level engine settings.
///
/// Every field has a default, so an empty file is a valid configuration.
///
/// # TOML Format
///
/// ```toml
/// samplerate = 48000
/// buffer_size = 512
/// audio_channels = 2
/// format = "s16"
///
/// [thread]
/// freq = 93.75
/// timelock_cycles = 3
/// hangcheck_cycles = 8
/// max_precision = 1000.0
///
/// [soundcard]
/// backend = "cpal"
/// device = "USB Audio"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz.
    pub samplerate: u32,
    /// Frames per buffer.
    pub buffer_size: usize,
    /// Interleaved output channels.
    pub audio_channels: usize,
    /// Storage format of new signals.
    pub format: SampleFormat,
    /// Thread tree timing.
    pub thread: ThreadConfig,
    /// Output device selection.
    pub soundcard: SoundcardConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samplerate: 48000,
            buffer_size: 512,
            audio_channels: 2,
            format: SampleFormat::Signed16,
            thread: ThreadConfig::default(),
            soundcard: SoundcardConfig::default(),
        }
    }
}

/// Thread tree timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThreadConfig {
    /// Tics per second. Unset means `samplerate / buffer_size`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    /// Consecutive missed windows before a thread is skipped.
    pub timelock_cycles: u32,
    /// Tics a thread may lag before the tree counts as hung.
    pub hangcheck_cycles: u32,
    /// Fastest tic rate the tree may be driven at.
    pub max_precision: f64,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        let tree = TreeConfig::default();
        Self {
            freq: None,
            timelock_cycles: tree.timelock_cycles,
            hangcheck_cycles: tree.hangcheck_cycles,
            max_precision: MAX_PRECISION,
        }
    }
}

/// Which soundcard implementation drives output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Render into memory, paced by the CPU.
    Offline,
    /// Live output through cpal.
    #[default]
    Cpal,
}

impl BackendKind {
    /// Name as written in configuration files.
    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::Offline => "offline",
            BackendKind::Cpal => "cpal",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offline" => Ok(BackendKind::Offline),
            "cpal" => Ok(BackendKind::Cpal),
            other => Err(format!("unknown soundcard backend: {other}")),
        }
    }
}

/// Output device selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SoundcardConfig {
    /// Soundcard implementation.
    pub backend: BackendKind,
    /// Substring of the device name. Unset means the host default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl EngineConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.check()?;
        Ok(config)
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        tracing::debug!(path = %path.display(), "engine config saved");
        Ok(())
    }

    /// Convert the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Every problem with this configuration, in field order.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        check_range(
            &mut errors,
            "samplerate",
            f64::from(self.samplerate),
            f64::from(MIN_SAMPLERATE),
            f64::from(MAX_SAMPLERATE),
        );
        check_range(
            &mut errors,
            "buffer_size",
            self.buffer_size as f64,
            MIN_BUFFER_SIZE as f64,
            MAX_BUFFER_SIZE as f64,
        );
        check_range(
            &mut errors,
            "audio_channels",
            self.audio_channels as f64,
            1.0,
            MAX_AUDIO_CHANNELS as f64,
        );
        if self.format == SampleFormat::Complex {
            errors.push(ValidationError::UnsupportedFormat(self.format.name().to_string()));
        }

        let thread = &self.thread;
        check_range(
            &mut errors,
            "thread.max_precision",
            thread.max_precision,
            MIN_FREQ,
            MAX_PRECISION,
        );
        if let Some(freq) = thread.freq {
            check_range(
                &mut errors,
                "thread.freq",
                freq,
                MIN_FREQ,
                thread.max_precision.clamp(MIN_FREQ, MAX_PRECISION),
            );
        }
        if thread.timelock_cycles == 0 {
            errors.push(ValidationError::Zero {
                field: "thread.timelock_cycles".to_string(),
            });
        }
        if thread.hangcheck_cycles == 0 {
            errors.push(ValidationError::Zero {
                field: "thread.hangcheck_cycles".to_string(),
            });
        }

        if self
            .soundcard
            .device
            .as_deref()
            .is_some_and(|device| device.trim().is_empty())
        {
            errors.push(ValidationError::EmptyDevice);
        }

        errors
    }

    /// Fold [`validate`](Self::validate) into a `Result`.
    pub fn check(&self) -> Result<(), ConfigError> {
        match ValidationError::collect(self.validate()) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Tic frequency the tree runs at.
    ///
    /// Without an explicit `thread.freq` one tic plays one buffer, capped at
    /// `thread.max_precision`.
    pub fn freq(&self) -> f64 {
        let derived = f64::from(self.samplerate) / self.buffer_size.max(1) as f64;
        self.thread
            .freq
            .unwrap_or(derived)
            .min(self.thread.max_precision)
    }

    /// Audio defaults for new machines.
    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            samplerate: self.samplerate,
            buffer_size: self.buffer_size,
            format: self.format,
        }
    }

    /// Timing for a new thread tree.
    pub fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            freq: self.freq(),
            timelock_cycles: self.thread.timelock_cycles,
            hangcheck_cycles: self.thread.hangcheck_cycles,
            ..TreeConfig::default()
        }
    }
}
