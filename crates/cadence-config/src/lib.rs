//! Engine configuration for cadence.
//!
//! Engine settings live in a small TOML file: sample rate, buffer size,
//! channel count and storage format, the thread tree's timing knobs, and
//! which soundcard backend to open. This crate parses and validates that
//! file and converts it into the engine's own configuration types.
//!
//! # Example
//!
//! ```rust,no_run
//! use cadence_config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml").unwrap();
//! let tree = config.tree_config();
//! let audio = config.audio_config();
//! assert_eq!(audio.samplerate, config.samplerate);
//! # let _ = tree;
//! ```

mod engine;
mod error;

/// Configuration validation.
pub mod validation;

pub use engine::{BackendKind, EngineConfig, SoundcardConfig, ThreadConfig};
pub use error::ConfigError;
pub use validation::{ValidationError, ValidationResult};
