//! Engine configuration validation.
//!
//! [`EngineConfig::validate`](crate::EngineConfig::validate) collects every
//! problem instead of stopping at the first, so a user fixing a config file
//! sees the full list at once.
//!
//! # Example
//!
//! ```rust
//! use cadence_config::{EngineConfig, ValidationError};
//!
//! let mut config = EngineConfig::default();
//! config.buffer_size = 0;
//! config.audio_channels = 0;
//!
//! let errors = config.validate();
//! assert_eq!(errors.len(), 2);
//! assert!(matches!(errors[0], ValidationError::Zero { .. }));
//! ```

use thiserror::Error;

/// Lowest accepted sample rate in Hz.
pub const MIN_SAMPLERATE: u32 = 8000;

/// Highest accepted sample rate in Hz.
pub const MAX_SAMPLERATE: u32 = 192_000;

/// Smallest accepted buffer, in frames.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Largest accepted buffer, in frames.
pub const MAX_BUFFER_SIZE: usize = 65535;

/// Most interleaved channels a soundcard line may carry.
pub const MAX_AUDIO_CHANNELS: usize = 64;

/// Slowest accepted tic frequency in Hz.
pub const MIN_FREQ: f64 = 0.01;

/// Upper bound for `thread.max_precision`, in tics per second.
pub const MAX_PRECISION: f64 = 1000.0;

/// A single configuration problem.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Field must be non-zero.
    #[error("{field} must be non-zero")]
    Zero {
        /// Dotted path of the field.
        field: String,
    },

    /// Numeric value out of range.
    #[error("{field} value {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Dotted path of the field.
        field: String,
        /// The rejected value.
        value: f64,
        /// Minimum allowed value.
        min: f64,
        /// Maximum allowed value.
        max: f64,
    },

    /// Sample format that cannot be rendered to a soundcard.
    #[error("sample format '{0}' cannot be played on a soundcard")]
    UnsupportedFormat(String),

    /// Device name given but empty.
    #[error("soundcard.device must not be empty when set")]
    EmptyDevice,

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

impl ValidationError {
    /// Fold a list into a single error. `None` if the list is empty.
    pub fn collect(mut errors: Vec<ValidationError>) -> Option<ValidationError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ValidationError::Multiple(errors)),
        }
    }

    pub(crate) fn out_of_range(field: &str, value: f64, min: f64, max: f64) -> Self {
        ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        }
    }
}

/// Push an error unless `value` lies in `[min, max]`. Zero gets its own variant.
pub(crate) fn check_range(
    errors: &mut Vec<ValidationError>,
    field: &str,
    value: f64,
    min: f64,
    max: f64,
) {
    if value == 0.0 && min > 0.0 {
        errors.push(ValidationError::Zero {
            field: field.to_string(),
        });
    } else if !(min..=max).contains(&value) {
        errors.push(ValidationError::out_of_range(field, value, min, max));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_empty_is_none() {
        assert!(ValidationError::collect(Vec::new()).is_none());
    }

    #[test]
    fn collect_single_unwraps() {
        let err = ValidationError::collect(vec![ValidationError::EmptyDevice]).unwrap();
        assert_eq!(err, ValidationError::EmptyDevice);
    }

    #[test]
    fn collect_many_joins_messages() {
        let err = ValidationError::collect(vec![
            ValidationError::EmptyDevice,
            ValidationError::UnsupportedFormat("complex".to_string()),
        ])
        .unwrap();
        let msg = err.to_string();
        assert!(msg.starts_with("multiple validation errors"), "got: {msg}");
        assert!(msg.contains("; "), "got: {msg}");
        assert!(msg.contains("complex"), "got: {msg}");
    }

    #[test]
    fn check_range_distinguishes_zero() {
        let mut errors = Vec::new();
        check_range(&mut errors, "samplerate", 0.0, 8000.0, 192000.0);
        check_range(&mut errors, "samplerate", 4000.0, 8000.0, 192000.0);
        check_range(&mut errors, "samplerate", 44100.0, 8000.0, 192000.0);
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ValidationError::Zero { .. }));
        assert_eq!(
            errors[1].to_string(),
            "samplerate value 4000 out of range [8000, 192000]"
        );
    }
}
