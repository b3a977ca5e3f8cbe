//! Error types for effect units and plugin hosting.

use thiserror::Error;

/// Errors raised by effect units, banks and plugin back ends.
#[derive(Debug, Error)]
pub enum FxError {
    /// No plugin factory is registered under this name.
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    /// A plugin back end reported a failure.
    #[error("plugin '{plugin}' failed: {reason}")]
    Plugin {
        /// Plugin name.
        plugin: String,
        /// What went wrong.
        reason: String,
    },

    /// No sample bank is registered under this name.
    #[error("unknown sample bank '{0}'")]
    UnknownBank(String),

    /// The bank has no preset at this bank/program pair.
    #[error("bank '{bank}' has no preset {preset}:{program}")]
    MissingPreset {
        /// Bank name.
        bank: String,
        /// Preset bank number.
        preset: u16,
        /// Program number.
        program: u8,
    },

    /// A sample table is unusable (empty data, loop outside the data).
    #[error("invalid sample '{name}': {reason}")]
    InvalidSample {
        /// Sample name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A graph operation failed.
    #[error(transparent)]
    Core(#[from] cadence_core::Error),
}

impl FxError {
    /// Create a plugin failure.
    pub fn plugin(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        FxError::Plugin {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for effect operations.
pub type Result<T> = std::result::Result<T, FxError>;
