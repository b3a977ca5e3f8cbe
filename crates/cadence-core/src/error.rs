//! Error types for the audio graph.

use crate::format::SampleFormat;
use thiserror::Error;

/// Errors raised by graph construction, recall execution and buffer management.
#[derive(Debug, Error)]
pub enum Error {
    /// A port was written with a value of a different type than it holds.
    #[error("port '{port}' holds {expected} values, got {found}")]
    PortType {
        /// Specifier of the port.
        port: String,
        /// Type name the port was created with.
        expected: &'static str,
        /// Type name of the rejected value.
        found: &'static str,
    },

    /// A recall declared a required dependency that no sibling satisfies.
    #[error("recall '{recall}' could not resolve required dependency '{dependency}'")]
    UnresolvedDependency {
        /// Name of the recall being resolved.
        recall: String,
        /// Name of the missing dependency.
        dependency: String,
    },

    /// A recall instance was asked to run without a recall id.
    #[error("recall '{0}' has no recall id")]
    MissingRecallId(String),

    /// Templates are only duplicated, never run.
    #[error("recall '{0}' is a template")]
    Template(String),

    /// A channel line or pad is outside the audio's layout.
    #[error("channel index {index} out of range (len {len})")]
    ChannelOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of channels available.
        len: usize,
    },

    /// Links may only join an output line to an input line.
    #[error("cannot link two {0} channels")]
    InvalidLink(&'static str),

    /// Buffer sizes and sample rates must be non-zero.
    #[error("invalid {what}: {value}")]
    InvalidConfig {
        /// Which setting was rejected.
        what: &'static str,
        /// The rejected value.
        value: u64,
    },

    /// A format conversion was requested that the buffer cannot represent.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source format.
        from: SampleFormat,
        /// Target format.
        to: SampleFormat,
    },

    /// The destroy worker has already shut down.
    #[error("destroy worker is not running")]
    WorkerStopped,
}

/// Convenience result type for graph operations.
pub type Result<T> = std::result::Result<T, Error>;
